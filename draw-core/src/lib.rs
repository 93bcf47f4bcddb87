use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

pub type ParticipantId = String;

/// Giver id to recipient id.
pub type Assignment = BTreeMap<ParticipantId, ParticipantId>;

/// Upper bound on candidate placements tried by [`DrawStrategy::Backtracking`].
const SEARCH_BUDGET: usize = 200_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WishItem {
    pub name: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub first_name: String,
    pub last_name: String,
    pub wishlist: Vec<WishItem>,
    /// Participants this person must never be assigned to give to.
    pub excluded_ids: BTreeSet<ParticipantId>,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn is_profile_complete(&self) -> bool {
        !self.first_name.trim().is_empty()
            && !self.last_name.trim().is_empty()
            && !self.wishlist.is_empty()
    }
}

/// Implicit "same household" exclusion derived from last names.
///
/// This is a heuristic: `SurnameOverlap` has false positives on coincidental
/// overlaps ("Li" / "Lindqvist") and cannot see households whose members have
/// different names. Blank last names never match under any rule.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HouseholdRule {
    /// Case-insensitive substring match in either direction.
    #[default]
    SurnameOverlap,
    /// Case-insensitive equality.
    SurnameExact,
    Disabled,
}

impl HouseholdRule {
    /// Blank last names never match: every string contains the empty string,
    /// and participants start with no name, so a blank name would otherwise
    /// exclude everyone.
    pub fn same_household(&self, a: &Participant, b: &Participant) -> bool {
        if matches!(self, HouseholdRule::Disabled) {
            return false;
        }
        let a = a.last_name.trim().to_lowercase();
        let b = b.last_name.trim().to_lowercase();
        if a.is_empty() || b.is_empty() {
            return false;
        }
        match self {
            HouseholdRule::SurnameOverlap => a.contains(&b) || b.contains(&a),
            HouseholdRule::SurnameExact => a == b,
            HouseholdRule::Disabled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrawStrategy {
    /// Randomized greedy with immediate removal. Order dependent: may report
    /// `Infeasible` even though a valid assignment exists.
    #[default]
    Greedy,
    /// Randomized depth-first search with backtracking over the same order.
    Backtracking,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("no legal recipient left for giver {giver}")]
    Infeasible { giver: ParticipantId },
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),
}

/// Whether `recipient` may be assigned to `giver`.
pub fn is_legal(giver: &Participant, recipient: &Participant, rule: HouseholdRule) -> bool {
    giver.id != recipient.id
        && !giver.excluded_ids.contains(&recipient.id)
        && !rule.same_household(giver, recipient)
}

/// Assigns every participant exactly one recipient.
///
/// Givers are processed in roster order. The result is a derangement that
/// honors explicit exclusions and `rule`; on failure nothing is returned but
/// the giver that could not be served.
pub fn assign<R: Rng + ?Sized>(
    participants: &[Participant],
    rule: HouseholdRule,
    strategy: DrawStrategy,
    rng: &mut R,
) -> Result<Assignment, DrawError> {
    let result = match strategy {
        DrawStrategy::Greedy => assign_greedy(participants, rule, rng),
        DrawStrategy::Backtracking => assign_backtracking(participants, rule, rng),
    };
    if let Err(DrawError::Infeasible { giver }) = &result {
        tracing::debug!(%giver, ?strategy, roster = participants.len(), "draw attempt infeasible");
    }
    result
}

fn assign_greedy<R: Rng + ?Sized>(
    participants: &[Participant],
    rule: HouseholdRule,
    rng: &mut R,
) -> Result<Assignment, DrawError> {
    let mut pool: Vec<&Participant> = participants.iter().collect();
    let mut assignment = Assignment::new();

    for giver in participants {
        let legal = pool
            .iter()
            .enumerate()
            .filter(|(_, candidate)| is_legal(giver, candidate, rule))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        let Some(&pick) = legal.choose(rng) else {
            return Err(DrawError::Infeasible {
                giver: giver.id.clone(),
            });
        };

        let recipient = pool.swap_remove(pick);
        assignment.insert(giver.id.clone(), recipient.id.clone());
    }

    Ok(assignment)
}

fn assign_backtracking<R: Rng + ?Sized>(
    participants: &[Participant],
    rule: HouseholdRule,
    rng: &mut R,
) -> Result<Assignment, DrawError> {
    let mut options = participants
        .iter()
        .map(|giver| {
            participants
                .iter()
                .enumerate()
                .filter(|(_, candidate)| is_legal(giver, candidate, rule))
                .map(|(index, _)| index)
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    for list in options.iter_mut() {
        list.shuffle(rng);
    }

    let mut search = Search {
        options: &options,
        used: vec![false; participants.len()],
        chosen: Vec::with_capacity(participants.len()),
        visited: 0,
        deepest: 0,
    };

    if search.extend() {
        return Ok(participants
            .iter()
            .zip(&search.chosen)
            .map(|(giver, &recipient)| (giver.id.clone(), participants[recipient].id.clone()))
            .collect());
    }

    Err(DrawError::Infeasible {
        giver: participants[search.deepest].id.clone(),
    })
}

struct Search<'a> {
    options: &'a [Vec<usize>],
    used: Vec<bool>,
    chosen: Vec<usize>,
    visited: usize,
    deepest: usize,
}

impl Search<'_> {
    fn extend(&mut self) -> bool {
        let depth = self.chosen.len();
        let options = self.options;
        if depth == options.len() {
            return true;
        }
        self.deepest = self.deepest.max(depth);

        for &candidate in &options[depth] {
            if self.used[candidate] {
                continue;
            }
            if self.visited >= SEARCH_BUDGET {
                return false;
            }
            self.visited += 1;

            self.used[candidate] = true;
            self.chosen.push(candidate);
            if self.extend() {
                return true;
            }
            self.chosen.pop();
            self.used[candidate] = false;
        }
        false
    }
}

/// Checks that `assignment` is a complete derangement of `participants`
/// honoring every exclusion. Messages never name a recipient.
pub fn verify(
    participants: &[Participant],
    assignment: &Assignment,
    rule: HouseholdRule,
) -> Result<(), DrawError> {
    let by_id: HashMap<&str, &Participant> =
        participants.iter().map(|p| (p.id.as_str(), p)).collect();
    if by_id.len() != participants.len() {
        return Err(DrawError::InvalidAssignment(
            "roster contains duplicate ids".into(),
        ));
    }
    if assignment.len() != participants.len() {
        return Err(DrawError::InvalidAssignment(format!(
            "expected {} pairings, found {}",
            participants.len(),
            assignment.len()
        )));
    }

    let mut received = HashSet::new();
    for (giver_id, recipient_id) in assignment {
        let giver = by_id.get(giver_id.as_str()).ok_or_else(|| {
            DrawError::InvalidAssignment(format!("unknown giver {giver_id}"))
        })?;
        let recipient = by_id.get(recipient_id.as_str()).ok_or_else(|| {
            DrawError::InvalidAssignment(format!("giver {giver_id} has an unknown recipient"))
        })?;
        if !is_legal(giver, recipient, rule) {
            return Err(DrawError::InvalidAssignment(format!(
                "giver {giver_id} has an excluded recipient"
            )));
        }
        if !received.insert(recipient_id.as_str()) {
            return Err(DrawError::InvalidAssignment(
                "a recipient is assigned more than once".into(),
            ));
        }
    }

    Ok(())
}
