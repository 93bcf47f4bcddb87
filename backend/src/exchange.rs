//! Exchange lifecycle: draw, reveal and reset over the document store.
//!
//! The global state is never persisted. The exchange is drawn exactly when
//! the `pairings` collection is non-empty.
//!
//! ```text
//! [NOT DRAWN] ──draw──→ [DRAWN] ──reset──→ [NOT DRAWN]
//!                          │
//!                          └── reveal(giver): pairing.revealed false → true, once
//! ```
//!
//! A recipient is only ever returned to its giver, and only after that
//! giver's own reveal.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use draw_core::{Assignment, DrawError, DrawStrategy, HouseholdRule, Participant, WishItem};
use futures::future::try_join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ExchangeError, ExchangeResult};
use crate::store::{
    ExchangeStore, PairingRecord, ParticipantRecord, ParticipantUpdate, RevealOutcome,
    StoreResult,
};

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ProfileView {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub wishlist: Vec<WishItem>,
}

impl From<Participant> for ProfileView {
    fn from(p: Participant) -> Self {
        Self {
            id: p.id,
            first_name: p.first_name,
            last_name: p.last_name,
            wishlist: p.wishlist,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RecipientProfile {
    pub first_name: String,
    pub last_name: String,
    pub wishlist: Vec<WishItem>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssignmentView {
    NotDrawn,
    /// Assigned, recipient withheld until the giver reveals.
    Hidden,
    Revealed { recipient: RecipientProfile },
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct RevealReceipt {
    pub already_revealed: bool,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct DrawSummary {
    pub draw_id: Uuid,
    pub pairings: usize,
    pub attempts: u32,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct ResetSummary {
    pub removed: usize,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    NotDrawn,
    Drawn,
    /// Pairings exist but do not form one complete draw; reset before drawing.
    Incomplete,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct ExchangeStatus {
    pub state: ExchangeState,
    pub participants: usize,
    pub pairings: usize,
    pub revealed: usize,
}

pub struct Exchange {
    store: Arc<dyn ExchangeStore>,
    household_rule: HouseholdRule,
    draw_strategy: DrawStrategy,
    max_draw_attempts: u32,
    store_timeout: Duration,
    require_complete_profile: bool,
    /// Serializes draw and reset within this process.
    lifecycle: Mutex<()>,
}

impl Exchange {
    pub fn new(store: Arc<dyn ExchangeStore>, settings: &Settings) -> Self {
        Self {
            store,
            household_rule: settings.household_rule,
            draw_strategy: settings.draw_strategy,
            max_draw_attempts: settings.max_draw_attempts,
            store_timeout: settings.store_timeout(),
            require_complete_profile: settings.require_complete_profile,
            lifecycle: Mutex::new(()),
        }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> ExchangeResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(operation, timeout_ms = self.store_timeout.as_millis() as u64, "store call timed out");
                Err(ExchangeError::Timeout { operation })
            }
        }
    }

    /// Returns the caller's record, creating an empty one on first access.
    pub async fn ensure_participant(&self, uid: &str) -> ExchangeResult<Participant> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(ExchangeError::InvalidInput("participant id required".into()));
        }
        let record = self
            .call(
                "create participant",
                self.store
                    .insert_participant_if_absent(uid, ParticipantRecord::default()),
            )
            .await?;
        Ok(record.into_participant(uid))
    }

    pub async fn get_profile(&self, uid: &str) -> ExchangeResult<ProfileView> {
        Ok(self.ensure_participant(uid).await?.into())
    }

    pub async fn save_profile(
        &self,
        uid: &str,
        first_name: &str,
        last_name: &str,
    ) -> ExchangeResult<ProfileView> {
        let participant = self.ensure_participant(uid).await?;
        let update = ParticipantUpdate::Profile {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
        };
        self.update(&participant.id, update).await.map(Into::into)
    }

    pub async fn get_wishlist(&self, uid: &str) -> ExchangeResult<Vec<WishItem>> {
        Ok(self.ensure_participant(uid).await?.wishlist)
    }

    pub async fn save_wishlist(
        &self,
        uid: &str,
        items: Vec<WishItem>,
    ) -> ExchangeResult<Vec<WishItem>> {
        let items = items
            .into_iter()
            .map(normalize_wish)
            .collect::<ExchangeResult<Vec<_>>>()?;
        let participant = self.ensure_participant(uid).await?;
        let saved = self
            .update(&participant.id, ParticipantUpdate::Wishlist(items))
            .await?;
        Ok(saved.wishlist)
    }

    async fn update(&self, id: &str, update: ParticipantUpdate) -> ExchangeResult<Participant> {
        let record = self
            .call("update participant", self.store.update_participant(id, update))
            .await?
            .ok_or_else(|| ExchangeError::ParticipantNotFound(id.to_string()))?;
        Ok(record.into_participant(id))
    }

    pub async fn list_participants(&self) -> ExchangeResult<Vec<Participant>> {
        let roster = self
            .call("list participants", self.store.list_participants())
            .await?;
        Ok(roster
            .into_iter()
            .map(|(id, record)| record.into_participant(id))
            .collect())
    }

    /// Replaces a participant's explicit exclusions. Only the next draw is
    /// affected.
    pub async fn set_exclusions(
        &self,
        id: &str,
        excluded_ids: Vec<String>,
    ) -> ExchangeResult<Participant> {
        let roster = self.list_participants().await?;
        let known: HashSet<&str> = roster.iter().map(|p| p.id.as_str()).collect();
        if !known.contains(id) {
            return Err(ExchangeError::ParticipantNotFound(id.to_string()));
        }

        let mut cleaned = BTreeSet::new();
        for excluded in excluded_ids {
            let excluded = excluded.trim();
            if excluded == id {
                return Err(ExchangeError::InvalidExclusion {
                    participant: id.to_string(),
                    reason: "a participant cannot exclude themselves".into(),
                });
            }
            if !known.contains(excluded) {
                return Err(ExchangeError::InvalidExclusion {
                    participant: id.to_string(),
                    reason: format!("unknown participant {excluded}"),
                });
            }
            cleaned.insert(excluded.to_string());
        }

        let count = cleaned.len();
        let participant = self
            .update(id, ParticipantUpdate::Exclusions(cleaned.into_iter().collect()))
            .await?;
        info!(participant = id, exclusions = count, "exclusions updated");
        Ok(participant)
    }

    /// Assigns every registered participant a recipient and persists the
    /// pairings. A `seed` makes the draw reproducible.
    pub async fn draw(&self, seed: Option<u64>) -> ExchangeResult<DrawSummary> {
        let _lifecycle = self.lifecycle.lock().await;

        let existing = self.call("list pairings", self.store.list_pairings()).await?;
        if !existing.is_empty() {
            warn!(pairings = existing.len(), "draw refused, exchange already drawn");
            return Err(ExchangeError::AlreadyDrawn);
        }

        let roster = self.list_participants().await?;
        if roster.len() < 2 {
            return Err(ExchangeError::NotEnoughParticipants {
                count: roster.len(),
            });
        }

        let mut rng = seed
            .map(ChaCha8Rng::seed_from_u64)
            .unwrap_or_else(ChaCha8Rng::from_entropy);
        let (assignment, attempts) = self.assign_with_retries(&roster, &mut rng)?;
        draw_core::verify(&roster, &assignment, self.household_rule)
            .map_err(|err| ExchangeError::Internal(err.to_string()))?;

        let draw_id = Uuid::new_v4();
        let writes = assignment.iter().map(|(giver, recipient)| {
            let pairing = PairingRecord {
                recipient_id: recipient.clone(),
                revealed: false,
                draw_id: Some(draw_id),
                draw_size: assignment.len(),
            };
            self.call("write pairing", self.store.put_pairing(giver, pairing))
        });
        if let Err(err) = try_join_all(writes).await {
            error!(%draw_id, error = %err, "draw interrupted, exchange must be reset before retrying");
            return Err(err);
        }

        info!(%draw_id, pairings = assignment.len(), attempts, "exchange drawn");
        Ok(DrawSummary {
            draw_id,
            pairings: assignment.len(),
            attempts,
        })
    }

    fn assign_with_retries(
        &self,
        roster: &[Participant],
        rng: &mut ChaCha8Rng,
    ) -> ExchangeResult<(Assignment, u32)> {
        let mut last_giver = None;
        for attempt in 1..=self.max_draw_attempts {
            match draw_core::assign(roster, self.household_rule, self.draw_strategy, rng) {
                Ok(assignment) => return Ok((assignment, attempt)),
                Err(DrawError::Infeasible { giver }) => {
                    debug!(attempt, %giver, "no valid assignment this attempt");
                    last_giver = Some(giver);
                }
                Err(other) => return Err(ExchangeError::Internal(other.to_string())),
            }
        }

        let giver = last_giver.unwrap_or_default();
        warn!(%giver, attempts = self.max_draw_attempts, "draw infeasible");
        Err(ExchangeError::Infeasible { giver })
    }

    /// Deletes every pairing. Succeeds when nothing was drawn.
    pub async fn reset(&self) -> ExchangeResult<ResetSummary> {
        let _lifecycle = self.lifecycle.lock().await;
        let removed = self
            .call("delete pairings", self.store.delete_pairings())
            .await?;
        info!(removed, "exchange reset");
        Ok(ResetSummary { removed })
    }

    pub async fn get_assignment(&self, uid: &str) -> ExchangeResult<AssignmentView> {
        let Some(pairing) = self.call("read pairing", self.store.get_pairing(uid)).await? else {
            return Ok(AssignmentView::NotDrawn);
        };
        if !pairing.revealed {
            return Ok(AssignmentView::Hidden);
        }

        let recipient = self
            .call(
                "read participant",
                self.store.get_participant(&pairing.recipient_id),
            )
            .await?
            .ok_or_else(|| ExchangeError::ParticipantNotFound(pairing.recipient_id.clone()))?;
        Ok(AssignmentView::Revealed {
            recipient: RecipientProfile {
                first_name: recipient.first_name,
                last_name: recipient.last_name,
                wishlist: recipient.wishlist,
            },
        })
    }

    /// Flips the caller's pairing to revealed. Concurrent calls for one giver
    /// observe exactly one `already_revealed: false`.
    pub async fn reveal(&self, uid: &str) -> ExchangeResult<RevealReceipt> {
        let Some(pairing) = self.call("read pairing", self.store.get_pairing(uid)).await? else {
            return Err(ExchangeError::NotDrawn);
        };

        if !pairing.revealed && self.require_complete_profile {
            let complete = self
                .call("read participant", self.store.get_participant(uid))
                .await?
                .map(|record| record.into_participant(uid).is_profile_complete())
                .unwrap_or(false);
            if !complete {
                return Err(ExchangeError::ProfileIncomplete);
            }
        }

        match self.call("reveal", self.store.mark_revealed(uid)).await? {
            RevealOutcome::Flipped => {
                info!(giver = uid, "recipient revealed");
                Ok(RevealReceipt {
                    already_revealed: false,
                })
            }
            RevealOutcome::AlreadyRevealed => Ok(RevealReceipt {
                already_revealed: true,
            }),
            RevealOutcome::Missing => Err(ExchangeError::NotDrawn),
        }
    }

    pub async fn status(&self) -> ExchangeResult<ExchangeStatus> {
        let pairings = self.call("list pairings", self.store.list_pairings()).await?;
        let participants = self
            .call("list participants", self.store.list_participants())
            .await?
            .len();

        let state = if pairings.is_empty() {
            ExchangeState::NotDrawn
        } else if is_complete_draw(&pairings) {
            ExchangeState::Drawn
        } else {
            ExchangeState::Incomplete
        };

        Ok(ExchangeStatus {
            state,
            participants,
            pairings: pairings.len(),
            revealed: pairings.iter().filter(|(_, p)| p.revealed).count(),
        })
    }
}

/// Every pairing of a single draw is present, and recipients are exactly the
/// givers with no fixed points.
fn is_complete_draw(pairings: &[(String, PairingRecord)]) -> bool {
    let draws: HashSet<(Option<Uuid>, usize)> = pairings
        .iter()
        .map(|(_, p)| (p.draw_id, p.draw_size))
        .collect();
    if draws.len() != 1 || pairings.iter().any(|(_, p)| p.draw_size != pairings.len()) {
        return false;
    }
    let givers: HashSet<&str> = pairings.iter().map(|(g, _)| g.as_str()).collect();
    let recipients: HashSet<&str> = pairings
        .iter()
        .map(|(_, p)| p.recipient_id.as_str())
        .collect();
    givers == recipients && pairings.iter().all(|(g, p)| *g != p.recipient_id)
}

fn normalize_wish(item: WishItem) -> ExchangeResult<WishItem> {
    let name = item.name.trim();
    if name.is_empty() {
        return Err(ExchangeError::InvalidInput(
            "wishlist items need a name".into(),
        ));
    }
    let link = item
        .link
        .map(|link| link.trim().to_string())
        .filter(|link| !link.is_empty());
    Ok(WishItem {
        name: name.to_string(),
        link,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wish(name: &str) -> WishItem {
        WishItem {
            name: name.to_string(),
            link: None,
        }
    }

    fn exchange_with(store: Arc<dyn ExchangeStore>, settings: Settings) -> Exchange {
        Exchange::new(store, &settings)
    }

    fn exchange() -> Exchange {
        exchange_with(Arc::new(MemoryStore::new()), Settings::default())
    }

    async fn register(exchange: &Exchange, id: &str, first: &str, last: &str) {
        exchange.save_profile(id, first, last).await.unwrap();
        exchange
            .save_wishlist(id, vec![wish(&format!("{first}'s socks"))])
            .await
            .unwrap();
    }

    async fn households(exchange: &Exchange) {
        register(exchange, "a", "Ann", "Smith").await;
        register(exchange, "b", "Bob", "Smith").await;
        register(exchange, "c", "Cid", "Jones").await;
        register(exchange, "d", "Dee", "Jones").await;
    }

    #[tokio::test]
    async fn draw_reveal_flow_honors_households() {
        let exchange = exchange();
        households(&exchange).await;

        let summary = exchange.draw(Some(7)).await.unwrap();
        assert_eq!(summary.pairings, 4);
        assert_eq!(exchange.status().await.unwrap().state, ExchangeState::Drawn);

        assert_eq!(
            exchange.get_assignment("a").await.unwrap(),
            AssignmentView::Hidden
        );
        let receipt = exchange.reveal("a").await.unwrap();
        assert!(!receipt.already_revealed);

        let AssignmentView::Revealed { recipient } = exchange.get_assignment("a").await.unwrap()
        else {
            panic!("expected revealed assignment");
        };
        assert_eq!(recipient.last_name, "Jones");
        assert_eq!(recipient.wishlist.len(), 1);

        let before = exchange.store.get_pairing("a").await.unwrap().unwrap();
        assert!(exchange.reveal("a").await.unwrap().already_revealed);
        let after = exchange.store.get_pairing("a").await.unwrap().unwrap();
        assert_eq!(before.recipient_id, after.recipient_id);

        let status = exchange.status().await.unwrap();
        assert_eq!(status.revealed, 1);
        assert_eq!(status.participants, 4);
    }

    #[tokio::test]
    async fn hidden_assignment_discloses_nothing() {
        let exchange = exchange();
        households(&exchange).await;
        exchange.draw(None).await.unwrap();

        let view = exchange.get_assignment("c").await.unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "hidden" }));
    }

    #[tokio::test]
    async fn second_draw_is_refused_and_keeps_pairings() {
        let exchange = exchange();
        households(&exchange).await;
        exchange.draw(Some(1)).await.unwrap();
        let first = exchange.store.list_pairings().await.unwrap();

        let err = exchange.draw(Some(2)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::AlreadyDrawn));
        assert_eq!(exchange.store.list_pairings().await.unwrap(), first);
    }

    #[tokio::test]
    async fn reset_is_idempotent_and_allows_redraw() {
        let exchange = exchange();
        assert_eq!(exchange.reset().await.unwrap().removed, 0);

        households(&exchange).await;
        exchange.draw(None).await.unwrap();
        exchange.reveal("b").await.unwrap();
        assert_eq!(exchange.reset().await.unwrap().removed, 4);
        assert_eq!(exchange.reset().await.unwrap().removed, 0);
        assert!(exchange.store.list_pairings().await.unwrap().is_empty());
        assert_eq!(
            exchange.get_assignment("b").await.unwrap(),
            AssignmentView::NotDrawn
        );

        exchange.draw(None).await.unwrap();
        assert_eq!(
            exchange.get_assignment("b").await.unwrap(),
            AssignmentView::Hidden
        );
    }

    #[tokio::test]
    async fn draw_needs_two_participants() {
        let exchange = exchange();
        register(&exchange, "a", "Ann", "Smith").await;
        assert!(matches!(
            exchange.draw(None).await,
            Err(ExchangeError::NotEnoughParticipants { count: 1 })
        ));
    }

    #[tokio::test]
    async fn infeasible_draw_commits_nothing() {
        let exchange = exchange();
        register(&exchange, "a", "Ann", "Nowak").await;
        register(&exchange, "b", "Bob", "Kowalski").await;
        exchange.set_exclusions("a", vec!["b".into()]).await.unwrap();
        exchange.set_exclusions("b", vec!["a".into()]).await.unwrap();

        match exchange.draw(None).await {
            Err(ExchangeError::Infeasible { giver }) => assert!(giver == "a" || giver == "b"),
            other => panic!("expected infeasible, got {other:?}"),
        }
        assert!(exchange.store.list_pairings().await.unwrap().is_empty());
        assert_eq!(exchange.status().await.unwrap().state, ExchangeState::NotDrawn);
    }

    #[tokio::test]
    async fn exclusions_are_validated() {
        let exchange = exchange();
        register(&exchange, "a", "Ann", "Nowak").await;
        register(&exchange, "b", "Bob", "Kowalski").await;

        assert!(matches!(
            exchange.set_exclusions("a", vec!["a".into()]).await,
            Err(ExchangeError::InvalidExclusion { .. })
        ));
        assert!(matches!(
            exchange.set_exclusions("a", vec!["zed".into()]).await,
            Err(ExchangeError::InvalidExclusion { .. })
        ));
        assert!(matches!(
            exchange.set_exclusions("zed", vec![]).await,
            Err(ExchangeError::ParticipantNotFound(_))
        ));

        let updated = exchange
            .set_exclusions("a", vec!["b".into(), " b ".into()])
            .await
            .unwrap();
        assert_eq!(updated.excluded_ids.len(), 1);
        assert!(updated.excluded_ids.contains("b"));
    }

    #[tokio::test]
    async fn reveal_before_draw_reports_not_drawn() {
        let exchange = exchange();
        register(&exchange, "a", "Ann", "Nowak").await;

        assert!(matches!(
            exchange.reveal("a").await,
            Err(ExchangeError::NotDrawn)
        ));
        assert_eq!(
            exchange.get_assignment("a").await.unwrap(),
            AssignmentView::NotDrawn
        );
    }

    #[tokio::test]
    async fn reveal_requires_complete_profile() {
        let exchange = exchange();
        households(&exchange).await;
        exchange.save_wishlist("a", vec![]).await.unwrap();
        exchange.draw(None).await.unwrap();

        assert!(matches!(
            exchange.reveal("a").await,
            Err(ExchangeError::ProfileIncomplete)
        ));
        assert_eq!(
            exchange.get_assignment("a").await.unwrap(),
            AssignmentView::Hidden
        );

        let relaxed = exchange_with(
            exchange.store.clone(),
            Settings {
                require_complete_profile: false,
                ..Settings::default()
            },
        );
        assert!(!relaxed.reveal("a").await.unwrap().already_revealed);
    }

    #[tokio::test]
    async fn concurrent_reveals_flip_once() {
        let exchange = exchange();
        households(&exchange).await;
        exchange.draw(None).await.unwrap();

        let (first, second) = tokio::join!(exchange.reveal("d"), exchange.reveal("d"));
        let first_time = [first.unwrap(), second.unwrap()]
            .iter()
            .filter(|r| !r.already_revealed)
            .count();
        assert_eq!(first_time, 1);
    }

    #[tokio::test]
    async fn wishlist_items_are_normalized() {
        let exchange = exchange();
        let saved = exchange
            .save_wishlist(
                "a",
                vec![WishItem {
                    name: "  book ".into(),
                    link: Some("  ".into()),
                }],
            )
            .await
            .unwrap();
        assert_eq!(saved, vec![wish("book")]);

        assert!(matches!(
            exchange.save_wishlist("a", vec![wish("   ")]).await,
            Err(ExchangeError::InvalidInput(_))
        ));
        assert_eq!(exchange.get_wishlist("a").await.unwrap(), vec![wish("book")]);
    }

    /// Delegates to a `MemoryStore`, failing pairing writes past a budget and
    /// optionally delaying every read.
    struct FlakyStore {
        inner: MemoryStore,
        pairing_writes_left: AtomicUsize,
        read_delay: Option<Duration>,
    }

    impl FlakyStore {
        fn new(pairing_writes: usize, read_delay: Option<Duration>) -> Self {
            Self {
                inner: MemoryStore::new(),
                pairing_writes_left: AtomicUsize::new(pairing_writes),
                read_delay,
            }
        }

        async fn slow(&self) {
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl ExchangeStore for FlakyStore {
        async fn get_participant(&self, id: &str) -> StoreResult<Option<ParticipantRecord>> {
            self.inner.get_participant(id).await
        }

        async fn insert_participant_if_absent(
            &self,
            id: &str,
            record: ParticipantRecord,
        ) -> StoreResult<ParticipantRecord> {
            self.inner.insert_participant_if_absent(id, record).await
        }

        async fn update_participant(
            &self,
            id: &str,
            update: ParticipantUpdate,
        ) -> StoreResult<Option<ParticipantRecord>> {
            self.inner.update_participant(id, update).await
        }

        async fn list_participants(&self) -> StoreResult<Vec<(String, ParticipantRecord)>> {
            self.inner.list_participants().await
        }

        async fn get_pairing(&self, giver_id: &str) -> StoreResult<Option<PairingRecord>> {
            self.slow().await;
            self.inner.get_pairing(giver_id).await
        }

        async fn list_pairings(&self) -> StoreResult<Vec<(String, PairingRecord)>> {
            self.inner.list_pairings().await
        }

        async fn put_pairing(&self, giver_id: &str, pairing: PairingRecord) -> StoreResult<()> {
            let allowed = self
                .pairing_writes_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(StoreError::Unavailable("write rejected".into()));
            }
            self.inner.put_pairing(giver_id, pairing).await
        }

        async fn mark_revealed(&self, giver_id: &str) -> StoreResult<RevealOutcome> {
            self.inner.mark_revealed(giver_id).await
        }

        async fn delete_pairings(&self) -> StoreResult<usize> {
            self.inner.delete_pairings().await
        }
    }

    #[tokio::test]
    async fn interrupted_draw_requires_reset() {
        let store = Arc::new(FlakyStore::new(2, None));
        let exchange = exchange_with(store.clone(), Settings::default());
        households(&exchange).await;

        let err = exchange.draw(None).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            exchange.status().await.unwrap().state,
            ExchangeState::Incomplete
        );
        assert!(matches!(
            exchange.draw(None).await,
            Err(ExchangeError::AlreadyDrawn)
        ));

        exchange.reset().await.unwrap();
        store.pairing_writes_left.store(usize::MAX, Ordering::SeqCst);
        exchange.draw(None).await.unwrap();
        assert_eq!(exchange.status().await.unwrap().state, ExchangeState::Drawn);
    }

    #[tokio::test]
    async fn interrupted_draw_with_whole_cycle_written_is_incomplete() {
        let store = Arc::new(FlakyStore::new(2, None));
        let exchange = exchange_with(store.clone(), Settings::default());
        register(&exchange, "a", "Ann", "Nowak").await;
        register(&exchange, "b", "Bob", "Kowalski").await;
        register(&exchange, "c", "Cid", "Wisniewski").await;
        register(&exchange, "d", "Dee", "Lewandowski").await;
        // Forces a <-> b and c <-> d; a and b are written first.
        exchange
            .set_exclusions("a", vec!["c".into(), "d".into()])
            .await
            .unwrap();
        exchange
            .set_exclusions("b", vec!["c".into(), "d".into()])
            .await
            .unwrap();

        assert!(exchange.draw(None).await.is_err());

        let pairings = store.list_pairings().await.unwrap();
        assert_eq!(pairings.len(), 2);
        assert_eq!(pairings[0].1.recipient_id, "b");
        assert_eq!(pairings[1].1.recipient_id, "a");

        let status = exchange.status().await.unwrap();
        assert_eq!(status.state, ExchangeState::Incomplete);
        assert_eq!(
            exchange.get_assignment("c").await.unwrap(),
            AssignmentView::NotDrawn
        );
    }

    #[tokio::test]
    async fn exclusions_after_draw_keep_pairings() {
        let exchange = exchange();
        households(&exchange).await;
        exchange.draw(Some(3)).await.unwrap();

        let before = exchange.store.list_pairings().await.unwrap();
        let current = exchange
            .store
            .get_pairing("a")
            .await
            .unwrap()
            .unwrap()
            .recipient_id;
        exchange
            .set_exclusions("a", vec![current.clone()])
            .await
            .unwrap();

        assert_eq!(exchange.store.list_pairings().await.unwrap(), before);
        assert_eq!(exchange.status().await.unwrap().state, ExchangeState::Drawn);

        exchange.reset().await.unwrap();
        for seed in 0..10 {
            exchange.draw(Some(seed)).await.unwrap();
            let next = exchange.store.get_pairing("a").await.unwrap().unwrap();
            assert_ne!(next.recipient_id, current);
            exchange.reset().await.unwrap();
        }
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let store = Arc::new(FlakyStore::new(usize::MAX, Some(Duration::from_millis(200))));
        let exchange = exchange_with(
            store,
            Settings {
                store_timeout_ms: 20,
                ..Settings::default()
            },
        );

        let err = exchange.get_assignment("a").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout { .. }));
        assert!(err.is_retryable());
    }
}
