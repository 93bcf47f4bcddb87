//! Errors surfaced by the exchange coordinator.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("no valid pairing found for participant {giver}; adjust exclusions or the participant list and retry")]
    Infeasible { giver: String },

    #[error("the exchange has already been drawn; reset it before drawing again")]
    AlreadyDrawn,

    #[error("at least 2 participants are needed to draw, found {count}")]
    NotEnoughParticipants { count: usize },

    #[error("the exchange has not been drawn yet")]
    NotDrawn,

    #[error("participant {0} not found")]
    ParticipantNotFound(String),

    #[error("invalid exclusion for {participant}: {reason}")]
    InvalidExclusion { participant: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("complete your name and wishlist before revealing your recipient")]
    ProfileIncomplete,

    #[error("storage is unavailable, please retry")]
    StoreUnavailable(#[from] StoreError),

    #[error("timed out waiting for {operation}, please retry")]
    Timeout { operation: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Transient store failures the caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::StoreUnavailable(_) | ExchangeError::Timeout { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ExchangeError::Infeasible { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ExchangeError::AlreadyDrawn => StatusCode::CONFLICT,
            ExchangeError::NotEnoughParticipants { .. } => StatusCode::BAD_REQUEST,
            ExchangeError::NotDrawn => StatusCode::NOT_FOUND,
            ExchangeError::ParticipantNotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::InvalidExclusion { .. } => StatusCode::BAD_REQUEST,
            ExchangeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ExchangeError::ProfileIncomplete => StatusCode::PRECONDITION_FAILED,
            ExchangeError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ExchangeError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ExchangeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ExchangeError::Infeasible { .. } => "infeasible",
            ExchangeError::AlreadyDrawn => "already_drawn",
            ExchangeError::NotEnoughParticipants { .. } => "not_enough_participants",
            ExchangeError::NotDrawn => "not_drawn",
            ExchangeError::ParticipantNotFound(_) => "participant_not_found",
            ExchangeError::InvalidExclusion { .. } => "invalid_exclusion",
            ExchangeError::InvalidInput(_) => "invalid_input",
            ExchangeError::ProfileIncomplete => "profile_incomplete",
            ExchangeError::StoreUnavailable(_) => "store_unavailable",
            ExchangeError::Timeout { .. } => "timeout",
            ExchangeError::Internal(_) => "internal",
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        // Store internals stay in the logs.
        if let ExchangeError::StoreUnavailable(source) = &self {
            tracing::error!(error = %source, "store call failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
