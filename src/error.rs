use crate::ad_inserter::SessionState;
use thiserror::Error;

/// Errors that can reach a caller of the ad session.
///
/// Provider failures, stale events and beacon network failures are absorbed
/// inside the controller and never show up here.
#[derive(Debug, Error)]
pub enum AdError {
    #[error("no ad tag configured; fill in an ad tag before starting")]
    EmptyAdTagInput,

    #[error("invalid waterfall parameters: {0}")]
    InvalidWaterfall(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("client info lookup failed: {0}")]
    Lookup(String),

    #[error("cannot {action} while session is {state:?}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
}

pub type Result<T> = std::result::Result<T, AdError>;
