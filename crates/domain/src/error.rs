use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unknown journey: {0}")]
    UnknownJourney(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(
        "group {group_no} not allowed yet: position {submitted_position} is past current position {current_position} + 1"
    )]
    OrderingConflict {
        group_no: u32,
        submitted_position: u32,
        current_position: u32,
    },
    #[error("application is {status} and no longer accepts submissions")]
    ApplicationClosed { status: String },
    #[error("session expired")]
    SessionExpired,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict")]
    Conflict,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl DomainError {
    /// Configuration errors signal that the caller should refresh configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::UnknownJourney(_) | Self::Config(_))
    }
}
