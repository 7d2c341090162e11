use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad or missing input. Never reaches the database.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("already waiting in the middleman queue")]
    AlreadyQueued,

    #[error("already processed")]
    AlreadyProcessed,

    #[error("counterparty '{0}' not found")]
    CounterpartyNotFound(String),

    #[error("not permitted: {0}")]
    Permission(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Short machine-readable name, used as the `error` field of API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::AlreadyQueued => "already_queued",
            Self::AlreadyProcessed => "already_processed",
            Self::CounterpartyNotFound(_) => "counterparty_not_found",
            Self::Permission(_) => "permission",
            Self::Conflict(_) => "conflict",
            Self::Sqlite(_) | Self::Json(_) | Self::Internal(_) => "internal",
        }
    }
}
