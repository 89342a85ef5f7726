use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no connection to the document store")]
    Offline,

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("insufficient coins: required {required}, available {available}")]
    InsufficientCoins { required: i64, available: i64 },

    #[error("minimum withdrawal is {minimum} coins")]
    BelowMinimum { minimum: i64 },

    #[error("monthly payment must be settled before withdrawing")]
    PaymentRequired,

    #[error("wrong password")]
    WrongPassword,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("concurrent modification at {0}")]
    Conflict(String),

    #[error("email is already registered")]
    DuplicateEmail,

    #[error("malformed {collection} document {id}: {source}")]
    Malformed {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Stable code reported over IPC.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Validation(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::InsufficientCoins { .. } => "insufficient_coins",
            Self::BelowMinimum { .. } => "below_minimum",
            Self::PaymentRequired => "payment_required",
            Self::WrongPassword => "wrong_password",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::DuplicateEmail => "duplicate_email",
            Self::Malformed { .. } => "malformed_document",
            Self::Store(StoreError::BadPath(_)) => "bad_params",
            Self::Store(_) => "store_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientCoins {
                required,
                available,
            } => Some(serde_json::json!({ "required": required, "available": available })),
            Self::BelowMinimum { minimum } => Some(serde_json::json!({ "minimum": minimum })),
            Self::Conflict(path) => Some(serde_json::json!({ "path": path })),
            Self::Malformed { collection, id, .. } => {
                Some(serde_json::json!({ "collection": collection, "id": id }))
            }
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(path) => Self::Conflict(path),
            other => Self::Store(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
