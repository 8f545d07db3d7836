use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Rejected before any write: invalid pathname or tag name, rename
    /// destination taken, rename into own subtree.
    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Revision token mismatch on a revision-tracked document.
    #[error("Revision conflict on {id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        id: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Store error: {0}")]
    Store(String),
}

impl StoreError {
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        StoreError::UnprocessableEntity(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        StoreError::NotFound(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_unprocessable(&self) -> bool {
        matches!(self, StoreError::UnprocessableEntity(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// How the sync scheduler reacts to a failed sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorClass {
    /// The remote refused the data because of a size or quota limit.
    QuotaExceeded,
    /// The remote counterpart no longer exists.
    RemoteGone,
    /// Anything else; surfaced but the storage stays linked.
    Other,
}

impl SyncErrorClass {
    /// Quota and gone-remote failures stop all future sync attempts.
    pub fn unlinks(&self) -> bool {
        matches!(self, SyncErrorClass::QuotaExceeded | SyncErrorClass::RemoteGone)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Remote storage size limit exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Remote storage no longer exists: {0}")]
    RemoteGone(String),

    #[error("Revision conflicts on {} document(s): {}", .0.len(), .0.join(", "))]
    Conflict(Vec<String>),

    #[error("Remote error ({status:?}): {message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("Local replica error: {0}")]
    Local(String),
}

impl SyncError {
    /// Classify a failed remote response by its status code.
    ///
    /// 413 and 507 are size/quota refusals, 404 and 410 mean the remote
    /// database was deleted.
    pub fn from_remote(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            Some(413) | Some(507) => SyncError::QuotaExceeded(message),
            Some(404) | Some(410) => SyncError::RemoteGone(message),
            _ => SyncError::Remote { status, message },
        }
    }

    pub fn class(&self) -> SyncErrorClass {
        match self {
            SyncError::QuotaExceeded(_) => SyncErrorClass::QuotaExceeded,
            SyncError::RemoteGone(_) => SyncErrorClass::RemoteGone,
            _ => SyncErrorClass::Other,
        }
    }

    /// Message meant for the person using the app, not for logs.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::QuotaExceeded(_) => {
                "The cloud storage is full. Sync has been turned off for this storage.".to_string()
            }
            SyncError::RemoteGone(_) => {
                "The cloud storage no longer exists. Sync has been turned off for this storage."
                    .to_string()
            }
            SyncError::Conflict(ids) => format!(
                "Sync finished with {} conflicting change{}.",
                ids.len(),
                if ids.len() == 1 { "" } else { "s" }
            ),
            other => format!("Sync failed: {}", other),
        }
    }
}
