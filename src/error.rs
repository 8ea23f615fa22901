/// Engine error taxonomy. Everything except stats recomputation surfaces
/// one of these to the caller with a concrete reason.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("validation failure: {0}")]
    Validation(String),
    #[error("integrity failure: {0}")]
    Integrity(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(entity: &str, id: i64) -> Self {
        Error::NotFound(format!("{entity} {id}"))
    }

    /// True if `err` is a storage-level unique-constraint conflict. Used to
    /// turn duplicate enrollment/review inserts into policy violations and
    /// to drive attempt-number retry.
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => db.is_unique_violation(),
            _ => false,
        }
    }
}
