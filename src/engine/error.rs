use ulid::Ulid;

/// Error taxonomy of the core. Validation and conflict errors surface to
/// the caller, which must re-query before retrying; a WAL error means the
/// operation aborted with no partial state. Provider failures are not in
/// here — the prayer blocker degrades to fail-open instead of erroring.
#[derive(Debug)]
pub enum EngineError {
    Validation(&'static str),
    NotFound(Ulid),
    /// Slot no longer free at commit time; carries the blocking entity
    /// (an overlapping booking, or the resource itself for an inactivity
    /// window).
    Conflict(Ulid),
    /// Resource still referenced by bookings and cannot be deleted.
    ResourceInUse(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with: {id}"),
            EngineError::ResourceInUse(id) => {
                write!(f, "cannot delete resource {id}: bookings reference it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
