use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The store was closed and no longer accepts operations.
    #[error("State store is closed")]
    Closed,
}
