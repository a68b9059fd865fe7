use thiserror::Error;

use crate::event::EventKind;
use crate::item::Key;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MirrorError {
    #[error("Index {index} out of range for collection of {count} items")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("Malformed {kind} event: missing item key")]
    MissingKey { kind: EventKind },
    #[error("Unknown key {key} in {kind} event")]
    UnknownKey { key: Key, kind: EventKind },
}

impl MirrorError {
    /// Errors that describe a transient race with the server rather than
    /// bad input.
    pub fn is_race(&self) -> bool {
        matches!(self, MirrorError::UnknownKey { .. })
    }
}
