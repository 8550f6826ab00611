//! Error taxonomy of the engine.
//!
//! Errors are split by the moment they can happen:
//!
//! - [`ConfigurationError`] - raised while a callable is being decorated. Fatal and never retried.
//! - [`KeyDerivationError`] - raised per call when arguments (or receiver state) cannot be
//!   turned into a cache key. The cache is bypassed for that call and the error is surfaced.
//! - [`MemoError`] - everything a memoized entry point can return at call time, including
//!   the wrapped callable's own [`Fault`] (fresh or replayed from the cache).

use thiserror::Error;

use crate::outcome::Fault;
use crate::shape::{CallableShape, Transformer};

/// Bad or missing parameter at decoration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("missing required parameter `{0}`")]
    MissingParameter(String),

    #[error("unexpected positional argument at index {index} ({declared} parameters declared)")]
    UnexpectedPositional { index: usize, declared: usize },

    #[error("unexpected keyword argument `{0}`")]
    UnexpectedKeyword(String),

    #[error("parameter `{name}` expects {expected}, got {found}")]
    InvalidValue {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{shape} `{callable}` must declare a receiver parameter")]
    MissingReceiverParameter {
        callable: String,
        shape: CallableShape,
    },

    #[error("state accessor used with non-method callable `{0}`")]
    StateAccessorOnFunction(String),

    #[error("{what} getter with receiver argument used with non-method callable `{callable}`")]
    ReceiverGetterOnFunction {
        callable: String,
        what: &'static str,
    },

    #[error("`{callable}` cannot be bound to a receiver when declared as {transformer:?}")]
    InvalidBinding {
        callable: String,
        transformer: Transformer,
    },
}

/// A scalar leaf that cannot be hashed even after reduction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unhashable value of type `{type_name}`")]
pub struct UnhashableKeyError {
    pub type_name: String,
}

impl UnhashableKeyError {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

/// Arguments or receiver state not reducible to a hashable key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyDerivationError {
    #[error(transparent)]
    Unhashable(#[from] UnhashableKeyError),

    #[error("state of receiver `{type_name}` is not reducible to a key: {source}")]
    State {
        type_name: String,
        source: UnhashableKeyError,
    },
}

/// Returned by [`BackingCache::get`](crate::BackingCache::get) when the key is absent or expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("key not found in cache")]
pub struct KeyMissError;

/// Returned by [`BackingCache::set`](crate::BackingCache::set) when a single value
/// weighs more than the whole cache may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("value of size {size} exceeds cache capacity {capacity}")]
pub struct CapacityError {
    pub size: usize,
    pub capacity: usize,
}

/// Call-time error of a memoized entry point.
#[derive(Debug, Clone, Error)]
pub enum MemoError {
    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    #[error(transparent)]
    Failed(#[from] Fault),

    #[error("{callable}() missing 1 required positional argument: '{param}'")]
    MissingReceiver { callable: String, param: String },

    #[error("{callable}() expects an object receiver, got `{found}`")]
    InvalidReceiver {
        callable: String,
        found: &'static str,
    },
}

impl MemoError {
    /// The wrapped callable's failure, if that is what this error carries.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            MemoError::Failed(fault) => Some(fault),
            _ => None,
        }
    }

    /// Consumes the error, keeping only the callable's failure.
    pub fn into_fault(self) -> Option<Fault> {
        match self {
            MemoError::Failed(fault) => Some(fault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unhashable_converts_into_key_derivation() {
        let err: KeyDerivationError = UnhashableKeyError::new("Socket").into();
        assert_eq!(err.to_string(), "unhashable value of type `Socket`");
    }

    #[test]
    fn test_missing_receiver_message() {
        let err = MemoError::MissingReceiver {
            callable: "area".to_string(),
            param: "self".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "area() missing 1 required positional argument: 'self'"
        );
        assert!(err.fault().is_none());
    }
}
