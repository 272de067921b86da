//! Error types for sample rate conversion.

use thiserror::Error;

use crate::engine::{Engine, Status};

/// Result type alias for samplerate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for samplerate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid shape, channel count or converter selector.
    #[error("usage error: {0}")]
    Usage(String),

    /// The engine reported an error status.
    #[error("conversion error: {message}")]
    Conversion { status: i32, message: String },

    /// A pull-mode producer returned unusable data or panicked.
    #[error("producer error: {0}")]
    Producer(String),

    /// The engine generated more frames than were allocated.
    #[error("generated {generated} frames but only {capacity} were allocated")]
    InternalInvariant { generated: usize, capacity: usize },

    /// The engine reported a status outside the recognized range.
    #[error("engine reported an unknown status code: {0}")]
    UnknownStatus(i32),

    /// Output buffer could not be shaped.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    /// Returns the engine status code for conversion errors.
    pub fn status(&self) -> Option<i32> {
        match self {
            Error::Conversion { status, .. } => Some(*status),
            Error::UnknownStatus(code) => Some(*code),
            _ => None,
        }
    }
}

/// Translates an engine status into a result.
///
/// Unknown codes are never passed to [`Engine::strerror`].
pub fn check<E: Engine>(status: Status) -> Result<()> {
    if status.is_ok() {
        Ok(())
    } else if status.is_recognized_error() {
        Err(Error::Conversion {
            status: status.code(),
            message: E::strerror(status),
        })
    } else {
        Err(Error::UnknownStatus(status.code()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NativeEngine;

    #[test]
    fn test_check_no_error() {
        assert!(check::<NativeEngine>(Status::NO_ERROR).is_ok());
    }

    #[test]
    fn test_check_recognized_range() {
        for code in 1..=23 {
            match check::<NativeEngine>(Status(code)) {
                Err(Error::Conversion { status, message }) => {
                    assert_eq!(status, code);
                    assert!(!message.is_empty());
                }
                other => panic!("unexpected result for {code}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_check_unknown_codes() {
        for code in [-1, 24, 100, i32::MAX] {
            assert!(matches!(
                check::<NativeEngine>(Status(code)),
                Err(Error::UnknownStatus(c)) if c == code
            ));
        }
    }

    #[test]
    fn test_error_display() {
        let err = Error::Usage("bad shape".into());
        assert_eq!(err.to_string(), "usage error: bad shape");

        let err = Error::InternalInvariant {
            generated: 11,
            capacity: 10,
        };
        assert!(err.to_string().contains("11"));

        let err = check::<NativeEngine>(Status::BAD_SRC_RATIO).unwrap_err();
        assert_eq!(err.status(), Some(6));
        assert!(err.to_string().contains("ratio"));
    }
}
