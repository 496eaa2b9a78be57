//! Error types for bankboot-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate. Every fatal boot decision reports exactly one of
//! these kinds.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Flash area open, read, write or erase failed
    FlashIo,
    /// Header magic mismatch, key load failure or failed integrity check
    BadImage,
    /// Persisted boot state is unreadable or inconsistent
    BadStatus,
    /// Sector layout exceeds the supported bounds
    Geometry,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlashIo => write!(f, "flash I/O error"),
            Self::BadImage => write!(f, "bad image"),
            Self::BadStatus => write!(f, "bad boot status"),
            Self::Geometry => write!(f, "unsupported flash geometry"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
