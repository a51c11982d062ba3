//! Error classification shared by every OpsGrid crate.

use std::fmt;

/// Coarse classification of a failure, independent of which layer raised it.
///
/// Each crate's error type maps itself onto one of these via `kind()`.
/// Wrapping variants delegate to the wrapped error so the classification of
/// the original cause reaches the caller intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced deployment, network, domain, account or subscription is absent.
    NotFound,
    /// Duplicate creation of a uniquely keyed record.
    AlreadyExists,
    /// Immutable field mismatch or malformed configuration.
    Conflict,
    /// A bounded poll ran out of attempts.
    Timeout,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}
