//! Status codes for pending-I/O operations
//!
//! `Pending` is not an error: it is the normal signal that an operation has
//! suspended and will be resumed through a completion channel. The core never
//! retries on its own; every failure is surfaced to the nearest caller
//! continuation, which owns retry and backoff decisions.

use std::fmt;

/// Status code returned by continuation operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Status {
    /// Operation completed successfully
    #[default]
    Ok = 0,
    /// Operation suspended; a continuation will be delivered later
    Pending = 1,
    /// Key or entry was not found
    NotFound = 2,
    /// Deep-copy allocation failed; the suspended caller chain is failed as a whole
    OutOfMemory = 3,
    /// Backend-reported device or transport failure, propagated unchanged
    IoError = 4,
    /// Data read back does not match its expected shape
    Corruption = 5,
    /// The index entry changed between issue and resume; the caller must retry
    Aborted = 6,
}

impl Status {
    /// Check if the status indicates success
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Check if the operation is pending
    #[inline]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }

    /// Check if the key was not found
    #[inline]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Status::NotFound)
    }

    /// Check if the status indicates an error
    #[inline]
    pub const fn is_error(&self) -> bool {
        matches!(
            self,
            Status::OutOfMemory | Status::IoError | Status::Corruption | Status::Aborted
        )
    }

    /// Get the status as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "Ok",
            Status::Pending => "Pending",
            Status::NotFound => "NotFound",
            Status::OutOfMemory => "OutOfMemory",
            Status::IoError => "IoError",
            Status::Corruption => "Corruption",
            Status::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_checks() {
        assert!(Status::Ok.is_ok());
        assert!(!Status::Ok.is_error());

        assert!(Status::Pending.is_pending());
        assert!(!Status::Pending.is_error());

        assert!(Status::NotFound.is_not_found());
        assert!(!Status::NotFound.is_error());

        assert!(Status::OutOfMemory.is_error());
        assert!(Status::IoError.is_error());
        assert!(Status::Corruption.is_error());
        assert!(Status::Aborted.is_error());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", Status::Ok), "Ok");
        assert_eq!(format!("{}", Status::Pending), "Pending");
        assert_eq!(format!("{}", Status::Aborted), "Aborted");
        assert_eq!(format!("{}", Status::OutOfMemory), "OutOfMemory");
    }

    #[test]
    fn test_status_default() {
        assert_eq!(Status::default(), Status::Ok);
    }
}
