// error_code.rs — The stable task error taxonomy.
//
// These strings are the contract with the UI and with operators' scripts:
// they never change spelling. `last_error` carries the free-text detail;
// the code is what a hint or an alert keys on.

use serde::{Deserialize, Serialize};

/// Stable identifier for why a task failed (or trivially succeeded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Target not writable (permission denied, read-only filesystem).
    #[serde(rename = "EACCES")]
    Eacces,
    /// Target path missing on the agent.
    #[serde(rename = "ENOENT")]
    Enoent,
    /// Agent out of disk. Retriable after operator action.
    #[serde(rename = "ENOSPC")]
    Enospc,
    /// Empty or root target path; failed at scheduling, never ran.
    #[serde(rename = "INVALID_TARGET")]
    InvalidTarget,
    /// Transport reset or frame error. Transient.
    #[serde(rename = "PROTO")]
    Proto,
    /// Task wall-clock deadline exceeded.
    #[serde(rename = "DEADLINE")]
    Deadline,
    /// Entire source under ignore; the task succeeded with zero ops.
    #[serde(rename = "IGNORED_BY_RULE")]
    IgnoredByRule,
    /// Node fingerprint not pinned (or mismatched).
    #[serde(rename = "PAIRING_REQUIRED")]
    PairingRequired,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eacces => "EACCES",
            Self::Enoent => "ENOENT",
            Self::Enospc => "ENOSPC",
            Self::InvalidTarget => "INVALID_TARGET",
            Self::Proto => "PROTO",
            Self::Deadline => "DEADLINE",
            Self::IgnoredByRule => "IGNORED_BY_RULE",
            Self::PairingRequired => "PAIRING_REQUIRED",
        }
    }

    /// Whether the scheduler may retry a failure with this code without
    /// operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Proto)
    }

    /// Map an OS errno-style I/O error kind onto the taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::PermissionDenied => Self::Eacces,
            ErrorKind::NotFound => Self::Enoent,
            _ => {
                // ENOSPC has no stable ErrorKind on all toolchains; fall
                // back to the raw OS error number (28 on Linux).
                if err.raw_os_error() == Some(28) {
                    Self::Enospc
                } else {
                    Self::Eacces
                }
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EACCES" | "EPERM" | "EROFS" => Ok(Self::Eacces),
            "ENOENT" => Ok(Self::Enoent),
            "ENOSPC" => Ok(Self::Enospc),
            "INVALID_TARGET" => Ok(Self::InvalidTarget),
            "PROTO" => Ok(Self::Proto),
            "DEADLINE" => Ok(Self::Deadline),
            "IGNORED_BY_RULE" => Ok(Self::IgnoredByRule),
            "PAIRING_REQUIRED" => Ok(Self::PairingRequired),
            _ => Err(()),
        }
    }
}
