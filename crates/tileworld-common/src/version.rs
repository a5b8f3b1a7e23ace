//! Save-file format versioning.
//!
//! Every world writes its format version into its metadata. A build refuses
//! to open a world whose major version differs from its own; minor bumps
//! only add fields that deserialize with defaults.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TileworldError, TileworldResult};

/// Format version stamped into world metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatVersion {
    /// Incompatible layout changes
    pub major: u16,
    /// Additive changes
    pub minor: u16,
}

impl FormatVersion {
    /// Format written by this build.
    pub const CURRENT: Self = Self::new(1, 0);

    /// Creates a format version.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// True if files written at `found` can be loaded by a build at `self`.
    #[must_use]
    pub const fn reads(&self, found: &Self) -> bool {
        self.major == found.major
    }

    /// Fails with [`TileworldError::VersionMismatch`] unless `found` is readable.
    pub fn check(&self, found: &Self) -> TileworldResult<()> {
        if self.reads(found) {
            Ok(())
        } else {
            Err(TileworldError::VersionMismatch {
                expected: self.to_string(),
                actual: found.to_string(),
            })
        }
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}
