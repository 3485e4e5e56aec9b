//! Size ceiling enforced before any byte leaves the gateway.

use super::error::UploadError;

const UNITS: [(&str, u64); 3] = [("GiB", 1 << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)];

/// Format a byte count with binary prefixes.
///
/// A value is reported in a unit once it reaches 0.9 of that unit, so 0.95 GiB reads as
/// `0.95 GiB` rather than `972.80 MiB`. Anything under 0.9 KiB is shown as raw bytes.
pub fn format_bytes(num: u64) -> String {
    UNITS
        .iter()
        .find(|(_, value)| num as f64 >= *value as f64 * 0.9)
        .map(|(unit, value)| format!("{:.2} {}", num as f64 / *value as f64, unit))
        .unwrap_or_else(|| format!("{num} B"))
}

/// Reject `declared` when it is above `ceiling`. Equal is accepted.
pub fn check(declared: u64, ceiling: u64) -> Result<(), UploadError> {
    if declared > ceiling {
        return Err(UploadError::PayloadTooLarge { declared, ceiling });
    }
    Ok(())
}

/// A fixed ceiling, checked once per upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePolicy {
    ceiling: u64,
}

impl SizePolicy {
    pub fn new(ceiling: u64) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn check(&self, declared: u64) -> Result<(), UploadError> {
        check(declared, self.ceiling)
    }
}
