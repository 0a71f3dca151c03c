//! Volume name validation.

use crate::error::{BtrvolError, BtrvolResult};

/// Maximum length of a volume name (one path component).
pub const MAX_NAME_LENGTH: usize = 255;

/// Validate a volume name.
///
/// A volume's mount point is `home/<name>`, so the name must be exactly one
/// path component:
/// - 1-255 bytes long
/// - No `/` or NUL bytes
/// - Not `.` or `..`
///
/// # Errors
///
/// Returns [`BtrvolError::InvalidName`] if the name cannot be used.
pub fn validate_name(name: &str) -> BtrvolResult<()> {
    let invalid = name.is_empty()
        || name.len() > MAX_NAME_LENGTH
        || name == "."
        || name == ".."
        || name.contains(['/', '\0']);

    if invalid {
        return Err(BtrvolError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
