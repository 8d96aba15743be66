use std::path::{Component, Path};

use crate::TransferError;

/// Validates a file name received from the remote before it is joined onto
/// a local destination directory.
///
/// The name must be a single normal path component. Rejects:
/// - Empty names, `.` and `..`
/// - Any separator (`/` or `\`), so nothing can nest or escape
/// - Absolute paths and Windows prefixes (`C:`, `\\server`)
/// - Embedded NUL bytes
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name.contains('\0') {
        return Err(TransferError::InvalidName(format!(
            "NUL byte not allowed: {name:?}"
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidName(format!(
            "path separator not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) | (Some(Component::CurDir), _) => Err(
            TransferError::InvalidName(format!("relative directory not allowed: {name}")),
        ),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
