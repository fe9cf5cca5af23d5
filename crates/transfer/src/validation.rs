use crate::TransferError;

/// Validates a file name as sent to the server.
///
/// The server stores merged files under this name, so it must be a single
/// path component.
///
/// Rejects:
/// - Empty names
/// - `.` and `..`
/// - Path separators (`/`, `\`)
/// - NUL bytes
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }

    if file_name == "." || file_name == ".." {
        return Err(TransferError::InvalidFileName(format!(
            "reserved name not allowed: {file_name}"
        )));
    }

    if file_name.contains('/') || file_name.contains('\\') {
        return Err(TransferError::InvalidFileName(format!(
            "path separator not allowed: {file_name}"
        )));
    }

    if file_name.contains('\0') {
        return Err(TransferError::InvalidFileName(
            "name contains null bytes".into(),
        ));
    }

    Ok(())
}
