//! Name checks applied before any path is built from user input.

use crate::errors::RepositoryError;

/// Suffix carried by every hosted bare repository directory.
pub const REPOSITORY_SUFFIX: &str = ".git";

/// Validate a single path segment (org name, repository name, clone destination).
///
/// Segments may not contain whitespace, separators or NUL and may not be `.`/`..`,
/// so a joined path always stays below its root.
pub fn validate_segment(kind: &str, value: &str) -> Result<(), RepositoryError> {
    if value.is_empty() {
        return Err(RepositoryError::validation(format!("{kind} must not be empty")));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(RepositoryError::validation(format!(
            "{kind} must not contain spaces: {value:?}"
        )));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(RepositoryError::validation(format!(
            "{kind} is not a valid path segment: {value:?}"
        )));
    }
    Ok(())
}

/// Strip the repository suffix from a name taken from a request path.
pub fn strip_repository_suffix(repository_name: &str) -> Result<&str, RepositoryError> {
    repository_name
        .strip_suffix(REPOSITORY_SUFFIX)
        .ok_or_else(|| {
            RepositoryError::validation(format!("invalid repository name {repository_name}"))
        })
}
