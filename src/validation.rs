//! Account id validation for security and storage compatibility

use std::collections::HashSet;

/// Account id validation errors with helpful messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccountIdError {
    #[error("Account id is too short (minimum {min} characters)")]
    TooShort { min: usize },

    #[error("Account id is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("Account id cannot start or end with whitespace")]
    InvalidWhitespace,

    #[error("Account id contains control characters")]
    ControlCharacters,

    #[error("Account id contains path separators (/ or \\)")]
    PathTraversal,

    #[error("Account id is a reserved system name")]
    Reserved,
}

pub const ACCOUNT_ID_MIN: usize = 2;
pub const ACCOUNT_ID_MAX: usize = 64;

/// Generate safe filename from an account id using percent encoding
pub fn safe_filename(account_id: &str) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    utf8_percent_encode(account_id, NON_ALPHANUMERIC).to_string()
}

fn reserved_names() -> HashSet<&'static str> {
    [
        // Platform-specific reserved names
        "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "lpt1", "lpt2", "lpt3",
        // Protocol and filesystem words
        ".", "..", "admin", "root", "system", "server",
    ]
    .iter()
    .copied()
    .collect()
}

/// Validate an account id used as a storage key.
///
/// Ids are opaque to the core (QQ numbers, emails, handles) so the rules only
/// guard against things that break file-per-account storage or log output.
pub fn validate_account_id(account_id: &str) -> Result<(), AccountIdError> {
    let trimmed = account_id.trim();
    if trimmed != account_id {
        return Err(AccountIdError::InvalidWhitespace);
    }
    let len = account_id.chars().count();
    if len < ACCOUNT_ID_MIN {
        return Err(AccountIdError::TooShort { min: ACCOUNT_ID_MIN });
    }
    if len > ACCOUNT_ID_MAX {
        return Err(AccountIdError::TooLong { max: ACCOUNT_ID_MAX });
    }
    if account_id.chars().any(char::is_control) {
        return Err(AccountIdError::ControlCharacters);
    }
    if account_id.contains('/') || account_id.contains('\\') {
        return Err(AccountIdError::PathTraversal);
    }
    if reserved_names().contains(account_id.to_lowercase().as_str()) {
        return Err(AccountIdError::Reserved);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for id in ["12345678", "alice", "bob@example.com", "special_wheat", "玩家一"] {
            assert_eq!(validate_account_id(id), Ok(()), "{id}");
        }
    }

    #[test]
    fn rejects_bad_ids() {
        assert_eq!(validate_account_id("a"), Err(AccountIdError::TooShort { min: 2 }));
        assert_eq!(validate_account_id(" bob"), Err(AccountIdError::InvalidWhitespace));
        assert_eq!(validate_account_id("../etc"), Err(AccountIdError::PathTraversal));
        assert_eq!(validate_account_id("bo\nb"), Err(AccountIdError::ControlCharacters));
        assert_eq!(validate_account_id("CON"), Err(AccountIdError::Reserved));
        assert!(matches!(
            validate_account_id(&"x".repeat(65)),
            Err(AccountIdError::TooLong { .. })
        ));
    }

    #[test]
    fn safe_filename_encodes_separators() {
        assert_eq!(safe_filename("alice"), "alice");
        assert_eq!(safe_filename("a/b"), "a%2Fb");
        assert_eq!(safe_filename("a.b"), "a%2Eb");
    }
}
