// ============================
// crates/relay-lib/src/validation.rs
// ============================
//! Inbound payload validation.

use crate::error::RelayError;
use regex::Regex;
use std::sync::LazyLock;

const MIN_ROOM_ID_LENGTH: usize = 1;
const MAX_ROOM_ID_LENGTH: usize = 64;

static ROOM_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Validate a room identifier. Room ids double as storage keys, so the
/// accepted alphabet is restricted to characters safe in file names.
pub fn validate_room_id(room_id: &str) -> Result<&str, RelayError> {
    if room_id.len() < MIN_ROOM_ID_LENGTH {
        return Err(RelayError::InvalidPayload(
            "room id must not be empty".to_string(),
        ));
    }

    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err(RelayError::InvalidPayload(format!(
            "room id must be at most {MAX_ROOM_ID_LENGTH} characters"
        )));
    }

    if !ROOM_ID_REGEX.is_match(room_id) {
        return Err(RelayError::InvalidPayload(
            "room id must contain only alphanumeric characters, hyphens and underscores"
                .to_string(),
        ));
    }

    Ok(room_id)
}

/// Validate message content: non-empty after trimming, bounded length.
/// Returns the trimmed content.
pub fn validate_content(content: &str, max_len: usize) -> Result<&str, RelayError> {
    let trimmed = content.trim();

    if trimmed.is_empty() {
        return Err(RelayError::InvalidPayload(
            "message content must not be empty".to_string(),
        ));
    }

    if trimmed.len() > max_len {
        return Err(RelayError::InvalidPayload(format!(
            "message content must be at most {max_len} bytes"
        )));
    }

    Ok(trimmed)
}
