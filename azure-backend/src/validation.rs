//! Input validation for names that reach the player-state layer.
use azure_db::PlayerName;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player name cannot be empty")]
    PlayerNameEmpty,

    #[error("Player name too long (max 16 characters, got {0})")]
    PlayerNameTooLong(usize),

    #[error("Player name contains invalid characters (only alphanumeric and underscore allowed)")]
    PlayerNameInvalidChars,

    #[error("Home name cannot be empty")]
    HomeNameEmpty,

    #[error("Home name too long (max 16 characters, got {0})")]
    HomeNameTooLong(usize),

    #[error("Home name contains invalid characters (only alphanumeric, underscore and dash allowed)")]
    HomeNameInvalidChars,
}

/// Validates a Minecraft player name and converts it to its inline form
///
/// Rules:
/// - Cannot be empty
/// - Max 16 characters (Minecraft username limit)
/// - Only ASCII alphanumeric characters and underscores
pub fn validate_player_name(name: &str) -> Result<PlayerName, ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::PlayerNameEmpty);
    }

    if name.len() > 16 {
        return Err(ValidationError::PlayerNameTooLong(name.len()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::PlayerNameInvalidChars);
    }

    PlayerName::try_from(name).map_err(|_| ValidationError::PlayerNameTooLong(name.len()))
}

/// Validates a home name
///
/// Rules:
/// - Cannot be empty
/// - Max 16 characters
/// - Only ASCII alphanumeric characters, underscores and dashes
pub fn validate_home_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::HomeNameEmpty);
    }

    if name.len() > 16 {
        return Err(ValidationError::HomeNameTooLong(name.len()));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::HomeNameInvalidChars);
    }

    Ok(())
}
