//! Player identities handed out by `RegisterPlayer`.

use crate::error::GameError;
use crate::utils::normalize_label;
use log::info;
use shared::PlayerId;
use std::collections::HashMap;

pub const MAX_NICK_CHARS: usize = 24;

#[derive(Debug, Default)]
pub struct PlayerDirectory {
    nicks: HashMap<PlayerId, String>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh identity for a trimmed, non-empty nickname.
    pub fn register(&mut self, nick: &str) -> Result<(PlayerId, String), GameError> {
        let nick = normalize_label(nick, MAX_NICK_CHARS)
            .ok_or(GameError::InvalidNick { max: MAX_NICK_CHARS })?;
        let player_id = PlayerId::new();
        info!("Registered player {} as {}", nick, player_id);
        self.nicks.insert(player_id, nick.clone());
        Ok((player_id, nick))
    }

    pub fn nick(&self, player_id: PlayerId) -> Option<&str> {
        self.nicks.get(&player_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nicks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nicks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_trims_nick() {
        let mut directory = PlayerDirectory::new();
        let (player_id, nick) = directory.register("  farmer ").unwrap();

        assert_eq!(nick, "farmer");
        assert_eq!(directory.nick(player_id), Some("farmer"));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_register_rejects_bad_nicks() {
        let mut directory = PlayerDirectory::new();
        let too_long = "x".repeat(MAX_NICK_CHARS + 1);

        for nick in ["", "   ", too_long.as_str()] {
            assert_eq!(
                directory.register(nick).unwrap_err(),
                GameError::InvalidNick { max: MAX_NICK_CHARS }
            );
        }
        assert!(directory.is_empty());
    }

    #[test]
    fn test_same_nick_gets_distinct_ids() {
        let mut directory = PlayerDirectory::new();
        let (first, _) = directory.register("ala").unwrap();
        let (second, _) = directory.register("ala").unwrap();
        assert_ne!(first, second);
    }
}
