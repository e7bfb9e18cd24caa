//! Wire protocol between farm clients and the server.
//!
//! Each UDP datagram carries exactly one bincode-encoded packet. Clients send
//! [`ClientPacket`]s, the server answers with [`ServerPacket`]s.

use crate::{Animal, DiceResult, Herd, PlayerId, RoomId, TradeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Animal bundle as sent by a client. Quantities are signed so that bad input
/// reaches the server and is rejected there instead of failing to decode.
pub type TradeItems = BTreeMap<Animal, i64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub from_animal: Animal,
    pub from_amount: i64,
    pub to_animal: Animal,
}

/// Intents sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientPacket {
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Disconnect,

    RegisterPlayer {
        nick: String,
    },
    ListRooms,
    CreateRoom {
        name: String,
    },
    JoinRoom {
        room_id: RoomId,
        player_id: PlayerId,
        nick: String,
    },
    PlayerReady,
    RollDice,
    ExchangeWithBank {
        exchange: ExchangeRequest,
    },
    ProposeTradeToPlayer {
        target_player_id: PlayerId,
        offered_items: TradeItems,
        requested_items: TradeItems,
    },
    RespondToTradeOffer {
        trade_id: TradeId,
        accepted: bool,
    },
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerPacket {
    Connected {
        client_id: u32,
    },
    Disconnected {
        reason: String,
    },
    Error {
        message: String,
    },

    PlayerRegistered {
        player_id: PlayerId,
        nick: String,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    RoomCreated {
        room: RoomSnapshot,
    },
    JoinedRoom {
        room: RoomSnapshot,
    },
    RoomUpdate {
        room: RoomSnapshot,
    },
    PlayerLeft {
        player_id: PlayerId,
        nick: String,
        room: RoomSnapshot,
    },

    GameStarting {
        room: RoomSnapshot,
    },
    TurnChange {
        next_player_id: PlayerId,
        next_player_nick: String,
        room: RoomSnapshot,
    },
    DiceRollResult {
        player_id: PlayerId,
        nick: String,
        dice_result: DiceResult,
        log: Vec<String>,
        before: Herd,
        after: Herd,
        updated_room: RoomSnapshot,
    },
    GameOver {
        winner_id: PlayerId,
        winner_nick: String,
        room: RoomSnapshot,
    },
    GameEndedNotEnoughPlayers {
        room: RoomSnapshot,
    },
    BankExchangeResult {
        player_id: PlayerId,
        nick: String,
        success: bool,
        log: String,
        before: Herd,
        after: Herd,
        updated_room: RoomSnapshot,
    },

    TradeOfferReceived {
        trade_id: TradeId,
        from_player_id: PlayerId,
        from_player_nick: String,
        offered_items: Herd,
        requested_items: Herd,
    },
    TradeProposalSent {
        trade_id: TradeId,
    },
    TradeOfferResponse {
        trade_id: TradeId,
        responding_player_id: PlayerId,
        responding_player_nick: String,
        accepted: bool,
        offer: TradeOffer,
    },
    TradeFinalized {
        trade_id: TradeId,
        accepted: bool,
    },
    TradeCompleted {
        room: RoomSnapshot,
    },
    TradeOfferCancelled {
        trade_id: TradeId,
        reason: String,
    },
}

/// Per-player action flags, reset whenever the turn passes to that player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub has_rolled: bool,
    pub has_exchanged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    PendingTargetResponse,
}

/// A direct player-to-player trade proposal awaiting the target's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    pub trade_id: TradeId,
    pub proposing_player_id: PlayerId,
    pub proposing_player_nick: String,
    pub target_player_id: PlayerId,
    pub target_player_nick: String,
    pub offered_items: Herd,
    pub requested_items: Herd,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub status: TradeStatus,
}

impl TradeOffer {
    pub fn involves(&self, player_id: PlayerId) -> bool {
        self.proposing_player_id == player_id || self.target_player_id == player_id
    }

    /// The other party of the trade, seen from `player_id`.
    pub fn counterpart(&self, player_id: PlayerId) -> PlayerId {
        if self.proposing_player_id == player_id {
            self.target_player_id
        } else {
            self.proposing_player_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub game_started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub nick: String,
    pub connected: bool,
    pub animals: Herd,
    pub is_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub main_herd: Herd,
    pub current_player_id: PlayerId,
    pub dice_result: Option<DiceResult>,
    pub log: Vec<String>,
    pub player_turn_state: BTreeMap<PlayerId, TurnState>,
    pub pending_trades: Vec<TradeOffer>,
    pub winner: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub max_players: usize,
    pub game_started: bool,
    pub players: Vec<PlayerSnapshot>,
    pub game: Option<GameSnapshot>,
}

impl RoomSnapshot {
    pub fn player(&self, player_id: PlayerId) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|player| player.id == player_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Face;
    use bincode::{deserialize, serialize};

    fn sample_room() -> RoomSnapshot {
        let player_id = PlayerId::new();
        let mut player_turn_state = BTreeMap::new();
        player_turn_state.insert(player_id, TurnState::default());

        RoomSnapshot {
            id: RoomId::new(),
            name: "Barn".to_string(),
            max_players: 4,
            game_started: true,
            players: vec![PlayerSnapshot {
                id: player_id,
                nick: "ala".to_string(),
                connected: true,
                animals: Herd::new().with(Animal::Rabbit, 1),
                is_ready: true,
            }],
            game: Some(GameSnapshot {
                main_herd: crate::initial_main_herd(),
                current_player_id: player_id,
                dice_result: Some(DiceResult::new(Face::Rabbit, Face::Fox)),
                log: vec!["ala rolled rabbit and fox.".to_string()],
                player_turn_state,
                pending_trades: Vec::new(),
                winner: None,
            }),
        }
    }

    #[test]
    fn test_packet_serialization_propose_trade() {
        let mut offered_items = TradeItems::new();
        offered_items.insert(Animal::Sheep, 2);
        let mut requested_items = TradeItems::new();
        requested_items.insert(Animal::Cow, -1);

        let packet = ClientPacket::ProposeTradeToPlayer {
            target_player_id: PlayerId::new(),
            offered_items,
            requested_items,
        };

        let serialized = serialize(&packet).unwrap();
        let deserialized: ClientPacket = deserialize(&serialized).unwrap();

        match deserialized {
            ClientPacket::ProposeTradeToPlayer {
                offered_items,
                requested_items,
                ..
            } => {
                assert_eq!(offered_items.get(&Animal::Sheep), Some(&2));
                assert_eq!(requested_items.get(&Animal::Cow), Some(&-1));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_room_snapshot_fits_in_a_datagram() {
        let mut room = sample_room();
        if let Some(game) = room.game.as_mut() {
            game.log = (0..crate::LOG_WINDOW)
                .map(|i| format!("log line number {} with some padding text", i))
                .collect();
        }

        let packet = ServerPacket::RoomUpdate { room };
        let serialized = serialize(&packet).unwrap();
        assert!(serialized.len() < 60_000);
    }

    #[test]
    fn test_trade_offer_counterpart() {
        let proposer = PlayerId::new();
        let target = PlayerId::new();
        let offer = TradeOffer {
            trade_id: TradeId::new(),
            proposing_player_id: proposer,
            proposing_player_nick: "a".to_string(),
            target_player_id: target,
            target_player_nick: "b".to_string(),
            offered_items: Herd::new(),
            requested_items: Herd::new(),
            timestamp: 0,
            status: TradeStatus::PendingTargetResponse,
        };

        assert!(offer.involves(proposer));
        assert!(offer.involves(target));
        assert!(!offer.involves(PlayerId::new()));
        assert_eq!(offer.counterpart(proposer), target);
        assert_eq!(offer.counterpart(target), proposer);
    }
}
