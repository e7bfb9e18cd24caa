//! In-memory room registry.
//!
//! Rooms own their seated players (insertion order is seat and turn order) and
//! the set of connections subscribed to their broadcasts. A room is either in
//! the lobby or running a game; rule operations are only reachable through
//! [`Room::game`], which fails for a lobby room.

use crate::client_manager::ConnectionId;
use crate::error::GameError;
use crate::game::{Game, GameState};
use crate::utils::normalize_label;
use log::info;
use shared::{
    Herd, PlayerId, PlayerSnapshot, RoomId, RoomSnapshot, RoomSummary, MAX_PLAYERS_PER_ROOM,
    MIN_PLAYERS_TO_START,
};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

pub const MAX_ROOM_NAME_CHARS: usize = 32;
/// Rooms a single connection may hold open before anybody sits down in them.
pub const MAX_UNCLAIMED_ROOMS_PER_CONNECTION: usize = 2;

/// A seated player.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub nick: String,
    /// Live connection, if any.
    pub connection: Option<ConnectionId>,
    pub animals: Herd,
    /// Only meaningful in the lobby.
    pub is_ready: bool,
}

impl Player {
    pub fn new(id: PlayerId, nick: String) -> Self {
        Self {
            id,
            nick,
            connection: None,
            animals: Herd::new(),
            is_ready: false,
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            nick: self.nick.clone(),
            connected: self.connection.is_some(),
            animals: self.animals,
            is_ready: self.is_ready,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RoomPhase {
    Lobby,
    Active(Box<GameState>),
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub max_players: usize,
    players: Vec<Player>,
    subscribers: BTreeSet<ConnectionId>,
    phase: RoomPhase,
    creator: Option<ConnectionId>,
    created_at: Instant,
}

impl Room {
    pub fn new(name: String) -> Self {
        Self {
            id: RoomId::new(),
            name,
            max_players: MAX_PLAYERS_PER_ROOM,
            players: Vec::new(),
            subscribers: BTreeSet::new(),
            phase: RoomPhase::Lobby,
            creator: None,
            created_at: Instant::now(),
        }
    }

    /// No player is seated.
    pub fn is_unclaimed(&self) -> bool {
        self.players.is_empty()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|player| player.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|player| player.id == player_id)
    }

    pub fn nick_of(&self, player_id: PlayerId) -> String {
        self.player(player_id)
            .map(|player| player.nick.clone())
            .unwrap_or_default()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn game_started(&self) -> bool {
        matches!(self.phase, RoomPhase::Active(_))
    }

    pub fn game_state(&self) -> Option<&GameState> {
        match &self.phase {
            RoomPhase::Active(state) => Some(state.as_ref()),
            RoomPhase::Lobby => None,
        }
    }

    /// Rule operations for a running game.
    pub fn game(&mut self) -> Result<Game<'_>, GameError> {
        match &mut self.phase {
            RoomPhase::Active(state) => Ok(Game::new(state, &mut self.players)),
            RoomPhase::Lobby => Err(GameError::GameNotStarted),
        }
    }

    pub fn subscribers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.subscribers.iter().copied()
    }

    /// True when enough players are seated and every one of them is ready.
    pub fn all_ready(&self) -> bool {
        self.players.len() >= MIN_PLAYERS_TO_START && self.players.iter().all(|p| p.is_ready)
    }

    /// Moves the room from the lobby into a running game.
    pub fn start_game(&mut self) -> Result<(), GameError> {
        if self.game_started() {
            return Err(GameError::GameAlreadyStarted);
        }
        let state = GameState::initialize(&mut self.players)?;
        info!(
            "Game started in room {} with {} players",
            self.name,
            self.players.len()
        );
        self.phase = RoomPhase::Active(Box::new(state));
        Ok(())
    }

    /// Clears the player's live connection, keeping the seat.
    pub fn detach_connection(&mut self, player_id: PlayerId) -> Option<ConnectionId> {
        self.player_mut(player_id)
            .and_then(|player| player.connection.take())
    }

    /// Unseats a player. A running game falls back to the lobby when fewer
    /// than two players remain; the returned flag reports that.
    fn remove_player(&mut self, player_id: PlayerId) -> Option<(Player, bool)> {
        let seat = self.players.iter().position(|p| p.id == player_id)?;
        let player = self.players.remove(seat);

        let mut game_ended = false;
        if let RoomPhase::Active(state) = &mut self.phase {
            state.forget_player(player_id);
            if self.players.len() < MIN_PLAYERS_TO_START {
                game_ended = true;
            } else if state.current_player_id == player_id {
                // Nobody connected took over; park the turn on the next seat.
                let next = self.players[seat % self.players.len()].id;
                Game::new(state, &mut self.players).hand_turn_to(next);
            }
        }

        if game_ended {
            info!("Game in room {} ended: not enough players", self.name);
            self.phase = RoomPhase::Lobby;
            for remaining in &mut self.players {
                remaining.animals = Herd::new();
                remaining.is_ready = false;
            }
        }

        Some((player, game_ended))
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
            player_count: self.players.len(),
            max_players: self.max_players,
            game_started: self.game_started(),
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            name: self.name.clone(),
            max_players: self.max_players,
            game_started: self.game_started(),
            players: self.players.iter().map(Player::snapshot).collect(),
            game: self.game_state().map(GameState::snapshot),
        }
    }
}

/// Result of unbinding a connection from its room.
#[derive(Debug)]
pub struct Departure {
    pub player: Player,
    pub room_deleted: bool,
    pub game_ended: bool,
}

/// All rooms of the process.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    pub fn room_mut(&mut self, room_id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(&room_id)
    }

    /// Room listing sorted by name.
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self.rooms.values().map(Room::summary).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn create_room(&mut self, name: &str, creator: ConnectionId) -> Result<&Room, GameError> {
        let name = normalize_label(name, MAX_ROOM_NAME_CHARS).ok_or(GameError::InvalidRoomName {
            max: MAX_ROOM_NAME_CHARS,
        })?;
        if self.rooms.values().any(|room| room.name == name) {
            return Err(GameError::DuplicateName(name));
        }
        let unclaimed = self
            .rooms
            .values()
            .filter(|room| room.creator == Some(creator) && room.is_unclaimed())
            .count();
        if unclaimed >= MAX_UNCLAIMED_ROOMS_PER_CONNECTION {
            return Err(GameError::TooManyRooms {
                max: MAX_UNCLAIMED_ROOMS_PER_CONNECTION,
            });
        }

        let mut room = Room::new(name);
        room.creator = Some(creator);
        let room_id = room.id;
        info!("Room created: {} ({})", room.name, room_id);
        Ok(&*self.rooms.entry(room_id).or_insert(room))
    }

    /// Seats a player, or only updates the nick of an existing member.
    pub fn join_room(
        &mut self,
        room_id: RoomId,
        player_id: PlayerId,
        nick: &str,
    ) -> Result<&mut Room, GameError> {
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or(GameError::RoomNotFound)?;

        if let Some(player) = room.player_mut(player_id) {
            player.nick = nick.to_string();
            return Ok(room);
        }
        if room.game_started() {
            return Err(GameError::GameInProgress);
        }
        if room.is_full() {
            return Err(GameError::RoomFull);
        }

        room.players.push(Player::new(player_id, nick.to_string()));
        info!("Player {} ({}) joined room {}", nick, player_id, room.name);
        Ok(room)
    }

    /// Joins the room and attaches the connection to the player. Returns the
    /// connection the player was previously attached to, if it differs.
    pub fn bind_connection(
        &mut self,
        connection: ConnectionId,
        room_id: RoomId,
        player_id: PlayerId,
        nick: &str,
    ) -> Result<Option<ConnectionId>, GameError> {
        let room = self.join_room(room_id, player_id, nick)?;

        let previous = room
            .player_mut(player_id)
            .and_then(|player| player.connection.replace(connection))
            .filter(|&previous| previous != connection);
        if let Some(previous) = previous {
            room.subscribers.remove(&previous);
        }
        room.subscribers.insert(connection);
        Ok(previous)
    }

    /// Removes the player from the room entirely and unsubscribes the
    /// connection. The room is deleted once nobody is seated.
    pub fn unbind_connection(
        &mut self,
        connection: ConnectionId,
        room_id: RoomId,
        player_id: PlayerId,
    ) -> Option<Departure> {
        let room = self.rooms.get_mut(&room_id)?;
        room.subscribers.remove(&connection);
        let (player, game_ended) = room.remove_player(player_id)?;
        info!("Player {} left room {}", player.nick, room.name);

        let room_deleted = room.players.is_empty();
        if room_deleted {
            info!("Room {} is empty, deleting", room.name);
            self.rooms.remove(&room_id);
        }

        Some(Departure {
            player,
            room_deleted,
            game_ended,
        })
    }

    /// Deletes the empty rooms a lost connection created.
    pub fn drop_unclaimed_rooms(&mut self, creator: ConnectionId) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, room| {
            let drop = room.creator == Some(creator) && room.is_unclaimed();
            if drop {
                info!("Room {} was never joined, deleting", room.name);
            }
            !drop
        });
        before - self.rooms.len()
    }

    /// Deletes empty rooms older than `max_age`.
    pub fn sweep_unclaimed_rooms(&mut self, max_age: Duration) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, room| {
            let drop = room.is_unclaimed() && room.created_at.elapsed() >= max_age;
            if drop {
                info!("Room {} stayed empty for {:?}, deleting", room.name, max_age);
            }
            !drop
        });
        before - self.rooms.len()
    }

    /// Toggles the ready flag of a lobby player.
    pub fn set_ready(&mut self, room_id: RoomId, player_id: PlayerId) -> Result<&mut Room, GameError> {
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or(GameError::RoomNotFound)?;
        if room.game_started() {
            return Err(GameError::GameAlreadyStarted);
        }
        let player = room
            .player_mut(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        player.is_ready = !player.is_ready;
        info!(
            "Player {} is now {}",
            player.nick,
            if player.is_ready { "ready" } else { "not ready" }
        );
        Ok(room)
    }
}
