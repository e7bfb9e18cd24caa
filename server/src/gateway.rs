//! Session gateway: turns client intents into room operations and fans the
//! resulting events out to connections.
//!
//! The gateway is transport agnostic. It is fed `(connection, packet)` pairs
//! and returns the packets to deliver, each addressed to one connection. A
//! rejected intent produces exactly one `Error` packet for the sender and no
//! state change.

use crate::client_manager::ConnectionId;
use crate::directory::{PlayerDirectory, MAX_NICK_CHARS};
use crate::error::GameError;
use crate::game::{check_win_condition, TradeResolution};
use crate::registry::{Room, RoomRegistry};
use crate::utils::normalize_label;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ClientPacket, ExchangeRequest, PlayerId, RoomId, ServerPacket, TradeId, TradeItems};
use std::collections::HashMap;
use std::time::Duration;

/// A packet addressed to a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: ConnectionId,
    pub packet: ServerPacket,
}

impl Outgoing {
    pub fn new(to: ConnectionId, packet: ServerPacket) -> Self {
        Self { to, packet }
    }
}

/// The player and room a connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub player_id: PlayerId,
    pub room_id: RoomId,
}

pub struct Gateway<R = StdRng> {
    registry: RoomRegistry,
    directory: PlayerDirectory,
    sessions: HashMap<ConnectionId, Session>,
    rng: R,
}

impl Gateway<StdRng> {
    /// Creates a gateway with dice seeded from `seed`, or from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(rng)
    }
}

impl<R: Rng> Gateway<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            registry: RoomRegistry::new(),
            directory: PlayerDirectory::new(),
            sessions: HashMap::new(),
            rng,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Deletes rooms nobody sat down in within `max_age`.
    pub fn sweep_unclaimed_rooms(&mut self, max_age: Duration) -> usize {
        self.registry.sweep_unclaimed_rooms(max_age)
    }

    pub fn directory(&self) -> &PlayerDirectory {
        &self.directory
    }

    pub fn session(&self, connection: ConnectionId) -> Option<Session> {
        self.sessions.get(&connection).copied()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handles one intent. Transport packets (`Connect`, `Heartbeat`,
    /// `Disconnect`) are the network layer's business and yield nothing here.
    pub fn handle(&mut self, connection: ConnectionId, packet: ClientPacket) -> Vec<Outgoing> {
        match self.dispatch(connection, packet) {
            Ok(outgoing) => outgoing,
            Err(err) => {
                debug!(
                    "Rejected intent from connection {} ({:?}): {}",
                    connection,
                    err.kind(),
                    err
                );
                vec![Outgoing::new(
                    connection,
                    ServerPacket::Error {
                        message: err.to_string(),
                    },
                )]
            }
        }
    }

    fn dispatch(
        &mut self,
        connection: ConnectionId,
        packet: ClientPacket,
    ) -> Result<Vec<Outgoing>, GameError> {
        match packet {
            ClientPacket::Connect { .. } | ClientPacket::Heartbeat | ClientPacket::Disconnect => {
                Ok(Vec::new())
            }
            ClientPacket::RegisterPlayer { nick } => self.register_player(connection, &nick),
            ClientPacket::ListRooms => Ok(vec![Outgoing::new(
                connection,
                ServerPacket::RoomList {
                    rooms: self.registry.summaries(),
                },
            )]),
            ClientPacket::CreateRoom { name } => {
                let room = self.registry.create_room(&name, connection)?.snapshot();
                Ok(vec![Outgoing::new(
                    connection,
                    ServerPacket::RoomCreated { room },
                )])
            }
            ClientPacket::JoinRoom {
                room_id,
                player_id,
                nick,
            } => self.join_room(connection, room_id, player_id, &nick),
            ClientPacket::PlayerReady => self.player_ready(connection),
            ClientPacket::RollDice => self.roll_dice(connection),
            ClientPacket::ExchangeWithBank { exchange } => {
                self.exchange_with_bank(connection, exchange)
            }
            ClientPacket::ProposeTradeToPlayer {
                target_player_id,
                offered_items,
                requested_items,
            } => self.propose_trade(connection, target_player_id, &offered_items, &requested_items),
            ClientPacket::RespondToTradeOffer { trade_id, accepted } => {
                self.respond_to_trade(connection, trade_id, accepted)
            }
        }
    }

    fn bound(&self, connection: ConnectionId) -> Result<Session, GameError> {
        self.session(connection).ok_or(GameError::NotInRoom)
    }

    fn bound_room(&mut self, connection: ConnectionId) -> Result<(Session, &mut Room), GameError> {
        let session = self.bound(connection)?;
        let room = self
            .registry
            .room_mut(session.room_id)
            .ok_or(GameError::RoomNotFound)?;
        Ok((session, room))
    }

    fn register_player(
        &mut self,
        connection: ConnectionId,
        nick: &str,
    ) -> Result<Vec<Outgoing>, GameError> {
        let (player_id, nick) = self.directory.register(nick)?;
        Ok(vec![Outgoing::new(
            connection,
            ServerPacket::PlayerRegistered { player_id, nick },
        )])
    }

    fn join_room(
        &mut self,
        connection: ConnectionId,
        room_id: RoomId,
        player_id: PlayerId,
        nick: &str,
    ) -> Result<Vec<Outgoing>, GameError> {
        let registered = self
            .directory
            .nick(player_id)
            .ok_or(GameError::PlayerNotFound)?;
        let nick = if nick.trim().is_empty() {
            registered.to_string()
        } else {
            normalize_label(nick, MAX_NICK_CHARS)
                .ok_or(GameError::InvalidNick { max: MAX_NICK_CHARS })?
        };

        let session = Session { player_id, room_id };
        if let Some(existing) = self.session(connection) {
            if existing != session {
                return Err(GameError::AlreadyInRoom);
            }
        }

        let replaced = self
            .registry
            .bind_connection(connection, room_id, player_id, &nick)?;
        if let Some(replaced) = replaced {
            info!(
                "Connection {} takes over {} from connection {}",
                connection, nick, replaced
            );
            self.sessions.remove(&replaced);
        }
        self.sessions.insert(connection, session);

        let room = self
            .registry
            .room(room_id)
            .ok_or(GameError::RoomNotFound)?;
        let snapshot = room.snapshot();
        let mut outgoing = vec![Outgoing::new(
            connection,
            ServerPacket::JoinedRoom {
                room: snapshot.clone(),
            },
        )];
        broadcast(room, ServerPacket::RoomUpdate { room: snapshot }, &mut outgoing);
        Ok(outgoing)
    }

    fn player_ready(&mut self, connection: ConnectionId) -> Result<Vec<Outgoing>, GameError> {
        let session = self.bound(connection)?;
        let room = self.registry.set_ready(session.room_id, session.player_id)?;

        let mut outgoing = Vec::new();
        broadcast(
            room,
            ServerPacket::RoomUpdate {
                room: room.snapshot(),
            },
            &mut outgoing,
        );

        if room.all_ready() {
            room.start_game()?;
            let snapshot = room.snapshot();
            broadcast(
                room,
                ServerPacket::GameStarting {
                    room: snapshot.clone(),
                },
                &mut outgoing,
            );
            if let Some(state) = room.game_state() {
                let first = state.current_player_id;
                broadcast(
                    room,
                    ServerPacket::TurnChange {
                        next_player_id: first,
                        next_player_nick: room.nick_of(first),
                        room: snapshot,
                    },
                    &mut outgoing,
                );
            }
        }
        Ok(outgoing)
    }

    fn roll_dice(&mut self, connection: ConnectionId) -> Result<Vec<Outgoing>, GameError> {
        let session = self.bound(connection)?;
        let room = self
            .registry
            .room_mut(session.room_id)
            .ok_or(GameError::RoomNotFound)?;
        let player_id = session.player_id;

        let mut game = room.game()?;
        let outcome = game.roll_dice(player_id, &mut self.rng)?;
        let won = check_win_condition(&outcome.after);
        let next = if won {
            game.finish(player_id);
            None
        } else {
            game.advance_turn(player_id, false)
        };

        let snapshot = room.snapshot();
        let nick = room.nick_of(player_id);
        let mut outgoing = Vec::new();
        broadcast(
            room,
            ServerPacket::DiceRollResult {
                player_id,
                nick: nick.clone(),
                dice_result: outcome.dice_result,
                log: outcome.log,
                before: outcome.before,
                after: outcome.after,
                updated_room: snapshot.clone(),
            },
            &mut outgoing,
        );

        if won {
            broadcast(
                room,
                ServerPacket::GameOver {
                    winner_id: player_id,
                    winner_nick: nick,
                    room: snapshot,
                },
                &mut outgoing,
            );
        } else if let Some(next) = next {
            broadcast(
                room,
                ServerPacket::TurnChange {
                    next_player_id: next,
                    next_player_nick: room.nick_of(next),
                    room: snapshot,
                },
                &mut outgoing,
            );
        }
        Ok(outgoing)
    }

    fn exchange_with_bank(
        &mut self,
        connection: ConnectionId,
        exchange: ExchangeRequest,
    ) -> Result<Vec<Outgoing>, GameError> {
        let (session, room) = self.bound_room(connection)?;
        let player_id = session.player_id;

        let outcome = room.game()?.exchange_with_bank(
            player_id,
            exchange.from_animal,
            exchange.from_amount,
            exchange.to_animal,
        )?;

        let snapshot = room.snapshot();
        let mut outgoing = Vec::new();
        broadcast(
            room,
            ServerPacket::BankExchangeResult {
                player_id,
                nick: room.nick_of(player_id),
                success: true,
                log: outcome.log,
                before: outcome.before,
                after: outcome.after,
                updated_room: snapshot.clone(),
            },
            &mut outgoing,
        );
        // An exchange does not end the turn.
        broadcast(
            room,
            ServerPacket::TurnChange {
                next_player_id: player_id,
                next_player_nick: room.nick_of(player_id),
                room: snapshot,
            },
            &mut outgoing,
        );
        Ok(outgoing)
    }

    fn propose_trade(
        &mut self,
        connection: ConnectionId,
        target_player_id: PlayerId,
        offered_items: &TradeItems,
        requested_items: &TradeItems,
    ) -> Result<Vec<Outgoing>, GameError> {
        let (session, room) = self.bound_room(connection)?;

        let offer = room.game()?.propose_trade(
            session.player_id,
            target_player_id,
            offered_items,
            requested_items,
        )?;
        let target_connection = room
            .player(target_player_id)
            .and_then(|target| target.connection)
            .ok_or(GameError::TargetUnavailable)?;

        let mut outgoing = vec![
            Outgoing::new(
                target_connection,
                ServerPacket::TradeOfferReceived {
                    trade_id: offer.trade_id,
                    from_player_id: offer.proposing_player_id,
                    from_player_nick: offer.proposing_player_nick.clone(),
                    offered_items: offer.offered_items,
                    requested_items: offer.requested_items,
                },
            ),
            Outgoing::new(
                connection,
                ServerPacket::TradeProposalSent {
                    trade_id: offer.trade_id,
                },
            ),
        ];
        broadcast(
            room,
            ServerPacket::RoomUpdate {
                room: room.snapshot(),
            },
            &mut outgoing,
        );
        Ok(outgoing)
    }

    fn respond_to_trade(
        &mut self,
        connection: ConnectionId,
        trade_id: TradeId,
        accepted: bool,
    ) -> Result<Vec<Outgoing>, GameError> {
        let (session, room) = self.bound_room(connection)?;
        let responder = session.player_id;

        let resolution = room.game()?.respond_to_trade(responder, trade_id, accepted)?;

        let mut outgoing = Vec::new();
        match resolution {
            TradeResolution::Completed(offer) | TradeResolution::Rejected(offer) => {
                if let Some(proposer) = connection_of(room, offer.proposing_player_id) {
                    outgoing.push(Outgoing::new(
                        proposer,
                        ServerPacket::TradeOfferResponse {
                            trade_id,
                            responding_player_id: responder,
                            responding_player_nick: offer.target_player_nick.clone(),
                            accepted,
                            offer,
                        },
                    ));
                }
                outgoing.push(Outgoing::new(
                    connection,
                    ServerPacket::TradeFinalized { trade_id, accepted },
                ));
                let room_snapshot = room.snapshot();
                let packet = if accepted {
                    ServerPacket::TradeCompleted {
                        room: room_snapshot,
                    }
                } else {
                    ServerPacket::RoomUpdate {
                        room: room_snapshot,
                    }
                };
                broadcast(room, packet, &mut outgoing);
            }
            TradeResolution::Cancelled {
                offer,
                proposer_reason,
                target_reason,
            } => {
                if let Some(proposer) = connection_of(room, offer.proposing_player_id) {
                    outgoing.push(Outgoing::new(
                        proposer,
                        ServerPacket::TradeOfferCancelled {
                            trade_id,
                            reason: proposer_reason,
                        },
                    ));
                }
                outgoing.push(Outgoing::new(
                    connection,
                    ServerPacket::TradeOfferCancelled {
                        trade_id,
                        reason: target_reason,
                    },
                ));
                broadcast(
                    room,
                    ServerPacket::RoomUpdate {
                        room: room.snapshot(),
                    },
                    &mut outgoing,
                );
            }
        }
        Ok(outgoing)
    }

    /// Connection loss: the player leaves the room for good, their trades are
    /// cancelled and a held turn moves on.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Vec<Outgoing> {
        self.registry.drop_unclaimed_rooms(connection);
        let Some(session) = self.sessions.remove(&connection) else {
            return Vec::new();
        };
        let Session { player_id, room_id } = session;

        let mut cancelled = Vec::new();
        let mut next_turn = None;
        if let Some(room) = self.registry.room_mut(room_id) {
            if room.player(player_id).and_then(|p| p.connection) != Some(connection) {
                return Vec::new();
            }
            room.detach_connection(player_id);
            if let Ok(mut game) = room.game() {
                cancelled = game.cancel_trades_involving(player_id);
                if game.current_player_id() == player_id && !game.state().is_over() {
                    next_turn = game.advance_turn(player_id, true);
                }
            }
        }

        let Some(departure) = self
            .registry
            .unbind_connection(connection, room_id, player_id)
        else {
            return Vec::new();
        };
        let nick = departure.player.nick;
        let Some(room) = self.registry.room(room_id) else {
            return Vec::new();
        };

        let mut outgoing = Vec::new();
        let snapshot = room.snapshot();
        broadcast(
            room,
            ServerPacket::PlayerLeft {
                player_id,
                nick: nick.clone(),
                room: snapshot.clone(),
            },
            &mut outgoing,
        );
        broadcast(
            room,
            ServerPacket::RoomUpdate {
                room: snapshot.clone(),
            },
            &mut outgoing,
        );

        for trade in cancelled {
            let counterpart = trade.counterpart(player_id);
            if let Some(to) = connection_of(room, counterpart) {
                outgoing.push(Outgoing::new(
                    to,
                    ServerPacket::TradeOfferCancelled {
                        trade_id: trade.trade_id,
                        reason: format!("{} disconnected.", nick),
                    },
                ));
            }
        }

        if departure.game_ended {
            broadcast(
                room,
                ServerPacket::GameEndedNotEnoughPlayers { room: snapshot },
                &mut outgoing,
            );
        } else if let Some(next) = next_turn {
            broadcast(
                room,
                ServerPacket::TurnChange {
                    next_player_id: next,
                    next_player_nick: room.nick_of(next),
                    room: snapshot,
                },
                &mut outgoing,
            );
        }
        outgoing
    }
}

fn broadcast(room: &Room, packet: ServerPacket, outgoing: &mut Vec<Outgoing>) {
    outgoing.extend(
        room.subscribers()
            .map(|to| Outgoing::new(to, packet.clone())),
    );
}

fn connection_of(room: &Room, player_id: PlayerId) -> Option<ConnectionId> {
    room.player(player_id).and_then(|player| player.connection)
}
