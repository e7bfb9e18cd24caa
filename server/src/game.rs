//! Authoritative game rules for one room.
//!
//! [`GameState`] is the per-room state that exists only once a game has
//! started. All rule operations go through [`Game`], a borrowed view pairing
//! that state with the room's seated players, which can only be obtained from
//! a room in the active phase.
//!
//! Every operation validates fully before touching state, so an `Err` means
//! nothing changed.

use crate::error::GameError;
use crate::registry::Player;
use crate::utils::get_timestamp;
use log::info;
use rand::Rng;
use shared::{
    find_exchange_rule, initial_main_herd, Animal, DiceResult, Face, GameSnapshot, Herd, PlayerId,
    TradeId, TradeItems, TradeOffer, TradeStatus, TurnState, DIE_A, DIE_B, LOG_WINDOW,
    MAX_PENDING_TRADES, MIN_PLAYERS_TO_START, WINNING_SET, WOLF_PREY,
};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct GameState {
    pub main_herd: Herd,
    pub current_player_id: PlayerId,
    pub dice_result: Option<DiceResult>,
    log: VecDeque<String>,
    pub player_turn_state: BTreeMap<PlayerId, TurnState>,
    pub pending_trades: HashMap<TradeId, TradeOffer>,
    pub winner: Option<PlayerId>,
}

impl GameState {
    /// Starts a game for the seated players: fresh bank, seat order as turn
    /// order, and one rabbit from the bank for each player while stock lasts.
    pub fn initialize(players: &mut [Player]) -> Result<Self, GameError> {
        if players.len() < MIN_PLAYERS_TO_START {
            return Err(GameError::NotEnoughPlayers);
        }

        let mut main_herd = initial_main_herd();
        let mut player_turn_state = BTreeMap::new();
        for player in players.iter_mut() {
            player.animals = Herd::new();
            player.animals.add(Animal::Rabbit, main_herd.take(Animal::Rabbit, 1));
            player_turn_state.insert(player.id, TurnState::default());
        }

        let first = &players[0];
        let mut state = Self {
            main_herd,
            current_player_id: first.id,
            dice_result: None,
            log: VecDeque::new(),
            player_turn_state,
            pending_trades: HashMap::new(),
            winner: None,
        };
        state.push_log(format!("The game begins. {} goes first.", first.nick));
        Ok(state)
    }

    pub fn log(&self) -> impl Iterator<Item = &String> {
        self.log.iter()
    }

    pub fn push_log(&mut self, line: String) {
        self.log.push_back(line);
        while self.log.len() > LOG_WINDOW {
            self.log.pop_front();
        }
    }

    pub fn turn_state(&self, player_id: PlayerId) -> TurnState {
        self.player_turn_state
            .get(&player_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    /// Drops a departing player's bookkeeping.
    pub fn forget_player(&mut self, player_id: PlayerId) {
        self.player_turn_state.remove(&player_id);
        self.pending_trades
            .retain(|_, trade| !trade.involves(player_id));
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let mut pending_trades: Vec<TradeOffer> = self.pending_trades.values().cloned().collect();
        pending_trades.sort_by_key(|trade| (trade.timestamp, trade.trade_id));

        GameSnapshot {
            main_herd: self.main_herd,
            current_player_id: self.current_player_id,
            dice_result: self.dice_result,
            log: self.log.iter().cloned().collect(),
            player_turn_state: self.player_turn_state.clone(),
            pending_trades,
            winner: self.winner,
        }
    }
}

/// True iff the herd holds at least one of every animal in the winning set.
pub fn check_win_condition(animals: &Herd) -> bool {
    WINNING_SET.iter().all(|&animal| animals[animal] >= 1)
}

/// Throws both dice.
pub fn roll_faces<R: Rng + ?Sized>(rng: &mut R) -> DiceResult {
    DiceResult::new(
        DIE_A[rng.gen_range(0..DIE_A.len())],
        DIE_B[rng.gen_range(0..DIE_B.len())],
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollOutcome {
    pub dice_result: DiceResult,
    pub log: Vec<String>,
    pub before: Herd,
    pub after: Herd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub log: String,
    pub before: Herd,
    pub after: Herd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeResolution {
    Completed(TradeOffer),
    Rejected(TradeOffer),
    /// Accepted, but one side no longer had the animals at response time.
    Cancelled {
        offer: TradeOffer,
        proposer_reason: String,
        target_reason: String,
    },
}

/// Rule operations on a started game.
#[derive(Debug)]
pub struct Game<'a> {
    state: &'a mut GameState,
    players: &'a mut [Player],
}

impl<'a> Game<'a> {
    pub fn new(state: &'a mut GameState, players: &'a mut [Player]) -> Self {
        Self { state, players }
    }

    pub fn state(&self) -> &GameState {
        self.state
    }

    pub fn current_player_id(&self) -> PlayerId {
        self.state.current_player_id
    }

    fn seat(&self, player_id: PlayerId) -> Result<usize, GameError> {
        self.players
            .iter()
            .position(|player| player.id == player_id)
            .ok_or(GameError::PlayerNotFound)
    }

    fn ensure_turn(&self, player_id: PlayerId) -> Result<usize, GameError> {
        if self.state.is_over() {
            return Err(GameError::GameOver);
        }
        if self.state.current_player_id != player_id {
            return Err(GameError::NotPlayersTurn);
        }
        self.seat(player_id)
    }

    /// Rolls both dice for the current player and applies the result.
    pub fn roll_dice<R: Rng + ?Sized>(
        &mut self,
        player_id: PlayerId,
        rng: &mut R,
    ) -> Result<RollOutcome, GameError> {
        self.ensure_turn(player_id)?;
        let faces = roll_faces(rng);
        self.resolve_roll(player_id, faces)
    }

    /// Applies a known dice result: predators first, then breeding.
    pub fn resolve_roll(
        &mut self,
        player_id: PlayerId,
        dice_result: DiceResult,
    ) -> Result<RollOutcome, GameError> {
        let seat = self.ensure_turn(player_id)?;
        if self.state.turn_state(player_id).has_rolled {
            return Err(GameError::AlreadyRolled);
        }

        let nick = self.players[seat].nick.clone();
        let before = self.players[seat].animals;
        let mut herd = before;
        let mut bank = self.state.main_herd;
        let mut log = vec![format!(
            "{} rolled {} and {}.",
            nick, dice_result.die_a, dice_result.die_b
        )];

        let fox = dice_result.shows(Face::Fox);
        let wolf = dice_result.shows(Face::Wolf);
        let mut small_dog_used = false;
        let mut big_dog_used = false;

        if fox {
            if herd[Animal::SmallDog] > 0 {
                bank.add(Animal::SmallDog, herd.take(Animal::SmallDog, 1));
                small_dog_used = true;
                log.push(format!(
                    "{} uses a small dog to chase off the fox! The dog returns to the herd.",
                    nick
                ));
            } else {
                let lost = herd[Animal::Rabbit].saturating_sub(1);
                if lost > 0 {
                    bank.add(Animal::Rabbit, herd.take(Animal::Rabbit, lost));
                    log.push(format!(
                        "The fox attacks! {} loses {} rabbit, 1 rabbit is left.",
                        nick, lost
                    ));
                } else if herd[Animal::Rabbit] == 1 {
                    log.push(format!(
                        "The fox attacks, but {} has only 1 rabbit and it stays safe.",
                        nick
                    ));
                } else {
                    log.push(format!(
                        "The fox attacks, but {} has no rabbits to lose.",
                        nick
                    ));
                }
            }
        }

        if wolf {
            if herd[Animal::BigDog] > 0 {
                bank.add(Animal::BigDog, herd.take(Animal::BigDog, 1));
                big_dog_used = true;
                log.push(format!(
                    "{} uses a big dog to chase off the wolf! The dog returns to the herd.",
                    nick
                ));
            } else {
                let mut lost = Herd::new();
                for animal in WOLF_PREY {
                    let count = herd[animal];
                    lost.add(animal, herd.take(animal, count));
                }
                bank.add_all(&lost);
                if lost.is_empty() {
                    log.push(format!(
                        "The wolf attacks, but {} has nothing it can take.",
                        nick
                    ));
                } else {
                    log.push(format!("The wolf attacks! {} loses {}.", nick, lost));
                }
            }
        }

        let mut gained = Herd::new();
        for animal in dice_result.bred_animals() {
            let fox_blocked = animal == Animal::Rabbit && fox && !small_dog_used;
            let wolf_blocked = WOLF_PREY.contains(&animal) && wolf && !big_dog_used;
            if fox_blocked || wolf_blocked {
                continue;
            }

            if matches!(animal, Animal::Horse | Animal::Cow) && herd[animal] == 0 {
                log.push(format!(
                    "{} cannot get a {} from the dice without owning one. The first must come from trading.",
                    nick, animal
                ));
                continue;
            }

            let pairs = (herd[animal] + dice_result.count(animal)) / 2;
            if pairs == 0 {
                continue;
            }
            let gain = bank.take(animal, pairs);
            if gain > 0 {
                herd.add(animal, gain);
                gained.add(animal, gain);
            } else {
                log.push(format!("Unfortunately the herd has run out of {}.", animal));
            }
        }

        if !gained.is_empty() {
            log.push(format!("{} receives {}.", nick, gained));
        } else if !fox && !wolf {
            log.push(format!("{} did not breed any animals this turn.", nick));
        }

        self.players[seat].animals = herd;
        self.state.main_herd = bank;
        self.state.dice_result = Some(dice_result);
        self.state
            .player_turn_state
            .entry(player_id)
            .or_default()
            .has_rolled = true;
        for line in &log {
            self.state.push_log(line.clone());
        }

        info!("{} rolled {:?}: {} -> {}", nick, dice_result, before, herd);

        Ok(RollOutcome {
            dice_result,
            log,
            before,
            after: herd,
        })
    }

    /// Trades animals with the bank along one edge of the exchange graph.
    pub fn exchange_with_bank(
        &mut self,
        player_id: PlayerId,
        from_animal: Animal,
        from_amount: i64,
        to_animal: Animal,
    ) -> Result<ExchangeOutcome, GameError> {
        let seat = self.ensure_turn(player_id)?;
        let turn = self.state.turn_state(player_id);
        if turn.has_exchanged || turn.has_rolled {
            return Err(GameError::AlreadyActedThisTurn);
        }
        if from_amount <= 0 {
            return Err(GameError::InvalidAmount);
        }
        let from_amount = u32::try_from(from_amount).map_err(|_| GameError::InvalidAmount)?;

        let rule = find_exchange_rule(from_animal, to_animal).ok_or(GameError::NoSuchRule {
            from: from_animal,
            to: to_animal,
        })?;
        if from_amount % rule.from_count != 0 {
            return Err(GameError::NotAMultiple {
                animal: from_animal,
                unit: rule.from_count,
            });
        }

        let before = self.players[seat].animals;
        let have = before[from_animal];
        if have < from_amount {
            return Err(GameError::InsufficientPlayerStock {
                animal: from_animal,
                have,
                need: from_amount,
            });
        }

        let units = u64::from(from_amount / rule.from_count);
        let to_receive = units * u64::from(rule.to_count);
        let bank_has = self.state.main_herd[to_animal];
        if u64::from(bank_has) < to_receive {
            return Err(GameError::InsufficientBankStock {
                animal: to_animal,
                have: bank_has,
                need: u32::try_from(to_receive).unwrap_or(u32::MAX),
            });
        }
        let to_receive = to_receive as u32;

        let player = &mut self.players[seat];
        player.animals.take(from_animal, from_amount);
        self.state.main_herd.add(from_animal, from_amount);
        self.state.main_herd.take(to_animal, to_receive);
        player.animals.add(to_animal, to_receive);
        let after = player.animals;

        let line = format!(
            "{} exchanged {} {} for {} {} with the bank.",
            player.nick, from_amount, from_animal, to_receive, to_animal
        );
        info!("{}", line);
        self.state.push_log(line.clone());
        self.state
            .player_turn_state
            .entry(player_id)
            .or_default()
            .has_exchanged = true;

        Ok(ExchangeOutcome {
            log: line,
            before,
            after,
        })
    }

    /// Records a trade proposal from the current player to another seated player.
    pub fn propose_trade(
        &mut self,
        from_player_id: PlayerId,
        target_player_id: PlayerId,
        offered_items: &TradeItems,
        requested_items: &TradeItems,
    ) -> Result<TradeOffer, GameError> {
        let from_seat = self.ensure_turn(from_player_id)?;
        let turn = self.state.turn_state(from_player_id);
        if turn.has_exchanged || turn.has_rolled {
            return Err(GameError::AlreadyActedThisTurn);
        }
        if target_player_id == from_player_id {
            return Err(GameError::SelfTrade);
        }
        let target_seat = self.seat(target_player_id)?;

        let offered = bundle(offered_items)?;
        let requested = bundle(requested_items)?;
        if offered.is_empty() && requested.is_empty() {
            return Err(GameError::EmptyTrade);
        }

        let proposer = &self.players[from_seat];
        let target = &self.players[target_seat];
        if !proposer.animals.covers(&offered) {
            return Err(GameError::InsufficientOfferedStock);
        }
        if target.connection.is_none() {
            return Err(GameError::TargetUnavailable);
        }
        if self.state.pending_trades.len() >= MAX_PENDING_TRADES {
            return Err(GameError::TooManyPendingTrades {
                max: MAX_PENDING_TRADES,
            });
        }

        let offer = TradeOffer {
            trade_id: TradeId::new(),
            proposing_player_id: proposer.id,
            proposing_player_nick: proposer.nick.clone(),
            target_player_id: target.id,
            target_player_nick: target.nick.clone(),
            offered_items: offered,
            requested_items: requested,
            timestamp: get_timestamp(),
            status: TradeStatus::PendingTargetResponse,
        };

        info!(
            "Trade {} proposed: {} offers {} to {} for {}",
            offer.trade_id, proposer.nick, offered, target.nick, requested
        );
        self.state.push_log(format!(
            "{} proposed a trade to {}.",
            proposer.nick, target.nick
        ));
        self.state
            .pending_trades
            .insert(offer.trade_id, offer.clone());
        Ok(offer)
    }

    /// Accepts or rejects a pending trade. Stock is checked again on acceptance.
    pub fn respond_to_trade(
        &mut self,
        responding_player_id: PlayerId,
        trade_id: TradeId,
        accepted: bool,
    ) -> Result<TradeResolution, GameError> {
        if self.state.is_over() {
            return Err(GameError::GameOver);
        }
        let offer = self
            .state
            .pending_trades
            .get(&trade_id)
            .ok_or(GameError::NoSuchTrade(trade_id))?;
        if offer.target_player_id != responding_player_id {
            return Err(GameError::NotTradeTarget);
        }
        let offer = self
            .state
            .pending_trades
            .remove(&trade_id)
            .ok_or(GameError::NoSuchTrade(trade_id))?;

        if !accepted {
            info!("Trade {} rejected", trade_id);
            self.state.push_log(format!(
                "{} rejected the trade offer from {}.",
                offer.target_player_nick, offer.proposing_player_nick
            ));
            return Ok(TradeResolution::Rejected(offer));
        }

        let seats = (
            self.seat(offer.proposing_player_id),
            self.seat(offer.target_player_id),
        );
        let (proposer_seat, target_seat) = match seats {
            (Ok(proposer), Ok(target)) => (proposer, target),
            _ => {
                return Ok(self.cancel(
                    offer,
                    "The other player is no longer in the game.".to_string(),
                    "The other player is no longer in the game.".to_string(),
                ))
            }
        };

        let mut proposer_herd = self.players[proposer_seat].animals;
        let mut target_herd = self.players[target_seat].animals;

        if !proposer_herd.covers(&offer.offered_items) {
            let target_reason = format!(
                "{} no longer owns the offered animals.",
                offer.proposing_player_nick
            );
            return Ok(self.cancel(
                offer,
                "You no longer own the offered animals.".to_string(),
                target_reason,
            ));
        }
        if !target_herd.covers(&offer.requested_items) {
            let proposer_reason = format!(
                "{} no longer owns the requested animals.",
                offer.target_player_nick
            );
            return Ok(self.cancel(
                offer,
                proposer_reason,
                "You no longer own the requested animals.".to_string(),
            ));
        }

        proposer_herd.transfer_to(&mut target_herd, &offer.offered_items);
        target_herd.transfer_to(&mut proposer_herd, &offer.requested_items);
        self.players[proposer_seat].animals = proposer_herd;
        self.players[target_seat].animals = target_herd;

        if self.state.current_player_id == offer.proposing_player_id {
            self.state
                .player_turn_state
                .entry(offer.proposing_player_id)
                .or_default()
                .has_exchanged = true;
        }

        info!("Trade {} completed", trade_id);
        self.state.push_log(format!(
            "Trade between {} and {} completed.",
            offer.proposing_player_nick, offer.target_player_nick
        ));
        Ok(TradeResolution::Completed(offer))
    }

    fn cancel(
        &mut self,
        offer: TradeOffer,
        proposer_reason: String,
        target_reason: String,
    ) -> TradeResolution {
        info!("Trade {} cancelled: {}", offer.trade_id, target_reason);
        self.state.push_log(format!(
            "Trade between {} and {} was cancelled.",
            offer.proposing_player_nick, offer.target_player_nick
        ));
        TradeResolution::Cancelled {
            offer,
            proposer_reason,
            target_reason,
        }
    }

    /// Removes every pending trade the player is party to.
    pub fn cancel_trades_involving(&mut self, player_id: PlayerId) -> Vec<TradeOffer> {
        let ids: Vec<TradeId> = self
            .state
            .pending_trades
            .values()
            .filter(|trade| trade.involves(player_id))
            .map(|trade| trade.trade_id)
            .collect();

        let mut cancelled = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(trade) = self.state.pending_trades.remove(&id) {
                self.state.push_log(format!(
                    "Trade {} was cancelled because a player disconnected.",
                    trade.trade_id
                ));
                cancelled.push(trade);
            }
        }
        cancelled.sort_by_key(|trade| (trade.timestamp, trade.trade_id));
        cancelled
    }

    /// Passes the turn to the next connected player in seat order, wrapping
    /// around. With `skip_current` the current player is never chosen and need
    /// not be seated any more. Returns `None` when nobody is eligible, leaving
    /// the turn where it was.
    pub fn advance_turn(
        &mut self,
        current_player_id: PlayerId,
        skip_current: bool,
    ) -> Option<PlayerId> {
        if self.state.is_over() || self.players.is_empty() {
            return None;
        }

        let count = self.players.len();
        let start = self
            .players
            .iter()
            .position(|player| player.id == current_player_id)
            .map_or(0, |seat| seat + 1);

        let next = (0..count)
            .map(|offset| &self.players[(start + offset) % count])
            .find(|player| {
                player.connection.is_some() && !(skip_current && player.id == current_player_id)
            })
            .map(|player| player.id)?;

        self.hand_turn_to(next);
        Some(next)
    }

    /// Gives the turn to `player_id` with fresh turn flags.
    pub fn hand_turn_to(&mut self, player_id: PlayerId) {
        self.state.current_player_id = player_id;
        self.state
            .player_turn_state
            .insert(player_id, TurnState::default());
    }

    /// Records the winner; no further turn, roll or trade succeeds afterwards.
    pub fn finish(&mut self, winner_id: PlayerId) {
        let nick = self
            .players
            .iter()
            .find(|player| player.id == winner_id)
            .map(|player| player.nick.clone())
            .unwrap_or_default();
        info!("{} won the game", nick);
        self.state.winner = Some(winner_id);
        self.state.push_log(format!("{} has a full farm and wins!", nick));
    }
}

/// Converts a client bundle into a herd, rejecting non-positive quantities.
fn bundle(items: &TradeItems) -> Result<Herd, GameError> {
    let mut herd = Herd::new();
    for (&animal, &count) in items {
        if count <= 0 {
            return Err(GameError::InvalidQuantity);
        }
        let count = u32::try_from(count).map_err(|_| GameError::InvalidQuantity)?;
        herd.add(animal, count);
    }
    Ok(herd)
}
