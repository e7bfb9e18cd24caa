use shared::{Animal, TradeId};
use thiserror::Error;

/// Broad category of a [`GameError`], used for logging and client-side handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Capacity,
    StateConflict,
    Validation,
    InsufficientStock,
    Unavailable,
}

/// Every way an intent can be rejected. None of these leave partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Player not found")]
    PlayerNotFound,
    #[error("Trade offer {0} does not exist")]
    NoSuchTrade(TradeId),

    #[error("Room is full")]
    RoomFull,
    #[error("You already have {max} empty rooms open")]
    TooManyRooms { max: usize },
    #[error("This room already has {max} open trade offers")]
    TooManyPendingTrades { max: usize },

    #[error("A room named \"{0}\" already exists")]
    DuplicateName(String),
    #[error("Game in this room is already in progress")]
    GameInProgress,
    #[error("Game has already started")]
    GameAlreadyStarted,
    #[error("Game has not started")]
    GameNotStarted,
    #[error("Game is over")]
    GameOver,
    #[error("Not enough players to start the game")]
    NotEnoughPlayers,
    #[error("It is not your turn")]
    NotPlayersTurn,
    #[error("You have already rolled this turn")]
    AlreadyRolled,
    #[error("You have already exchanged or rolled this turn")]
    AlreadyActedThisTurn,
    #[error("You are not in a room")]
    NotInRoom,
    #[error("This connection is already bound to another room or player")]
    AlreadyInRoom,
    #[error("You cannot trade with yourself")]
    SelfTrade,
    #[error("You are not the target of this trade offer")]
    NotTradeTarget,

    #[error("Amount must be a positive integer")]
    InvalidAmount,
    #[error("Trade quantities must be positive")]
    InvalidQuantity,
    #[error("Trade offer is empty")]
    EmptyTrade,
    #[error("The bank does not exchange {from} for {to}")]
    NoSuchRule { from: Animal, to: Animal },
    #[error("You can only exchange multiples of {unit} {animal}")]
    NotAMultiple { animal: Animal, unit: u32 },
    #[error("Nickname must be 1 to {max} characters")]
    InvalidNick { max: usize },
    #[error("Room name must be 1 to {max} characters")]
    InvalidRoomName { max: usize },

    #[error("Not enough {animal} (you have {have}, need {need})")]
    InsufficientPlayerStock { animal: Animal, have: u32, need: u32 },
    #[error("The bank does not have enough {animal} (bank has {have}, need {need})")]
    InsufficientBankStock { animal: Animal, have: u32, need: u32 },
    #[error("You do not own the offered animals")]
    InsufficientOfferedStock,

    #[error("Target player is unavailable")]
    TargetUnavailable,
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::RoomNotFound | GameError::PlayerNotFound | GameError::NoSuchTrade(_) => {
                ErrorKind::NotFound
            }
            GameError::RoomFull
            | GameError::TooManyRooms { .. }
            | GameError::TooManyPendingTrades { .. } => ErrorKind::Capacity,
            GameError::DuplicateName(_)
            | GameError::GameInProgress
            | GameError::GameAlreadyStarted
            | GameError::GameNotStarted
            | GameError::GameOver
            | GameError::NotEnoughPlayers
            | GameError::NotPlayersTurn
            | GameError::AlreadyRolled
            | GameError::AlreadyActedThisTurn
            | GameError::NotInRoom
            | GameError::AlreadyInRoom
            | GameError::SelfTrade
            | GameError::NotTradeTarget => ErrorKind::StateConflict,
            GameError::InvalidAmount
            | GameError::InvalidQuantity
            | GameError::EmptyTrade
            | GameError::NoSuchRule { .. }
            | GameError::NotAMultiple { .. }
            | GameError::InvalidNick { .. }
            | GameError::InvalidRoomName { .. } => ErrorKind::Validation,
            GameError::InsufficientPlayerStock { .. }
            | GameError::InsufficientBankStock { .. }
            | GameError::InsufficientOfferedStock => ErrorKind::InsufficientStock,
            GameError::TargetUnavailable => ErrorKind::Unavailable,
        }
    }
}
