//! Rule tables and value types shared by the farm server and its clients.
//!
//! Everything here is static game data (animals, dice, the bank exchange graph)
//! or a plain value that travels over the wire. The wire protocol itself lives
//! in [`protocol`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use uuid::Uuid;

pub mod protocol;

pub use protocol::{
    ClientPacket, ExchangeRequest, GameSnapshot, PlayerSnapshot, RoomSnapshot, RoomSummary,
    ServerPacket, TradeItems, TradeOffer, TradeStatus, TurnState,
};

pub const CLIENT_VERSION: u32 = 1;
pub const MAX_PLAYERS_PER_ROOM: usize = 4;
pub const MIN_PLAYERS_TO_START: usize = 2;
/// Number of most recent game log lines kept per room.
pub const LOG_WINDOW: usize = 50;
pub const DIE_FACES: usize = 12;
/// Open trade offers a room may hold at once. Every room snapshot carries them
/// all, so this keeps broadcasts inside a single datagram.
pub const MAX_PENDING_TRADES: usize = 16;

/// Animals that can be owned by a player or held by the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Animal {
    Rabbit,
    Sheep,
    Pig,
    Cow,
    Horse,
    SmallDog,
    BigDog,
}

impl Animal {
    pub const ALL: [Animal; 7] = [
        Animal::Rabbit,
        Animal::Sheep,
        Animal::Pig,
        Animal::Cow,
        Animal::Horse,
        Animal::SmallDog,
        Animal::BigDog,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Animal::Rabbit => "rabbit",
            Animal::Sheep => "sheep",
            Animal::Pig => "pig",
            Animal::Cow => "cow",
            Animal::Horse => "horse",
            Animal::SmallDog => "small dog",
            Animal::BigDog => "big dog",
        }
    }
}

impl fmt::Display for Animal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Animals a player must hold at least one of to win.
pub const WINNING_SET: [Animal; 5] = [
    Animal::Rabbit,
    Animal::Sheep,
    Animal::Pig,
    Animal::Cow,
    Animal::Horse,
];

/// Animals lost to an undefended wolf.
pub const WOLF_PREY: [Animal; 3] = [Animal::Sheep, Animal::Pig, Animal::Cow];

/// A single die face. Predators never breed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Face {
    Rabbit,
    Sheep,
    Pig,
    Cow,
    Horse,
    Wolf,
    Fox,
}

impl Face {
    /// The animal this face breeds, or `None` for a predator.
    pub fn animal(self) -> Option<Animal> {
        match self {
            Face::Rabbit => Some(Animal::Rabbit),
            Face::Sheep => Some(Animal::Sheep),
            Face::Pig => Some(Animal::Pig),
            Face::Cow => Some(Animal::Cow),
            Face::Horse => Some(Animal::Horse),
            Face::Wolf | Face::Fox => None,
        }
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Face::Wolf => f.write_str("wolf"),
            Face::Fox => f.write_str("fox"),
            other => match other.animal() {
                Some(animal) => f.write_str(animal.name()),
                None => Ok(()),
            },
        }
    }
}

/// First die: rabbits and sheep, one wolf.
pub const DIE_A: [Face; DIE_FACES] = [
    Face::Rabbit,
    Face::Rabbit,
    Face::Rabbit,
    Face::Rabbit,
    Face::Rabbit,
    Face::Rabbit,
    Face::Sheep,
    Face::Sheep,
    Face::Sheep,
    Face::Pig,
    Face::Cow,
    Face::Wolf,
];

/// Second die: sheep and pigs, one fox.
pub const DIE_B: [Face; DIE_FACES] = [
    Face::Sheep,
    Face::Sheep,
    Face::Sheep,
    Face::Sheep,
    Face::Sheep,
    Face::Sheep,
    Face::Sheep,
    Face::Sheep,
    Face::Pig,
    Face::Pig,
    Face::Horse,
    Face::Fox,
];

/// Outcome of one throw of both dice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceResult {
    pub die_a: Face,
    pub die_b: Face,
}

impl DiceResult {
    pub fn new(die_a: Face, die_b: Face) -> Self {
        Self { die_a, die_b }
    }

    pub fn faces(&self) -> [Face; 2] {
        [self.die_a, self.die_b]
    }

    pub fn shows(&self, face: Face) -> bool {
        self.die_a == face || self.die_b == face
    }

    /// How many of the two faces show `animal`.
    pub fn count(&self, animal: Animal) -> u32 {
        self.faces()
            .iter()
            .filter(|face| face.animal() == Some(animal))
            .count() as u32
    }

    /// Distinct breeding animals shown, in die order.
    pub fn bred_animals(&self) -> Vec<Animal> {
        let mut animals = Vec::with_capacity(2);
        for animal in self.faces().iter().filter_map(|face| face.animal()) {
            if !animals.contains(&animal) {
                animals.push(animal);
            }
        }
        animals
    }
}

/// Count of each animal kind, used for player holdings, the bank and trade bundles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Herd {
    counts: [u32; 7],
}

impl Herd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, animal: Animal, count: u32) -> Self {
        self[animal] = count;
        self
    }

    pub fn get(&self, animal: Animal) -> u32 {
        self[animal]
    }

    pub fn add(&mut self, animal: Animal, count: u32) {
        self[animal] += count;
    }

    pub fn add_all(&mut self, other: &Herd) {
        for (animal, count) in other.iter() {
            self.add(animal, count);
        }
    }

    /// Removes up to `count` animals and returns how many were actually removed.
    pub fn take(&mut self, animal: Animal, count: u32) -> u32 {
        let taken = self[animal].min(count);
        self[animal] -= taken;
        taken
    }

    /// True when every kind in `other` is held in at least the same amount.
    pub fn covers(&self, other: &Herd) -> bool {
        Animal::ALL
            .iter()
            .all(|&animal| self[animal] >= other[animal])
    }

    /// Moves the whole of `bundle` from `self` into `to`. Caller checks [`Herd::covers`] first.
    pub fn transfer_to(&mut self, to: &mut Herd, bundle: &Herd) {
        for (animal, count) in bundle.iter() {
            let moved = self.take(animal, count);
            to.add(animal, moved);
        }
    }

    /// Non-zero entries in canonical animal order.
    pub fn iter(&self) -> impl Iterator<Item = (Animal, u32)> + '_ {
        Animal::ALL
            .iter()
            .map(move |&animal| (animal, self[animal]))
            .filter(|(_, count)| *count > 0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&count| count == 0)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }
}

impl Index<Animal> for Herd {
    type Output = u32;

    fn index(&self, animal: Animal) -> &u32 {
        &self.counts[animal.index()]
    }
}

impl IndexMut<Animal> for Herd {
    fn index_mut(&mut self, animal: Animal) -> &mut u32 {
        &mut self.counts[animal.index()]
    }
}

impl FromIterator<(Animal, u32)> for Herd {
    fn from_iter<I: IntoIterator<Item = (Animal, u32)>>(iter: I) -> Self {
        let mut herd = Herd::new();
        for (animal, count) in iter {
            herd.add(animal, count);
        }
        herd
    }
}

impl fmt::Display for Herd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("nothing");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(animal, count)| format!("{} {}", count, animal))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Bank stock at the start of every game.
pub fn initial_main_herd() -> Herd {
    Herd::new()
        .with(Animal::Rabbit, 60)
        .with(Animal::Sheep, 24)
        .with(Animal::Pig, 20)
        .with(Animal::Cow, 12)
        .with(Animal::Horse, 6)
        .with(Animal::SmallDog, 4)
        .with(Animal::BigDog, 2)
}

/// One directed edge of the bank exchange graph: `from_count` of `from` buys `to_count` of `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRule {
    pub from: Animal,
    pub from_count: u32,
    pub to: Animal,
    pub to_count: u32,
}

const fn rule(from: Animal, from_count: u32, to: Animal, to_count: u32) -> ExchangeRule {
    ExchangeRule {
        from,
        from_count,
        to,
        to_count,
    }
}

/// The bank exchange graph. Every pair is listed in both directions on purpose,
/// dogs included; removing a line makes that direction unavailable.
pub const EXCHANGE_RULES: [ExchangeRule; 12] = [
    rule(Animal::Rabbit, 6, Animal::Sheep, 1),
    rule(Animal::Sheep, 1, Animal::Rabbit, 6),
    rule(Animal::Sheep, 2, Animal::Pig, 1),
    rule(Animal::Pig, 1, Animal::Sheep, 2),
    rule(Animal::Pig, 3, Animal::Cow, 1),
    rule(Animal::Cow, 1, Animal::Pig, 3),
    rule(Animal::Cow, 2, Animal::Horse, 1),
    rule(Animal::Horse, 1, Animal::Cow, 2),
    rule(Animal::Sheep, 1, Animal::SmallDog, 1),
    rule(Animal::SmallDog, 1, Animal::Sheep, 1),
    rule(Animal::Cow, 1, Animal::BigDog, 1),
    rule(Animal::BigDog, 1, Animal::Cow, 1),
];

pub fn find_exchange_rule(from: Animal, to: Animal) -> Option<&'static ExchangeRule> {
    EXCHANGE_RULES
        .iter()
        .find(|rule| rule.from == from && rule.to == to)
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Stable player identity, survives reconnects.
    PlayerId
);
uuid_id!(RoomId);
uuid_id!(TradeId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_die_definitions() {
        let count = |die: &[Face; DIE_FACES], face: Face| die.iter().filter(|f| **f == face).count();

        assert_eq!(count(&DIE_A, Face::Rabbit), 6);
        assert_eq!(count(&DIE_A, Face::Sheep), 3);
        assert_eq!(count(&DIE_A, Face::Wolf), 1);
        assert_eq!(count(&DIE_A, Face::Fox), 0);

        assert_eq!(count(&DIE_B, Face::Sheep), 8);
        assert_eq!(count(&DIE_B, Face::Pig), 2);
        assert_eq!(count(&DIE_B, Face::Fox), 1);
        assert_eq!(count(&DIE_B, Face::Wolf), 0);
    }

    #[test]
    fn test_every_exchange_rule_has_a_reverse() {
        for rule in EXCHANGE_RULES.iter() {
            let reverse = find_exchange_rule(rule.to, rule.from)
                .unwrap_or_else(|| panic!("no reverse for {:?}", rule));
            assert_eq!(reverse.from_count, rule.to_count);
            assert_eq!(reverse.to_count, rule.from_count);
        }
    }

    #[test]
    fn test_unknown_exchange_pair() {
        assert!(find_exchange_rule(Animal::Rabbit, Animal::Horse).is_none());
        assert!(find_exchange_rule(Animal::Rabbit, Animal::Rabbit).is_none());
    }

    #[test]
    fn test_initial_main_herd() {
        let herd = initial_main_herd();
        assert_eq!(herd[Animal::Rabbit], 60);
        assert_eq!(herd[Animal::Sheep], 24);
        assert_eq!(herd[Animal::BigDog], 2);
        assert_eq!(herd.total(), 128);
    }

    #[test]
    fn test_herd_take_is_capped() {
        let mut herd = Herd::new().with(Animal::Pig, 2);
        assert_eq!(herd.take(Animal::Pig, 5), 2);
        assert_eq!(herd[Animal::Pig], 0);
        assert!(herd.is_empty());
    }

    #[test]
    fn test_herd_covers_and_transfer() {
        let mut from = Herd::new().with(Animal::Sheep, 3).with(Animal::Cow, 1);
        let mut to = Herd::new();
        let bundle = Herd::new().with(Animal::Sheep, 2);

        assert!(from.covers(&bundle));
        assert!(!to.covers(&bundle));

        from.transfer_to(&mut to, &bundle);
        assert_eq!(from[Animal::Sheep], 1);
        assert_eq!(to[Animal::Sheep], 2);
        assert_eq!(from[Animal::Cow], 1);
    }

    #[test]
    fn test_herd_display() {
        let herd = Herd::new().with(Animal::Rabbit, 2).with(Animal::BigDog, 1);
        assert_eq!(herd.to_string(), "2 rabbit, 1 big dog");
        assert_eq!(Herd::new().to_string(), "nothing");
    }

    #[test]
    fn test_dice_result_counts() {
        let roll = DiceResult::new(Face::Sheep, Face::Sheep);
        assert_eq!(roll.count(Animal::Sheep), 2);
        assert_eq!(roll.bred_animals(), vec![Animal::Sheep]);

        let roll = DiceResult::new(Face::Wolf, Face::Pig);
        assert!(roll.shows(Face::Wolf));
        assert!(!roll.shows(Face::Fox));
        assert_eq!(roll.bred_animals(), vec![Animal::Pig]);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(PlayerId::new(), PlayerId::new());
    }
}
