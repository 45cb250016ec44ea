//! Dice, coin and choice helpers behind `/roll`, `/coin` and `/choose`.
//!
//! Everything takes the RNG as an argument; handlers pass `thread_rng()`.

use lazy_regex::lazy_regex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use thiserror::Error;

static RE_DICE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?i)^(\d*)\s*[dдк]\s*(\d+)\s*(?:([+-])\s*(\d+))?$");
static RE_OPTION_SEPARATOR: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?i)\s*(?:\||,|;|\s+or\s+|\s+или\s+)\s*");

/// Maximum dice per roll
pub const MAX_DICE: u32 = 100;
/// Maximum sides per die
pub const MAX_SIDES: u32 = 1000;
/// Maximum absolute modifier
pub const MAX_MODIFIER: i32 = 1000;

/// Errors from parsing `/roll` and `/choose` arguments
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RandomError {
    /// Not a dice expression
    #[error("unrecognized dice expression: {0}")]
    BadDice(String),
    /// Dice count outside 1..=MAX_DICE
    #[error("dice count must be between 1 and {max}", max = MAX_DICE)]
    DiceCount,
    /// Sides outside 2..=MAX_SIDES
    #[error("a die needs between 2 and {max} sides", max = MAX_SIDES)]
    Sides,
    /// Modifier too large
    #[error("modifier must be within ±{max}", max = MAX_MODIFIER)]
    Modifier,
    /// `/choose` needs something to choose from
    #[error("need at least two different options")]
    NotEnoughOptions,
}

/// A parsed `NdM±K` expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceRoll {
    /// Number of dice
    pub count: u32,
    /// Sides per die
    pub sides: u32,
    /// Added to the sum
    pub modifier: i32,
}

impl Default for DiceRoll {
    fn default() -> Self {
        Self {
            count: 1,
            sides: 6,
            modifier: 0,
        }
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

/// Result of rolling a [`DiceRoll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollOutcome {
    /// Each die in roll order
    pub rolls: Vec<u32>,
    /// Modifier applied
    pub modifier: i32,
    /// Sum of dice plus modifier
    pub total: i64,
}

impl DiceRoll {
    /// Parse `d20`, `2d6+3`, `3к6-1` or a bare side count like `20`.
    /// An empty string is `1d6`.
    ///
    /// # Errors
    ///
    /// Returns a [`RandomError`] for malformed or out-of-range expressions.
    pub fn parse(input: &str) -> Result<Self, RandomError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::default());
        }

        if input.chars().all(|c| c.is_ascii_digit()) {
            let sides = input.parse().map_err(|_| RandomError::Sides)?;
            return Self::validated(1, sides, 0);
        }

        let caps = RE_DICE
            .captures(input)
            .ok_or_else(|| RandomError::BadDice(input.to_string()))?;

        let count = match caps.get(1).map(|m| m.as_str()) {
            None | Some("") => 1,
            Some(n) => n.parse().map_err(|_| RandomError::DiceCount)?,
        };
        let sides = caps[2].parse().map_err(|_| RandomError::Sides)?;
        let modifier = match (caps.get(3), caps.get(4)) {
            (Some(sign), Some(value)) => {
                let value: i32 = value.as_str().parse().map_err(|_| RandomError::Modifier)?;
                if sign.as_str() == "-" {
                    -value
                } else {
                    value
                }
            }
            _ => 0,
        };

        Self::validated(count, sides, modifier)
    }

    const fn validated(count: u32, sides: u32, modifier: i32) -> Result<Self, RandomError> {
        if count == 0 || count > MAX_DICE {
            return Err(RandomError::DiceCount);
        }
        if sides < 2 || sides > MAX_SIDES {
            return Err(RandomError::Sides);
        }
        if modifier.abs() > MAX_MODIFIER {
            return Err(RandomError::Modifier);
        }
        Ok(Self {
            count,
            sides,
            modifier,
        })
    }

    /// Roll the dice
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> RollOutcome {
        let rolls: Vec<u32> = (0..self.count)
            .map(|_| rng.gen_range(1..=self.sides))
            .collect();
        let total = rolls.iter().map(|r| i64::from(*r)).sum::<i64>() + i64::from(self.modifier);
        RollOutcome {
            rolls,
            modifier: self.modifier,
            total,
        }
    }
}

/// Coin side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coin {
    /// Heads
    Heads,
    /// Tails
    Tails,
}

/// Flip a fair coin
pub fn flip_coin<R: Rng + ?Sized>(rng: &mut R) -> Coin {
    if rng.gen_bool(0.5) {
        Coin::Heads
    } else {
        Coin::Tails
    }
}

/// Split `/choose` input into distinct options.
///
/// Separators: `|`, `,`, `;`, ` or `, ` или `.
///
/// # Errors
///
/// Returns [`RandomError::NotEnoughOptions`] when fewer than two distinct
/// options remain.
pub fn split_options(input: &str) -> Result<Vec<String>, RandomError> {
    let mut options: Vec<String> = Vec::new();
    for option in RE_OPTION_SEPARATOR.split(input.trim()) {
        let option = option.trim();
        if !option.is_empty() && !options.iter().any(|o| o == option) {
            options.push(option.to_string());
        }
    }
    if options.len() < 2 {
        return Err(RandomError::NotEnoughOptions);
    }
    Ok(options)
}

/// Pick one option uniformly
pub fn choose<'a, R: Rng + ?Sized>(rng: &mut R, options: &'a [String]) -> Option<&'a str> {
    options.choose(rng).map(String::as_str)
}
