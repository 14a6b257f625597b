//! Shared types for the CRASHBOT engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the gateway, dispatcher,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram user identity.
pub type UserId = i64;

/// Telegram chat/destination identity.
pub type ChatId = i64;

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A player registered in the currently open round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Display name used in result messages.
    pub name: String,
    /// Target payout multiplier (finite, > 0).
    pub multiplier: f64,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}x)", self.name, self.multiplier)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Round lifecycle status. One round at a time; `Open` only between a
/// successful open and its settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Inactive,
    Open,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Inactive => write!(f, "inactive"),
            RoundStatus::Open => write!(f, "open"),
        }
    }
}

/// Scope selector for the `/balance` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceScope {
    /// The requester's personal balance.
    Mine,
    /// The house balance.
    House,
    /// House plus every user balance (owner only).
    All,
}

impl fmt::Display for BalanceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceScope::Mine => write!(f, "me"),
            BalanceScope::House => write!(f, "game"),
            BalanceScope::All => write!(f, "all"),
        }
    }
}

/// Parse the `/balance` argument token (case-insensitive).
impl std::str::FromStr for BalanceScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "me" => Ok(BalanceScope::Mine),
            "game" => Ok(BalanceScope::House),
            "all" => Ok(BalanceScope::All),
            _ => Err(anyhow::anyhow!("Unknown balance scope: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement types
// ---------------------------------------------------------------------------

/// One participant's result at settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerOutcome {
    pub user: UserId,
    pub name: String,
    pub multiplier: f64,
}

impl fmt::Display for PlayerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}x)", self.name, self.multiplier)
    }
}

/// Outcome of a settlement pass over an open round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Settlement {
    /// No participants joined; nothing was drawn or paid.
    Canceled,
    /// The round ran to completion.
    Completed(SettlementReport),
}

/// Summary of a completed round: the crash draw, who won and lost,
/// and the house position afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    /// The drawn crash multiplier.
    pub crash: f64,
    /// Participants whose target was at or below the crash value.
    pub winners: Vec<PlayerOutcome>,
    /// Participants whose target exceeded the crash value.
    pub losers: Vec<PlayerOutcome>,
    /// Sum of all payouts this round.
    pub total_payout: f64,
    /// House balance after payouts.
    pub house_after: f64,
    /// Whether payouts drained the house to or below zero.
    pub game_over: bool,
    pub timestamp: DateTime<Utc>,
}

impl SettlementReport {
    /// Comma-joined winner list for the aggregate result message.
    pub fn winner_list(&self) -> String {
        self.winners
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SettlementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "crashed at {:.2}x | winners={} losers={} | paid={:.2} | house={:.2}",
            self.crash,
            self.winners.len(),
            self.losers.len(),
            self.total_payout,
            self.house_after,
        )
    }
}

// ---------------------------------------------------------------------------
// Balance snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of all balances, returned for the `all` scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub house: f64,
    /// (user, balance) pairs for every user that has ever been paid.
    pub users: Vec<(UserId, f64)>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors for the round engine. All are user-facing,
/// non-fatal, and leave state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("A game owner is already set. Only they can start the game.")]
    AlreadyOwned,

    #[error("Only the game owner can do that!")]
    NotOwner,

    #[error("Game is already active.")]
    AlreadyOpen,

    #[error("The bot is out of balance. Game over.")]
    InsufficientFunds,

    #[error("No active game. Please wait for the owner to start a new game.")]
    NoActiveRound,

    #[error("Invalid multiplier. Please specify a positive number.")]
    InvalidMultiplier,

    #[error("You have already joined the game.")]
    AlreadyJoined,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Participant tests --

    #[test]
    fn test_participant_display() {
        let p = Participant {
            name: "Alice".to_string(),
            multiplier: 2.5,
        };
        assert_eq!(format!("{p}"), "Alice (2.50x)");
    }

    #[test]
    fn test_participant_serialization_roundtrip() {
        let p = Participant {
            name: "Bob".to_string(),
            multiplier: 3.75,
        };
        let json = serde_json::to_string(&p).unwrap();
        let parsed: Participant = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, p);
    }

    // -- RoundStatus tests --

    #[test]
    fn test_round_status_display() {
        assert_eq!(format!("{}", RoundStatus::Inactive), "inactive");
        assert_eq!(format!("{}", RoundStatus::Open), "open");
    }

    // -- BalanceScope tests --

    #[test]
    fn test_balance_scope_from_str() {
        assert_eq!("me".parse::<BalanceScope>().unwrap(), BalanceScope::Mine);
        assert_eq!("GAME".parse::<BalanceScope>().unwrap(), BalanceScope::House);
        assert_eq!("all".parse::<BalanceScope>().unwrap(), BalanceScope::All);
        assert!("everything".parse::<BalanceScope>().is_err());
    }

    #[test]
    fn test_balance_scope_display_matches_command_tokens() {
        for scope in [BalanceScope::Mine, BalanceScope::House, BalanceScope::All] {
            let token = format!("{scope}");
            assert_eq!(token.parse::<BalanceScope>().unwrap(), scope);
        }
    }

    // -- Settlement tests --

    fn sample_report() -> SettlementReport {
        SettlementReport {
            crash: 3.0,
            winners: vec![PlayerOutcome {
                user: 1,
                name: "Alice".to_string(),
                multiplier: 2.0,
            }],
            losers: vec![PlayerOutcome {
                user: 2,
                name: "Bob".to_string(),
                multiplier: 5.0,
            }],
            total_payout: 2.0,
            house_after: 198.0,
            game_over: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_report_winner_list() {
        let mut report = sample_report();
        report.winners.push(PlayerOutcome {
            user: 3,
            name: "Carol".to_string(),
            multiplier: 1.5,
        });
        assert_eq!(report.winner_list(), "Alice (2.00x), Carol (1.50x)");
    }

    #[test]
    fn test_report_winner_list_empty() {
        let mut report = sample_report();
        report.winners.clear();
        assert_eq!(report.winner_list(), "");
    }

    #[test]
    fn test_report_display() {
        let report = sample_report();
        let display = format!("{report}");
        assert!(display.contains("3.00x"));
        assert!(display.contains("house=198.00"));
    }

    #[test]
    fn test_settlement_serialization_roundtrip() {
        let settlement = Settlement::Completed(sample_report());
        let json = serde_json::to_string(&settlement).unwrap();
        let parsed: Settlement = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settlement);

        let canceled: Settlement = serde_json::from_str(
            &serde_json::to_string(&Settlement::Canceled).unwrap(),
        )
        .unwrap();
        assert_eq!(canceled, Settlement::Canceled);
    }

    // -- GameError tests --

    #[test]
    fn test_game_error_display() {
        assert_eq!(
            format!("{}", GameError::AlreadyJoined),
            "You have already joined the game."
        );
        assert_eq!(
            format!("{}", GameError::InsufficientFunds),
            "The bot is out of balance. Game over."
        );
        assert!(format!("{}", GameError::NotOwner).contains("owner"));
    }
}
