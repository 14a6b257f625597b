//! Round engine — the crash game state machine.
//!
//! Owns the whole game state behind one coarse lock: ownership, round
//! status, the participant set, and the ledger. A successful open
//! schedules exactly one deferred settlement task; the `AlreadyOpen`
//! gate guarantees a second task can never exist while one is pending.

use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::GameConfig;
use crate::engine::ledger::Ledger;
use crate::gateway::ChatGateway;
use crate::types::{
    ChatId, GameError, Participant, PlayerOutcome, RoundStatus, Settlement, SettlementReport,
    UserId,
};

/// Crash multipliers are drawn uniformly from [CRASH_MIN, CRASH_MAX).
const CRASH_MIN: f64 = 1.0;
const CRASH_MAX: f64 = 10.0;

// ---------------------------------------------------------------------------
// Game state
// ---------------------------------------------------------------------------

/// All mutable game state. Guarded by the engine's single lock; no
/// other component reads or writes it.
#[derive(Debug)]
struct GameState {
    /// Set once — by config preset or the first claimant.
    owner: Option<UserId>,
    status: RoundStatus,
    /// Registered players for the open round. Cleared at settlement.
    participants: HashMap<UserId, Participant>,
    ledger: Ledger,
}

// ---------------------------------------------------------------------------
// Round engine
// ---------------------------------------------------------------------------

/// The round lifecycle engine.
///
/// Cheap to clone — clones share the same state and gateway. The
/// deferred settlement task is a clone of the engine that wakes up
/// after `round_duration` and settles whatever it finds.
#[derive(Clone)]
pub struct RoundEngine {
    state: Arc<Mutex<GameState>>,
    gateway: Arc<dyn ChatGateway>,
    round_duration: Duration,
}

impl RoundEngine {
    pub fn new(cfg: &GameConfig, gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            state: Arc::new(Mutex::new(GameState {
                owner: cfg.owner_id,
                status: RoundStatus::Inactive,
                participants: HashMap::new(),
                ledger: Ledger::new(cfg.initial_house_balance),
            })),
            gateway,
            round_duration: Duration::from_secs(cfg.round_duration_secs),
        }
    }

    /// Acquire the state lock, recovering from poisoning — every
    /// mutation completes under the guard, so the state is consistent.
    fn lock(&self) -> MutexGuard<'_, GameState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- Operations ------------------------------------------------------

    /// Claim ownership. Succeeds only while no owner is set.
    pub fn claim_ownership(&self, user: UserId) -> Result<(), GameError> {
        let mut state = self.lock();
        if state.owner.is_some() {
            return Err(GameError::AlreadyOwned);
        }
        state.owner = Some(user);
        info!(user, "Ownership claimed");
        Ok(())
    }

    /// Open a round and schedule its settlement after `round_duration`.
    pub fn open_round(&self, user: UserId, chat: ChatId) -> Result<(), GameError> {
        {
            let mut state = self.lock();
            if state.owner != Some(user) {
                return Err(GameError::NotOwner);
            }
            if state.status == RoundStatus::Open {
                return Err(GameError::AlreadyOpen);
            }
            if !state.ledger.is_solvent() {
                return Err(GameError::InsufficientFunds);
            }
            state.status = RoundStatus::Open;
            state.participants.clear();
            info!(
                user,
                chat,
                house = format!("{:.2}", state.ledger.house()),
                duration_secs = self.round_duration.as_secs(),
                "Round opened"
            );
        }

        // One task per successful open; it competes for the same lock
        // as every other operation when it fires.
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_round(chat).await;
        });

        Ok(())
    }

    /// Register a participant in the open round.
    pub fn join(&self, user: UserId, name: &str, multiplier: f64) -> Result<(), GameError> {
        let mut state = self.lock();
        if state.status != RoundStatus::Open {
            return Err(GameError::NoActiveRound);
        }
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(GameError::InvalidMultiplier);
        }
        if state.participants.contains_key(&user) {
            return Err(GameError::AlreadyJoined);
        }
        state.participants.insert(
            user,
            Participant {
                name: name.to_string(),
                multiplier,
            },
        );
        info!(
            user,
            name,
            multiplier = format!("{multiplier:.2}"),
            players = state.participants.len(),
            "Player joined"
        );
        Ok(())
    }

    /// Settle the open round against `crash`.
    ///
    /// Returns None when no round is open — the idempotence guard that
    /// makes a stray second settlement a no-op. The crash value is an
    /// argument so tests can force it; the scheduled task draws it.
    pub fn settle(&self, crash: f64) -> Option<Settlement> {
        let mut state = self.lock();
        if state.status != RoundStatus::Open {
            return None;
        }

        if state.participants.is_empty() {
            state.status = RoundStatus::Inactive;
            info!("Round canceled — no participants");
            return Some(Settlement::Canceled);
        }

        let mut winners = Vec::new();
        let mut losers = Vec::new();
        let mut total_payout = 0.0;

        // Taking the map both consumes it and resets it to empty for
        // the next round.
        for (user, participant) in std::mem::take(&mut state.participants) {
            let outcome = PlayerOutcome {
                user,
                name: participant.name,
                multiplier: participant.multiplier,
            };
            if participant.multiplier <= crash {
                // Payout equals the chosen multiplier; there is no
                // stake in this model.
                state.ledger.apply_payout(user, participant.multiplier);
                total_payout += participant.multiplier;
                winners.push(outcome);
            } else {
                losers.push(outcome);
            }
        }

        // HashMap iteration order is arbitrary; fix it for reporting.
        winners.sort_by_key(|w| w.user);
        losers.sort_by_key(|l| l.user);

        state.status = RoundStatus::Inactive;

        let game_over = !state.ledger.is_solvent();
        let report = SettlementReport {
            crash,
            winners,
            losers,
            total_payout,
            house_after: state.ledger.house(),
            game_over,
            timestamp: chrono::Utc::now(),
        };

        if game_over {
            warn!(
                house = format!("{:.2}", report.house_after),
                "House depleted — no further rounds can open"
            );
        }
        info!(settlement = %report, "Round settled");

        Some(Settlement::Completed(report))
    }

    // -- Queries ---------------------------------------------------------

    pub fn status(&self) -> RoundStatus {
        self.lock().status
    }

    pub fn owner(&self) -> Option<UserId> {
        self.lock().owner
    }

    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    /// The requester's personal balance (zero if never paid).
    pub fn balance_of(&self, user: UserId) -> f64 {
        self.lock().ledger.balance_of(user)
    }

    pub fn house_balance(&self) -> f64 {
        self.lock().ledger.house()
    }

    /// Full balance snapshot. Owner only.
    pub fn all_balances(&self, user: UserId) -> Result<crate::types::BalanceSnapshot, GameError> {
        let state = self.lock();
        if state.owner != Some(user) {
            return Err(GameError::NotOwner);
        }
        Ok(state.ledger.snapshot())
    }

    // -- Deferred settlement ---------------------------------------------

    /// The scheduled settlement task: wait out the round, draw the
    /// crash, settle, announce. State mutations happen under the lock
    /// inside `settle`; messages go out afterwards, so a dead gateway
    /// can never unwind a payout.
    async fn run_round(&self, chat: ChatId) {
        sleep(self.round_duration).await;

        let crash = draw_crash();
        let Some(settlement) = self.settle(crash) else {
            return;
        };

        match settlement {
            Settlement::Canceled => {
                self.announce(chat, "No participants joined. Game canceled.")
                    .await;
            }
            Settlement::Completed(report) => {
                for loser in &report.losers {
                    self.announce(
                        chat,
                        &format!(
                            "{} lost (target: {:.2}x, crash: {:.2}x)",
                            loser.name, loser.multiplier, report.crash
                        ),
                    )
                    .await;
                }

                if report.winners.is_empty() {
                    self.announce(
                        chat,
                        &format!("Game crashed at {:.2}x! No winners this round.", report.crash),
                    )
                    .await;
                } else {
                    self.announce(
                        chat,
                        &format!(
                            "Game crashed at {:.2}x! Winners: {}",
                            report.crash,
                            report.winner_list()
                        ),
                    )
                    .await;
                }

                if report.game_over {
                    self.announce(chat, "Game over. The bot is out of balance.")
                        .await;
                }
            }
        }
    }

    /// Send a settlement notification; a failed send is logged and
    /// dropped (delivery is not transactional with state).
    async fn announce(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.gateway.send_text(chat, text).await {
            warn!(chat, error = %e, "Failed to send settlement message");
        }
    }
}

/// Draw a crash multiplier uniformly from [1.0, 10.0).
fn draw_crash() -> f64 {
    thread_rng().gen_range(CRASH_MIN..CRASH_MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Discards all sends — unit tests here only exercise state.
    struct NullGateway;

    #[async_trait]
    impl ChatGateway for NullGateway {
        async fn send_text(&self, _chat: ChatId, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_markdown(&self, _chat: ChatId, _text: &str) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "null"
        }
    }

    const OWNER: UserId = 1;
    const CHAT: ChatId = -100;

    fn make_engine(house: f64) -> RoundEngine {
        let cfg = GameConfig {
            initial_house_balance: house,
            round_duration_secs: 3600, // far beyond any test's lifetime
            owner_id: Some(OWNER),
        };
        RoundEngine::new(&cfg, Arc::new(NullGateway))
    }

    // -- Ownership -------------------------------------------------------

    #[test]
    fn test_preset_owner_from_config() {
        let engine = make_engine(200.0);
        assert_eq!(engine.owner(), Some(OWNER));
        assert_eq!(engine.claim_ownership(2), Err(GameError::AlreadyOwned));
    }

    #[test]
    fn test_first_claimant_becomes_owner() {
        let cfg = GameConfig {
            initial_house_balance: 200.0,
            round_duration_secs: 3600,
            owner_id: None,
        };
        let engine = RoundEngine::new(&cfg, Arc::new(NullGateway));

        assert_eq!(engine.owner(), None);
        engine.claim_ownership(5).unwrap();
        assert_eq!(engine.owner(), Some(5));
        assert_eq!(engine.claim_ownership(6), Err(GameError::AlreadyOwned));
        // Owner identity is immutable once set.
        assert_eq!(engine.owner(), Some(5));
    }

    // -- OpenRound -------------------------------------------------------

    #[tokio::test]
    async fn test_open_round_requires_owner() {
        let engine = make_engine(200.0);
        assert_eq!(engine.open_round(99, CHAT), Err(GameError::NotOwner));
        assert_eq!(engine.status(), RoundStatus::Inactive);
    }

    #[tokio::test]
    async fn test_open_round_twice_fails() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();
        assert_eq!(engine.status(), RoundStatus::Open);
        assert_eq!(engine.open_round(OWNER, CHAT), Err(GameError::AlreadyOpen));
    }

    #[tokio::test]
    async fn test_open_round_requires_solvency() {
        let engine = make_engine(0.0);
        assert_eq!(
            engine.open_round(OWNER, CHAT),
            Err(GameError::InsufficientFunds)
        );
    }

    // -- Join ------------------------------------------------------------

    #[tokio::test]
    async fn test_join_requires_open_round() {
        let engine = make_engine(200.0);
        assert_eq!(engine.join(2, "Alice", 2.0), Err(GameError::NoActiveRound));
    }

    #[tokio::test]
    async fn test_join_rejects_bad_multipliers() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                engine.join(2, "Alice", bad),
                Err(GameError::InvalidMultiplier),
                "multiplier {bad} should be rejected"
            );
        }
        assert_eq!(engine.participant_count(), 0);
    }

    #[tokio::test]
    async fn test_unique_joins_all_succeed() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();

        for user in 1..=5 {
            engine.join(user, &format!("P{user}"), user as f64).unwrap();
        }
        assert_eq!(engine.participant_count(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected_without_side_effects() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();

        engine.join(2, "Alice", 2.0).unwrap();
        assert_eq!(engine.join(2, "Alice", 4.0), Err(GameError::AlreadyJoined));
        assert_eq!(engine.participant_count(), 1);
    }

    // -- Settle ----------------------------------------------------------

    #[tokio::test]
    async fn test_settle_pays_winners_and_records_losers() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();
        engine.join(10, "A", 2.0).unwrap();
        engine.join(20, "B", 5.0).unwrap();

        let settlement = engine.settle(3.0).unwrap();
        let Settlement::Completed(report) = settlement else {
            panic!("expected a completed settlement");
        };

        assert_eq!(report.crash, 3.0);
        assert_eq!(report.winners.len(), 1);
        assert_eq!(report.winners[0].user, 10);
        assert_eq!(report.losers.len(), 1);
        assert_eq!(report.losers[0].user, 20);
        assert!((report.total_payout - 2.0).abs() < 1e-10);
        assert!(!report.game_over);

        assert!((engine.balance_of(10) - 2.0).abs() < 1e-10);
        assert_eq!(engine.balance_of(20), 0.0);
        assert!((engine.house_balance() - 198.0).abs() < 1e-10);
        assert_eq!(engine.participant_count(), 0);
        assert_eq!(engine.status(), RoundStatus::Inactive);
    }

    #[tokio::test]
    async fn test_settle_target_equal_to_crash_wins() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();
        engine.join(10, "A", 3.0).unwrap();

        let Settlement::Completed(report) = engine.settle(3.0).unwrap() else {
            panic!("expected a completed settlement");
        };
        assert_eq!(report.winners.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_empty_round_cancels_without_mutation() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();

        assert_eq!(engine.settle(5.0), Some(Settlement::Canceled));
        assert_eq!(engine.house_balance(), 200.0);
        assert_eq!(engine.status(), RoundStatus::Inactive);
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let engine = make_engine(200.0);
        engine.open_round(OWNER, CHAT).unwrap();
        engine.join(10, "A", 2.0).unwrap();

        assert!(engine.settle(3.0).is_some());
        // A second settlement on the now-inactive round is a no-op.
        assert_eq!(engine.settle(3.0), None);
        assert!((engine.balance_of(10) - 2.0).abs() < 1e-10);
        assert!((engine.house_balance() - 198.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn test_settle_on_inactive_engine_is_noop() {
        let engine = make_engine(200.0);
        assert_eq!(engine.settle(5.0), None);
    }

    #[tokio::test]
    async fn test_house_depletion_locks_the_game() {
        let engine = make_engine(1.5);
        engine.open_round(OWNER, CHAT).unwrap();
        engine.join(10, "A", 2.0).unwrap();

        let Settlement::Completed(report) = engine.settle(3.0).unwrap() else {
            panic!("expected a completed settlement");
        };
        assert!(report.game_over);
        assert!(report.house_after < 0.0);

        // No requester can open another round.
        assert_eq!(
            engine.open_round(OWNER, CHAT),
            Err(GameError::InsufficientFunds)
        );
    }

    // -- Balance queries -------------------------------------------------

    #[tokio::test]
    async fn test_all_balances_owner_only() {
        let engine = make_engine(200.0);
        assert_eq!(engine.all_balances(99), Err(GameError::NotOwner));

        // Regardless of round state.
        engine.open_round(OWNER, CHAT).unwrap();
        assert_eq!(engine.all_balances(99), Err(GameError::NotOwner));

        let snapshot = engine.all_balances(OWNER).unwrap();
        assert_eq!(snapshot.house, 200.0);
        assert!(snapshot.users.is_empty());
    }

    #[test]
    fn test_balance_of_unknown_user_is_zero() {
        let engine = make_engine(200.0);
        assert_eq!(engine.balance_of(12345), 0.0);
    }

    // -- Crash draw ------------------------------------------------------

    #[test]
    fn test_draw_crash_stays_in_range() {
        for _ in 0..1000 {
            let crash = draw_crash();
            assert!((CRASH_MIN..CRASH_MAX).contains(&crash));
        }
    }
}
