//! Core engine — round lifecycle, ledger, and command dispatch.

pub mod ledger;
pub mod round;

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::gateway::{ChatGateway, CommandMessage};
use crate::types::{BalanceScope, GameError};
use round::RoundEngine;

/// Static `/help` reply.
const HELP_TEXT: &str = "\
Welcome to the Crash Game Bot! Here are the available commands:

/start - Claim ownership of the bot (first user only).
/play - Start a new game (owner only).
/join <multiplier> - Join the game with a target multiplier. Example: /join 3.
/balance <me|game|all> - Check balances:
    me - Your personal balance.
    game - The bot's game balance.
    all - All balances (game and users).
/help - Show this help message.

Game Rules:
1. The owner starts the game with /play.
2. Participants join with /join <multiplier>.
3. If the game crashes before your multiplier, you lose.
4. If the game reaches your multiplier, you win.
5. The bot's balance decreases when payouts are made. If balance is 0, the game ends.";

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes inbound commands to engine operations and sends the reply.
///
/// Every failure — domain error or malformed arguments — becomes one
/// text reply and touches no state. Unknown commands are ignored.
pub struct CommandDispatcher {
    engine: RoundEngine,
    gateway: Arc<dyn ChatGateway>,
}

impl CommandDispatcher {
    pub fn new(engine: RoundEngine, gateway: Arc<dyn ChatGateway>) -> Self {
        Self { engine, gateway }
    }

    /// Handle one inbound command end to end.
    ///
    /// The returned error is a gateway send failure only; by then any
    /// state mutation has already committed and is not rolled back.
    pub async fn dispatch(&self, msg: &CommandMessage) -> Result<()> {
        match msg.command.as_str() {
            "start" => self.handle_start(msg).await,
            "play" => self.handle_play(msg).await,
            "join" => self.handle_join(msg).await,
            "balance" => self.handle_balance(msg).await,
            "help" => self.gateway.send_text(msg.chat, HELP_TEXT).await,
            other => {
                debug!(command = other, "Ignoring unknown command");
                Ok(())
            }
        }
    }

    async fn handle_start(&self, msg: &CommandMessage) -> Result<()> {
        let reply = match self.engine.claim_ownership(msg.sender) {
            Ok(()) => "You are now the game owner! Use /play to start the game.".to_string(),
            Err(e) => e.to_string(),
        };
        self.gateway.send_text(msg.chat, &reply).await
    }

    async fn handle_play(&self, msg: &CommandMessage) -> Result<()> {
        let reply = match self.engine.open_round(msg.sender, msg.chat) {
            Ok(()) => {
                "The game has started! Participants, type /join <multiplier> to participate."
                    .to_string()
            }
            Err(GameError::NotOwner) => "Only the game owner can start the game!".to_string(),
            Err(e) => e.to_string(),
        };
        self.gateway.send_text(msg.chat, &reply).await
    }

    async fn handle_join(&self, msg: &CommandMessage) -> Result<()> {
        if msg.args.len() != 1 {
            return self
                .gateway
                .send_text(msg.chat, "Usage: /join <multiplier>. Example: /join 3.5")
                .await;
        }

        // An unparsable token reads the same as a non-positive one.
        let multiplier: f64 = msg.args[0].parse().unwrap_or(f64::NAN);

        let reply = match self.engine.join(msg.sender, &msg.sender_name, multiplier) {
            Ok(()) => format!(
                "{} joined the game with multiplier {:.2}!",
                msg.sender_name, multiplier
            ),
            Err(e) => e.to_string(),
        };
        self.gateway.send_text(msg.chat, &reply).await
    }

    async fn handle_balance(&self, msg: &CommandMessage) -> Result<()> {
        if msg.args.len() != 1 {
            return self
                .gateway
                .send_text(msg.chat, "Usage: /balance <me|game|all>.")
                .await;
        }

        let Ok(scope) = msg.args[0].parse::<BalanceScope>() else {
            return self
                .gateway
                .send_text(msg.chat, "Invalid option. Use /balance <me|game|all>.")
                .await;
        };

        match scope {
            BalanceScope::Mine => {
                let balance = self.engine.balance_of(msg.sender);
                self.gateway
                    .send_text(msg.chat, &format!("Your balance: {balance:.2}"))
                    .await
            }
            BalanceScope::House => {
                let house = self.engine.house_balance();
                self.gateway
                    .send_text(msg.chat, &format!("Game balance: {house:.2}"))
                    .await
            }
            BalanceScope::All => match self.engine.all_balances(msg.sender) {
                Ok(snapshot) => {
                    let mut text = format!("Game balance: {:.2}\n", snapshot.house);
                    for (user, balance) in &snapshot.users {
                        // Clickable user mention in Telegram Markdown.
                        text.push_str(&format!(
                            "[User](tg://user?id={user}): {balance:.2}\n"
                        ));
                    }
                    self.gateway.send_markdown(msg.chat, &text).await
                }
                Err(_) => {
                    self.gateway
                        .send_text(msg.chat, "Only the game owner can see all balances!")
                        .await
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
