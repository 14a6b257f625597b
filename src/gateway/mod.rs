//! Messaging gateway.
//!
//! Defines the `ChatGateway` trait the engine sends replies through,
//! plus the inbound `CommandMessage` shape the dispatcher consumes.
//! The Telegram implementation lives in `telegram`; tests substitute
//! an in-memory recording gateway.

pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::types::{ChatId, UserId};

/// An inbound bot command, already stripped down to what the
/// dispatcher needs: who sent it, where, and what they asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    /// Command name without the leading slash (e.g. "join").
    pub command: String,
    /// Whitespace-split argument tokens following the command.
    pub args: Vec<String>,
    pub sender: UserId,
    pub sender_name: String,
    pub chat: ChatId,
}

impl fmt::Display for CommandMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/{} {} (from {} in chat {})",
            self.command,
            self.args.join(" "),
            self.sender_name,
            self.chat,
        )
    }
}

/// Abstraction over the outbound side of the messaging transport.
///
/// A failed send is the caller's problem to log; it never rolls back
/// the state mutation that preceded it.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Send a plain-text message to a chat.
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()>;

    /// Send a Markdown-formatted message (used for user mentions in
    /// balance listings).
    async fn send_markdown(&self, chat: ChatId, text: &str) -> Result<()>;

    /// Gateway name for logging and identification.
    fn name(&self) -> &str;
}
