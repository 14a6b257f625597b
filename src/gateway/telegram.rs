//! Telegram Bot API gateway.
//!
//! Long-polls `getUpdates` for inbound commands and sends replies via
//! `sendMessage`. Only command messages (leading `/`) are surfaced;
//! everything else in the chat is ignored.
//!
//! API docs: https://core.telegram.org/bots/api
//! Base URL: https://api.telegram.org/bot<token>/

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatGateway, CommandMessage};
use crate::types::ChatId;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.telegram.org";
const GATEWAY_NAME: &str = "telegram";

// ---------------------------------------------------------------------------
// API wire types (Telegram JSON → Rust)
// ---------------------------------------------------------------------------

/// Every Bot API response is wrapped in this envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

/// We only deserialize the fields the dispatcher needs.
#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    from: Option<User>,
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    first_name: String,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Telegram Bot API client.
pub struct TelegramGateway {
    http: Client,
    token: SecretString,
    /// Long-poll timeout in seconds, passed through to `getUpdates`.
    poll_timeout_secs: u64,
}

impl TelegramGateway {
    pub fn new(token: SecretString, poll_timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            // Read timeout must outlast the server-side long-poll window.
            .timeout(std::time::Duration::from_secs(poll_timeout_secs + 30))
            .user_agent("CRASHBOT/0.1.0 (crash-game-bot)")
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            token,
            poll_timeout_secs,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{BASE_URL}/bot{}/{method}", self.token.expose_secret())
    }

    /// Long-poll for updates past `offset`.
    ///
    /// Returns the parsed command messages plus the next offset to poll
    /// from (max update_id seen + 1, or the input offset unchanged when
    /// the window expired with nothing new).
    pub async fn poll_commands(&self, offset: i64) -> Result<(Vec<CommandMessage>, i64)> {
        let url = format!(
            "{}?offset={}&timeout={}&allowed_updates=[\"message\"]",
            self.api_url("getUpdates"),
            offset,
            self.poll_timeout_secs,
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Telegram getUpdates request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {status}: {body}");
        }

        let envelope: ApiResponse<Vec<Update>> = resp
            .json()
            .await
            .context("Failed to parse Telegram getUpdates response")?;

        if !envelope.ok {
            anyhow::bail!(
                "Telegram getUpdates rejected: {}",
                envelope.description.unwrap_or_default()
            );
        }

        let updates = envelope.result.unwrap_or_default();
        let mut next_offset = offset;
        let mut commands = Vec::new();

        for update in updates {
            next_offset = next_offset.max(update.update_id + 1);

            let Some(message) = update.message else { continue };
            let (Some(from), Some(text)) = (message.from, message.text) else {
                continue;
            };

            match parse_command(&text) {
                Some((command, args)) => {
                    let cmd = CommandMessage {
                        command,
                        args,
                        sender: from.id,
                        sender_name: from.first_name,
                        chat: message.chat.id,
                    };
                    debug!(command = %cmd, "Inbound command");
                    commands.push(cmd);
                }
                None => {
                    // Ordinary chat noise, not addressed to the bot.
                }
            }
        }

        Ok((commands, next_offset))
    }

    async fn send(&self, chat: ChatId, text: &str, parse_mode: Option<&str>) -> Result<()> {
        let body = SendMessageRequest {
            chat_id: chat,
            text,
            parse_mode,
        };

        let resp = self
            .http
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(chat, %status, "Telegram sendMessage failed");
            anyhow::bail!("Telegram API error {status}: {body}");
        }

        Ok(())
    }
}

/// Split a message text into (command, args) if it is a bot command.
///
/// Accepts `/cmd`, `/cmd@BotName`, and trailing whitespace-split
/// arguments. Returns None for anything that isn't a command.
fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = text.split_whitespace();
    let head = tokens.next()?;
    let head = head.strip_prefix('/')?;
    if head.is_empty() {
        return None;
    }

    // `/join@CrashGameBot 3.5` → command "join"
    let command = head.split('@').next().unwrap_or(head).to_lowercase();
    let args = tokens.map(str::to_string).collect();

    Some((command, args))
}

#[async_trait]
impl ChatGateway for TelegramGateway {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()> {
        self.send(chat, text, None).await
    }

    async fn send_markdown(&self, chat: ChatId, text: &str) -> Result<()> {
        self.send(chat, text, Some("Markdown")).await
    }

    fn name(&self) -> &str {
        GATEWAY_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
