use std::collections::HashSet;

use chrono::{FixedOffset, Local};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::protocol::{ChatMessage, MessageBatch};

pub const HELP_TEXT: &str = "\
Commands:
  /nick <name>      set your nickname
  /speak on|off     speak AI replies
  /help             show this help
  /quit             leave the chat
Anything else is sent as a message.";

pub enum ConsoleEvent {
    Line(String),
    Closed,
}

/// A parsed line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nick(String),
    Speak(bool),
    Help,
    Quit,
    Say(String),
    Invalid(String),
}

pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Say(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match (name.to_lowercase().as_str(), arg) {
        ("nick", "") => Command::Invalid("usage: /nick <name>".to_string()),
        ("nick", name) => Command::Nick(name.to_string()),
        ("speak", "on") => Command::Speak(true),
        ("speak", "off") => Command::Speak(false),
        ("speak", _) => Command::Invalid("usage: /speak on|off".to_string()),
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        (other, _) => Command::Invalid(format!("unknown command /{}", other)),
    };
    Some(command)
}

// 终端输入按行转发给主循环
pub struct ConsoleBridge {
    tx: mpsc::Sender<ConsoleEvent>,
}

impl ConsoleBridge {
    pub fn new(tx: mpsc::Sender<ConsoleEvent>) -> Self {
        Self { tx }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_with(BufReader::new(tokio::io::stdin())).await
    }

    /// Forward lines until EOF or a read error; `Closed` is sent either way.
    async fn run_with<R: AsyncBufRead + Unpin>(&self, reader: R) -> anyhow::Result<()> {
        let result = self.forward_lines(reader).await;
        let _ = self.tx.send(ConsoleEvent::Closed).await;
        result
    }

    async fn forward_lines<R: AsyncBufRead + Unpin>(&self, mut reader: R) -> anyhow::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }

            let line = match String::from_utf8(std::mem::take(&mut buf)) {
                Ok(line) => line,
                Err(e) => {
                    // 非 UTF-8 输入不终止会话，替换非法字节后照常转发
                    log::warn!("Console input is not valid UTF-8, replacing invalid bytes");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            if self.tx.send(ConsoleEvent::Line(line)).await.is_err() {
                log::debug!("Console receiver dropped");
                return Ok(());
            }
        }
    }
}

/// Prints live-feed batches, skipping lines already shown.
pub struct FeedRenderer {
    offset: FixedOffset,
    shown: HashSet<String>,
}

impl Default for FeedRenderer {
    fn default() -> Self {
        Self::with_offset(*Local::now().offset())
    }
}

impl FeedRenderer {
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self {
            offset,
            shown: HashSet::new(),
        }
    }

    /// Lines for messages in `batch` not printed by the previous call.
    ///
    /// Batches are windows over an append-only, time-ordered log, so only the
    /// previous window's ids need remembering.
    pub fn render(&mut self, batch: &MessageBatch) -> Vec<String> {
        let lines = batch
            .messages
            .iter()
            .filter(|m| !self.shown.contains(&m.id))
            .map(|m| format_line(m, &self.offset))
            .collect();
        self.shown = batch.messages.iter().map(|m| m.id.clone()).collect();
        lines
    }
}

pub fn format_line(message: &ChatMessage, offset: &FixedOffset) -> String {
    let time = message.created_at.with_timezone(offset).format("%H:%M:%S");
    if message.is_ai {
        format!("[{}] {} (ai): {}", time, message.nickname, message.text)
    } else {
        format!("[{}] {}: {}", time, message.nickname, message.text)
    }
}
