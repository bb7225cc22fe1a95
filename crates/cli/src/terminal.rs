use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};

use chicken_core::{Role, SessionMeta};
use chicken_session::SessionMessagesBlock;

use crate::view::ViewUpdate;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const PROGRESS: Color = Color::Yellow;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Terminal output for the REPL. Input is read on a separate thread; see
/// `main`.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    /// Print the startup banner.
    pub fn print_banner(&self, server: &str, session: &SessionMeta) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("chicken-cli"),
            ResetColor,
            Print(" - streaming chat\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!(
                "Server: {} | Session: {} ({}) | Agent: {}\n",
                server, session.title, session.id, session.agent_type
            )),
            Print("Type /help for commands. Ctrl+C stops the current reply.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_prompt(&self) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print a whole transcript window (session open, older page loaded).
    pub fn print_transcript(&self, block: &SessionMessagesBlock) -> Result<()> {
        let mut stdout = io::stdout();
        if block.has_more {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print("(older messages available: /older)\n"),
                ResetColor,
            )?;
        }
        for message in &block.messages {
            let (label, color) = match message.role {
                Role::User => ("you> ", Colors::USER_PROMPT),
                Role::Assistant => ("ai> ", Colors::ASSISTANT_TEXT),
                Role::System => ("system> ", Colors::DIM),
            };
            execute!(
                stdout,
                SetForegroundColor(color),
                Print(label),
                ResetColor,
                Print(format!("{}\n", message.content)),
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    /// Apply transcript updates for the focused session.
    pub fn display_updates(&self, updates: &[ViewUpdate]) -> Result<()> {
        let mut stdout = io::stdout();
        for update in updates {
            match update {
                ViewUpdate::Message { role, content } => {
                    let label = match role {
                        Role::Assistant => "ai> ",
                        Role::System => "system> ",
                        Role::User => "you> ",
                    };
                    execute!(
                        stdout,
                        SetForegroundColor(Colors::ASSISTANT_TEXT),
                        Print(label),
                        Print(content),
                        ResetColor,
                    )?;
                }
                ViewUpdate::Delta(text) => {
                    execute!(
                        stdout,
                        SetForegroundColor(Colors::ASSISTANT_TEXT),
                        Print(text),
                        ResetColor,
                    )?;
                }
                ViewUpdate::Replaced(content) => {
                    let color = if content.starts_with("Error:") || content.starts_with("Sorry,") {
                        Colors::ERROR
                    } else {
                        Colors::ASSISTANT_TEXT
                    };
                    execute!(
                        stdout,
                        Print("\n"),
                        SetForegroundColor(color),
                        Print(content),
                        ResetColor,
                    )?;
                }
            }
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_progress(&self, message: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::PROGRESS),
            Print(format!("\n[{}]\n", message)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print a session listing.
    pub fn print_sessions(&self, sessions: &[SessionMeta]) -> Result<()> {
        let mut stdout = io::stdout();
        if sessions.is_empty() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print("No sessions found.\n"),
                ResetColor,
            )?;
            return Ok(());
        }

        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("Sessions:\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!(
                "{:<38} {:<40} {:<8} {:<6} {:<16}\n",
                "ID", "TITLE", "AGENT", "MSGS", "UPDATED"
            )),
            Print(format!("{}\n", "-".repeat(110))),
            ResetColor,
        )?;

        for s in sessions {
            execute!(
                stdout,
                Print(format!(
                    "{:<38} {:<40} {:<8} {:<6} {:<16}\n",
                    s.id,
                    truncate_display(&s.title, 38),
                    s.agent_type,
                    s.message_count,
                    format_timestamp(s.updated_at),
                )),
            )?;
        }

        stdout.flush()?;
        Ok(())
    }

    /// Print an error message.
    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print an info message.
    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}

fn truncate_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
