use clap::Parser;

/// Terminal chat client for the session backend.
///
/// Replies stream in the background; typing a new message while one is
/// still streaming supersedes it.
#[derive(Parser, Debug)]
#[command(name = "chicken-cli", about = "Streaming chat client for the session backend")]
pub struct CliArgs {
    /// Backend base URL (overrides CHICKEN_BACKEND_URL and the config file)
    #[arg(long)]
    pub server: Option<String>,

    /// Open an existing session by ID
    #[arg(long)]
    pub session: Option<String>,

    /// List sessions known to the backend and exit
    #[arg(long)]
    pub list_sessions: bool,

    /// Delete a session by ID and exit
    #[arg(long)]
    pub delete_session: Option<String>,

    /// Agent that answers new sessions (e.g. chat, search)
    #[arg(long)]
    pub agent_type: Option<String>,

    /// Model override sent with every message
    #[arg(long)]
    pub model: Option<String>,

    /// Path to config file (default: ~/.config/chicken-cli/config.toml)
    #[arg(long)]
    pub config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "chicken-cli",
            "--server",
            "http://backend:8009",
            "--session",
            "abc",
            "--model",
            "gpt-4o",
        ]);
        assert_eq!(args.server.as_deref(), Some("http://backend:8009"));
        assert_eq!(args.session.as_deref(), Some("abc"));
        assert_eq!(args.model.as_deref(), Some("gpt-4o"));
        assert!(!args.list_sessions);
    }
}
