/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Plain text to send as a user message.
    Send(String),
    /// Attach a reference document to the next message.
    Attach(String),
    Stop,
    Older,
    New,
    Sessions,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if trimmed == "exit" || trimmed == "quit" {
            return Self::Exit;
        }
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Send(trimmed.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "stop" => Self::Stop,
            "older" | "more" => Self::Older,
            "new" => Self::New,
            "sessions" => Self::Sessions,
            "help" | "?" => Self::Help,
            "exit" | "quit" => Self::Exit,
            "attach" if !arg.is_empty() => Self::Attach(arg.to_string()),
            _ => Self::Unknown(trimmed.to_string()),
        }
    }
}

pub const HELP: &str = "\
/stop            stop the reply that is streaming
/older           load older messages of this session
/attach <title>  attach a document to the next message
/new             start a new session
/sessions        list sessions
/exit            quit";
