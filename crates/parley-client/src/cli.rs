use thiserror::Error;

use parley_types::ParticipantId;

pub const HELP: &str = "\
commands:
  /list            show conversations
  /open <n|key>    open conversation n from the list, or by key (e.g. 1-4)
  /users           show everyone you can message
  /new <user id>   start a conversation
  /reload          fetch conversations again
  /logout          forget the saved session and quit
  /quit            quit
anything else is sent to the open conversation (start with // to send a leading /)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Index(usize),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Open(Target),
    Users,
    New(ParticipantId),
    Reload,
    Logout,
    Quit,
    Help,
    Send(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command /{0}; try /help")]
    Unknown(String),

    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),

    #[error("{0:?} is not a user id")]
    BadUserId(String),
}

/// Parse one input line. An empty line is `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(text) = line.strip_prefix("//") {
        return Ok(Some(Command::Send(format!("/{}", text))));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    let command = match name {
        "list" | "l" => Command::List,
        "users" | "u" => Command::Users,
        "reload" => Command::Reload,
        "logout" => Command::Logout,
        "quit" | "q" => Command::Quit,
        "help" | "h" => Command::Help,
        "open" | "o" => {
            let arg = arg.ok_or(CommandError::MissingArgument("open"))?;
            match arg.parse::<usize>() {
                Ok(n) => Command::Open(Target::Index(n)),
                Err(_) => Command::Open(Target::Key(arg.to_string())),
            }
        }
        "new" | "n" => {
            let arg = arg.ok_or(CommandError::MissingArgument("new"))?;
            let id = arg
                .parse::<ParticipantId>()
                .map_err(|_| CommandError::BadUserId(arg.to_string()))?;
            Command::New(id)
        }
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}
