//! Line-oriented console over a support chat session
//!
//! Updates are printed to stdout as JSON lines; logs go to stderr.

use support_chat::{ChatConfig, HttpBackend, Session, SessionUpdate, WebSocketTransport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Select(&'a str),
    Quote(&'a str),
    Unquote,
    Bot(bool),
    Panel,
    Close,
    Retry(&'a str),
    Discard(&'a str),
    Quit,
    Send(&'a str),
}

fn parse(line: &str) -> Result<Command<'_>, String> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line));
    };
    let (name, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, arg)| (name, arg.trim()));
    let required = |what: &str| {
        if arg.is_empty() {
            Err(format!("/{name} needs {what}"))
        } else {
            Ok(arg)
        }
    };
    match name {
        "select" => required("a conversation id").map(Command::Select),
        "quote" => required("a message id").map(Command::Quote),
        "unquote" => Ok(Command::Unquote),
        "bot" => match arg {
            "on" => Ok(Command::Bot(true)),
            "off" => Ok(Command::Bot(false)),
            _ => Err("usage: /bot on|off".to_string()),
        },
        "panel" => Ok(Command::Panel),
        "close" => Ok(Command::Close),
        "retry" => required("a message id").map(Command::Retry),
        "discard" => required("a message id").map(Command::Discard),
        "quit" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}")),
    }
}

type ConsoleSession = Session<WebSocketTransport, HttpBackend>;

/// Returns false when the console should exit
fn run_command(session: &mut ConsoleSession, command: Command<'_>) -> bool {
    let result = match command {
        Command::Select(id) => session.select(id),
        Command::Quote(id) => session.set_quote(id),
        Command::Unquote => {
            session.clear_quote();
            Ok(())
        }
        Command::Bot(enabled) => match session.active_conversation().map(|c| c.id.clone()) {
            Some(id) => session.update_status_bot(&id, enabled),
            None => Err(support_chat::SessionError::NoActiveConversation),
        },
        Command::Panel => session.open_contact_panel(),
        Command::Close => {
            session.close_contact_panel();
            Ok(())
        }
        Command::Retry(id) => session.retry(id).map(|_| ()),
        Command::Discard(id) => session.discard(id),
        Command::Send(text) => session.send(text).map(|_| ()),
        Command::Quit => return false,
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
    }
    true
}

fn print_update(update: &SessionUpdate) {
    match serde_json::to_string(update) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "Failed to encode update"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "support_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ChatConfig::from_env();
    tracing::info!(
        endpoint = %config.endpoint,
        api_url = %config.api_url,
        agent_id = %config.agent_id,
        "Starting support chat console"
    );

    let backend = HttpBackend::new(&config)?;
    let mut session = Session::new(config, WebSocketTransport::new(), backend);
    let mut updates = BroadcastStream::new(session.subscribe()).filter_map(Result::ok);
    session.connect();
    session.refresh_conversations();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = session.step() => {}
            Some(update) = updates.next() => print_update(&update),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse(line) {
                    Ok(command) => {
                        if !run_command(&mut session, command) {
                            break;
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
        }
    }

    session.disconnect();
    tracing::info!("Console stopped");
    Ok(())
}
