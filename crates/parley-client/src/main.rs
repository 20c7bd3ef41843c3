use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use parley_client::cli::{self, Command, Target};
use parley_client::config::Config;
use parley_client::render;
use parley_client::rest::RestApi;
use parley_client::session_file::{self, StoredSession};
use parley_client::transport::{StompTransport, TransportSettings};
use parley_sync::{ConversationListItem, EngineHandle, Session, SessionLifecycle, Transport, ViewEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout is the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info,parley_sync=info,parley_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let stored = obtain_session(&config, &mut lines).await?;
    info!("Signed in as {} ({})", stored.user.name, stored.user.id);

    let session = Session::new(stored.user.id, stored.token);
    let api = Arc::new(RestApi::new(&config.api_base_url, session.token()));
    let settings = TransportSettings {
        ws_url: config.ws_url.clone(),
        token: session.token().to_string(),
        reconnect_delay: config.reconnect_delay,
        heartbeat: config.heartbeat,
    };
    let (lifecycle, events) = SessionLifecycle::start(session, api, |handle| {
        StompTransport::spawn(settings, handle) as Arc<dyn Transport>
    });

    let (list_tx, list_rx) = watch::channel(Vec::new());
    let printer = tokio::spawn(print_events(events, list_tx));

    println!("{}", cli::HELP);
    let forget_session = run_commands(lifecycle.handle(), &mut lines, &list_rx).await;

    lifecycle.logout().await;
    let _ = printer.await;
    if forget_session {
        session_file::clear(&config.session_path)?;
        println!("logged out");
    }
    Ok(())
}

/// Reuse the saved session, or log in and save a new one.
async fn obtain_session(config: &Config, lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<StoredSession> {
    match session_file::load(&config.session_path) {
        Ok(Some(stored)) => return Ok(stored),
        Ok(None) => {}
        Err(e) => warn!("Ignoring saved session: {}", e),
    }

    let email = match &config.email {
        Some(email) => email.clone(),
        None => prompt("email: ", lines).await?,
    };
    let password = match &config.password {
        Some(password) => password.clone(),
        None => prompt("password: ", lines).await?,
    };

    let resp = RestApi::login(&config.api_base_url, &email, &password)
        .await
        .context("login failed")?;
    let stored = StoredSession {
        token: resp.token,
        user: resp.user,
    };
    session_file::save(&config.session_path, &stored)?;
    Ok(stored)
}

async fn prompt(label: &str, lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    let line = lines.next_line().await?.context("stdin closed")?;
    Ok(line.trim().to_string())
}

/// Read commands until the user leaves. Returns whether the saved session
/// should be forgotten.
async fn run_commands(
    handle: &EngineHandle,
    lines: &mut Lines<BufReader<Stdin>>,
    list: &watch::Receiver<Vec<ConversationListItem>>,
) -> bool {
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => return false,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return false,
            Err(e) => {
                warn!("Reading stdin failed: {}", e);
                return false;
            }
        };

        let command = match cli::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("! {}", e);
                continue;
            }
        };

        match command {
            Command::List => println!("{}", render::conversation_list(&list.borrow())),
            Command::Open(target) => {
                let key = {
                    let items = list.borrow();
                    let found = match &target {
                        Target::Index(n) => n.checked_sub(1).and_then(|i| items.get(i)),
                        Target::Key(key) => items.iter().find(|c| c.key.as_str() == key.as_str()),
                    };
                    found.map(|c| c.key.clone())
                };
                match key {
                    Some(key) => handle.select(key),
                    None => println!("! no such conversation; /list shows them"),
                }
            }
            Command::Users => handle.open_directory(),
            Command::New(id) => handle.start_conversation(id),
            Command::Reload => handle.reload(),
            Command::Help => println!("{}", cli::HELP),
            Command::Logout => return true,
            Command::Quit => return false,
            Command::Send(text) => {
                if let Err(e) = handle.send(text).await {
                    println!("! {}", e);
                }
            }
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<ViewEvent>, list: watch::Sender<Vec<ConversationListItem>>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Renderer lagged by {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            ViewEvent::List(items) => {
                println!("{}", render::conversation_list(&items));
                let _ = list.send(items);
            }
            ViewEvent::Active(Some(view)) => println!("{}", render::active_conversation(&view)),
            ViewEvent::Active(None) => {}
            ViewEvent::Directory(users) => println!("{}", render::directory(&users)),
            ViewEvent::Notice(notice) => println!("{}", render::notice(&notice)),
            ViewEvent::Closed => break,
        }
    }
}
