use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shoal_core::config::{self, Config};
use shoal_core::event::{BroadcastEventBus, EventBus, EventPayload};
use shoal_core::message::{Scope, User, WireMessage, WireUser};
use shoal_history::{HistoryError, HistoryService};
use shoal_notify::DesktopSink;
use shoal_session::{SessionController, SessionError};
use shoal_transport::LoopbackTransport;

/// Drives the Shoal synchronization core against an in-memory loopback
/// transport with a short scripted exchange, then prints the resulting
/// session snapshot. Useful for smoke-testing the core without a server.
#[derive(Debug, Parser)]
#[command(name = "shoal", version, about)]
struct Args {
    /// Path to the configuration file (defaults to the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    if let Err(e) = run(config).await {
        eprintln!("Session error: {e}");
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    match &args.config {
        Some(path) => config::load_config_from(path.clone()),
        None => config::load_config(),
    }
}

async fn run(config: Config) -> Result<(), SessionError> {
    let bus: Arc<dyn EventBus> =
        Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));
    let transport = Arc::new(LoopbackTransport::new(bus.clone()));
    let sink = Arc::new(DesktopSink::new(config.ui.notifications));
    let history = Arc::new(ScriptedHistory::default());

    let self_user = User {
        id: "sock-local".to_string(),
        username: config.account.username.clone(),
    };
    let mut controller = SessionController::new(
        self_user,
        bus.clone(),
        transport.clone(),
        history,
        sink,
        config.history.page_size,
    );
    let mut sub = bus.subscribe("{socket,system}.**")?;

    info!(username = %config.account.username, "starting loopback session");
    transport.connect().map_err(SessionError::EventBus)?;
    controller.load_earlier();

    script(&transport).map_err(SessionError::EventBus)?;

    controller.set_composing_text("hello fr");
    if let Err(e) = controller.send_message("hello from shoal") {
        warn!(error = %e, "scripted send failed");
    }

    // Drain the bus until it goes quiet, applying each event in order.
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await {
        controller.handle_event(&event);
    }

    print_snapshot(&controller);
    Ok(())
}

/// A short burst of server pushes: a roster, room chatter, a typing snapshot,
/// and a private message that lands outside the active (global) context.
fn script(transport: &LoopbackTransport) -> Result<(), shoal_core::EventBusError> {
    transport.inject(EventPayload::UserRoster {
        users: vec![
            wire_user("sock-91ab24", "alice"),
            wire_user("sock-2277fe", "bob"),
            wire_user("sock-local", "you"),
        ],
    })?;
    transport.inject(EventPayload::UserJoined {
        username: "carol".to_string(),
    })?;
    transport.inject(EventPayload::MessageReceived {
        message: wire_message("live-1", "alice", "sock-91ab24", "welcome back!", false),
    })?;
    transport.inject(EventPayload::TypingRoster {
        usernames: vec!["alice".to_string()],
    })?;
    transport.inject(EventPayload::PrivateMessageReceived {
        message: wire_message("live-2", "bob", "sock-2277fe", "got a minute?", true),
    })?;
    Ok(())
}

fn print_snapshot<H: HistoryService>(controller: &SessionController<H>) {
    let state = controller.state();

    println!("── timeline ({}) ──", state.connection.label());
    for message in state.timeline.messages() {
        let private = if message.scope.is_private() {
            " (private)"
        } else {
            ""
        };
        println!(
            "  [{}] {}{private}: {}",
            message.timestamp.format("%H:%M:%S"),
            message.sender,
            message.body
        );
    }

    let online: Vec<&str> = state
        .presence
        .online_users()
        .iter()
        .map(|u| u.username.as_str())
        .collect();
    println!("── online: {}", online.join(", "));
    if !state.presence.typing_users().is_empty() {
        println!("── typing: {}", state.presence.typing_users().join(", "));
    }
}

fn wire_user(id: &str, username: &str) -> WireUser {
    WireUser {
        id: Some(id.to_string()),
        username: Some(username.to_string()),
    }
}

fn wire_message(id: &str, sender: &str, sender_id: &str, body: &str, private: bool) -> WireMessage {
    WireMessage {
        id: Some(id.to_string()),
        sender: Some(sender.to_string()),
        sender_id: Some(sender_id.to_string()),
        message: Some(body.to_string()),
        timestamp: Some(Utc::now().to_rfc3339()),
        is_private: Some(private),
        ..Default::default()
    }
}

/// Canned history endpoint: one page of older messages, then exhaustion.
#[derive(Default)]
struct ScriptedHistory {
    served: Mutex<bool>,
}

impl HistoryService for ScriptedHistory {
    async fn fetch(
        &self,
        _scope: &Scope,
        _offset: u32,
        _limit: u32,
    ) -> Result<Vec<WireMessage>, HistoryError> {
        let mut served = self.served.lock().unwrap();
        if *served {
            return Ok(Vec::new());
        }
        *served = true;

        let base = Utc::now() - chrono::Duration::minutes(5);
        let mut older = wire_message("hist-1", "alice", "sock-91ab24", "good morning", false);
        older.timestamp = Some(base.to_rfc3339());
        let mut newer = wire_message("hist-2", "bob", "sock-2277fe", "anyone around?", false);
        newer.timestamp = Some((base + chrono::Duration::seconds(40)).to_rfc3339());

        // Newest first, as the real endpoint returns pages.
        Ok(vec![newer, older])
    }
}
