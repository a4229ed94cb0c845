//! Console Bot Example
//!
//! Runs the full runtime with the terminal as the chat: every line typed on
//! stdin becomes a message in one chat, and everything the bot sends or
//! edits is printed to stdout.
//!
//! Lines are the account's own messages by default. Start a line with `>`
//! to send it as somebody else, which only reaches commands that allow
//! external senders.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --config haruka.toml
//! .help
//! .ping
//! > .ping
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use haruka::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "console-bot", about = "Haruka on the terminal")]
struct Args {
    /// Configuration file; searched for in the current directory if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (overrides HARUKA_PROFILE).
    #[arg(short, long)]
    profile: Option<String>,

    /// Chat id the console stands for.
    #[arg(long, default_value_t = 1)]
    chat: i64,

    /// User id of the account itself.
    #[arg(long, default_value_t = 1000)]
    self_id: i64,
}

// ============================================================================
// Console transport
// ============================================================================

/// Prints outgoing messages instead of talking to a chat service.
struct ConsoleTransport {
    self_id: i64,
    next_id: AtomicI64,
}

impl ConsoleTransport {
    fn new(self_id: i64) -> Self {
        Self {
            self_id,
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn self_id(&self) -> i64 {
        self.self_id
    }

    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> TransportResult<SentMessage> {
        let message_id = self.allocate_id();
        match reply_to {
            Some(to) => println!("[{chat_id} #{message_id} ↩ #{to}] {text}"),
            None => println!("[{chat_id} #{message_id}] {text}"),
        }
        Ok(SentMessage { chat_id, message_id })
    }

    async fn edit(&self, chat_id: i64, message_id: i64, text: &str) -> TransportResult<SentMessage> {
        println!("[{chat_id} #{message_id} ✎] {text}");
        Ok(SentMessage { chat_id, message_id })
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> TransportResult<()> {
        println!("[{chat_id} #{message_id} ✗]");
        Ok(())
    }
}

/// Turns stdin lines into events until EOF.
///
/// Runs on its own thread so a pending read never holds up shutdown.
fn read_console(chat: i64, self_id: i64, transport: Arc<ConsoleTransport>, events: mpsc::Sender<MessageEvent>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        let (text, outgoing, sender) = match line.strip_prefix('>') {
            Some(rest) => (rest.trim_start().to_string(), false, self_id + 1),
            None => (line, true, self_id),
        };
        if text.is_empty() {
            continue;
        }
        let event = MessageEvent::new(chat, sender, transport.allocate_id(), text, outgoing);
        if events.blocking_send(event).is_err() {
            debug!("Runtime stopped accepting events");
            break;
        }
    }
    info!("Console closed");
}

// ============================================================================
// Custom module kind
// ============================================================================

/// `ping`: enabled by a `plugins/<name>.toml` containing `kind = "ping"`.
fn ping_module(_: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
    Ok(ModuleDefinition::new().command(
        CommandMeta::new(
            "ping",
            handler_fn(|ctx: Arc<CommandContext>| async move {
                ctx.respond("Pong! 🏓").await?;
                Ok::<_, BoxError>(())
            }),
        )
        .describe("Replies with Pong.")
        .allow_external(),
    ))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = HarukaRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build().context("loading configuration")?;

    runtime.catalog().register(ModuleDescriptor {
        name: "ping",
        trust: Trust::User,
        summary: "Replies with Pong",
        create: ping_module,
    });

    let transport = Arc::new(ConsoleTransport::new(args.self_id));
    let (tx, rx) = runtime.event_channel();

    let console = Arc::clone(&transport);
    std::thread::Builder::new()
        .name("console-reader".into())
        .spawn(move || read_console(args.chat, args.self_id, console, tx))
        .context("spawning console reader")?;

    runtime.run(transport, rx).await?;
    Ok(())
}
