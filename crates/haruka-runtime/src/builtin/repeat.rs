//! `repeat` / `stop`: a per-chat background loop.
//!
//! Each loaded instance owns its own [`SessionSet`]; reloading or unloading
//! the module drops the set and with it every running loop. Runtime shutdown
//! stops them too.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use haruka_framework::Responder;
use haruka_framework::prelude::*;

use crate::runtime::RuntimeInfo;

pub const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    name: "repeat",
    trust: Trust::User,
    summary: "Repeats a message on an interval until stopped",
    create,
};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
struct RepeatConfig {
    /// Lower bound on the interval, in milliseconds.
    min_interval_ms: u64,
    /// A loop ends on its own after this many messages.
    max_messages: u32,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_messages: 100,
        }
    }
}

fn create(manifest: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
    let config: RepeatConfig = manifest.config();
    let sessions = Arc::new(SessionSet::new());

    let start = {
        let sessions = Arc::clone(&sessions);
        handler_fn(move |ctx: Arc<CommandContext>| {
            let sessions = Arc::clone(&sessions);
            async move { repeat(ctx, &sessions, config).await }
        })
    };
    let stop = handler_fn(move |ctx: Arc<CommandContext>| {
        let sessions = Arc::clone(&sessions);
        async move {
            let chat = ctx.event().chat_id;
            if sessions.stop(chat) {
                ctx.ok("Stopped.").await?;
            } else {
                ctx.warn("Nothing is running in this chat.").await?;
            }
            Ok::<_, BoxError>(())
        }
    });

    Ok(ModuleDefinition::new()
        .command(
            CommandMeta::new("repeat", start)
                .describe("Sends the text every interval until stopped.")
                .usage("repeat <interval_ms> <text>"),
        )
        .command(CommandMeta::new("stop", stop).describe("Stops the loop in this chat.")))
}

async fn repeat(ctx: Arc<CommandContext>, sessions: &SessionSet, config: RepeatConfig) -> Result<(), BoxError> {
    let usage = format!("Usage: {}repeat <interval_ms> <text>", ctx.prefix());
    let (Some(interval), Some(_)) = (ctx.args().first(), ctx.args().get(1)) else {
        ctx.err(&usage).await?;
        return Ok(());
    };
    let Ok(interval) = interval.parse::<u64>() else {
        ctx.err(&usage).await?;
        return Ok(());
    };
    let interval = Duration::from_millis(interval.max(config.min_interval_ms));
    let text = ctx.args()[1..].join(" ");

    let chat = ctx.event().chat_id;
    let responder = ctx.responder().clone();
    let shutdown = ctx
        .service::<RuntimeInfo>()
        .map(|info| info.shutdown_token().clone())
        .unwrap_or_default();

    let started = sessions.start(chat, move |token| {
        repeat_loop(responder, text, interval, config.max_messages, token, shutdown)
    });
    if started {
        ctx.ok(&format!(
            "Repeating every {}ms. Write {}stop to stop.",
            interval.as_millis(),
            ctx.prefix()
        ))
        .await?;
    } else {
        ctx.err(&format!("Already running. Write {}stop to stop.", ctx.prefix()))
            .await?;
    }
    Ok(())
}

async fn repeat_loop(
    responder: Responder,
    text: String,
    interval: Duration,
    max_messages: u32,
    token: CancellationToken,
    shutdown: CancellationToken,
) {
    let chat = responder.chat_id();
    let mut sent = 0;
    while sent < max_messages {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if let Err(e) = responder.send(&text).await {
            debug!(chat, error = %e, "Repeat send failed, stopping");
            break;
        }
        sent += 1;
    }
    debug!(chat, sent, "Repeat loop finished");
}
