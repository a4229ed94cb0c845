//! `info`: uptime, latency and module counts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use haruka_framework::Loader;
use haruka_framework::prelude::*;

use super::require;
use crate::runtime::RuntimeInfo;

pub const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    name: "info",
    trust: Trust::System,
    summary: "Shows runtime status",
    create,
};

fn create(_: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
    Ok(ModuleDefinition::new().command(
        CommandMeta::new("info", handler_fn(info))
            .alias("stats")
            .describe("Shows uptime, ping and loaded modules."),
    ))
}

async fn info(ctx: Arc<CommandContext>) -> Result<(), BoxError> {
    let started = Instant::now();
    ctx.respond("⚡️ Haruka is collecting data...").await?;
    let ping = started.elapsed();

    let loader = require::<Loader>(&ctx)?;
    let table = loader.registry().snapshot();
    let plugins = loader.discover().await.map(|p| p.len()).unwrap_or(0);
    let uptime = ctx
        .service::<RuntimeInfo>()
        .map(|i| format_uptime(i.uptime()))
        .unwrap_or_else(|| "unknown".to_string());

    let text = format!(
        "🌸 HARUKA\n\
         ━━━━━━━━━━━━━━━━━━━━\n\
         ⚙️ SYSTEM STATUS\n\
         ┣ Uptime: {uptime}\n\
         ┣ Ping: {}ms\n\
         ┣ Modules: {}\n\
         ┣ Commands: {}\n\
         ┗ Plugins: {plugins} installed",
        ping.as_millis(),
        table.module_count(),
        table.trigger_count(),
    );
    ctx.respond(&text).await?;
    Ok(())
}

/// `3d 4h 5m`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    format!("{days}d {hours}h {}m", rem / 60)
}
