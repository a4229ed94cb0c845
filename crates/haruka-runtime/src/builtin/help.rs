//! `help`: command listing and per-command details.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use haruka_framework::prelude::*;
use haruka_framework::{DispatchTable, Loader};

use super::{require, short_module_name};

pub const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    name: "help",
    trust: Trust::System,
    summary: "Lists modules and describes commands",
    create,
};

/// Commands shown per module in the overview.
const PREVIEW_LEN: usize = 4;
const RULE: &str = "━━━━━━━━━━━━━━━━━━━━";

fn create(_: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
    Ok(ModuleDefinition::new().command(
        CommandMeta::new("help", handler_fn(help))
            .alias("h")
            .describe("Shows the module list, or details of a command or module.")
            .usage("help [command|module]"),
    ))
}

async fn help(ctx: Arc<CommandContext>) -> Result<(), BoxError> {
    let loader = require::<Loader>(&ctx)?;
    let table = loader.registry().snapshot();

    let Some(query) = ctx.args().first().map(|q| q.to_lowercase()) else {
        ctx.respond(&overview(&table, ctx.prefix())).await?;
        return Ok(());
    };

    if let Some(text) = command_details(&table, ctx.prefix(), &query) {
        ctx.respond(&text).await?;
    } else if let Some(text) = module_details(&table, ctx.prefix(), &query) {
        ctx.respond(&text).await?;
    } else {
        ctx.err(&format!("Nothing found for query {query}")).await?;
    }
    Ok(())
}

/// Command names grouped by short module name.
fn overview(table: &DispatchTable, prefix: &str) -> String {
    let mut groups: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for record in table.modules() {
        let names = groups
            .entry(short_module_name(record.instance.id()))
            .or_default();
        names.extend(record.commands.iter().map(|c| c.name()));
    }

    let mut text = format!(
        "🌸 Haruka Help\nModules: {} | Commands: {}\n{RULE}\n",
        groups.len(),
        table.trigger_count()
    );
    for (module, names) in &groups {
        let mut preview = names
            .iter()
            .take(PREVIEW_LEN)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        if names.len() > PREVIEW_LEN {
            preview.push_str("...");
        }
        text.push_str(&format!("📦 {module}: {preview}\n"));
    }
    text.push_str(&format!("\nℹ️ Write {prefix}help name for details."));
    text
}

fn command_details(table: &DispatchTable, prefix: &str, query: &str) -> Option<String> {
    let meta = table.lookup(query)?;
    let aliases = if meta.aliases_list().is_empty() {
        "None".to_string()
    } else {
        meta.aliases_list().join(", ")
    };
    let mut text = format!(
        "📑 Command: {prefix}{}\n📦 Module: {}\n🔗 Aliases: {aliases}\n",
        meta.name(),
        meta.module_name()
    );
    if let Some(usage) = meta.usage_text() {
        text.push_str(&format!("⌨️ Usage: {prefix}{usage}\n"));
    }
    text.push_str(&format!(
        "📝 Description:\n{}",
        meta.description().unwrap_or("No description.")
    ));
    Some(text)
}

/// Every trigger of the modules whose id contains `query`.
fn module_details(table: &DispatchTable, prefix: &str, query: &str) -> Option<String> {
    let triggers: BTreeSet<String> = table
        .modules()
        .filter(|r| r.instance.id().contains(query))
        .flat_map(|r| r.triggers.iter().map(|t| format!("{prefix}{t}")))
        .collect();
    if triggers.is_empty() {
        return None;
    }
    Some(format!(
        "📦 Module: {query}\n{RULE}\n{}",
        triggers.into_iter().collect::<Vec<_>>().join(", ")
    ))
}
