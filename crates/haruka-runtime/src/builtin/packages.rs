//! Plugin management: `remove`, `reload`, `update` and the `haruka`
//! repository commands.

use std::sync::Arc;

use haruka_framework::Loader;
use haruka_framework::prelude::*;

use super::require;
use crate::error::PackageError;
use crate::packages::{RepoManager, repo_short_name, validate_plugin_name};

pub const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    name: "packages",
    trust: Trust::System,
    summary: "Installs, updates and removes plugins",
    create,
};

const REPO_SELECTOR: &str = "repo:";

fn create(_: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
    Ok(ModuleDefinition::new()
        .command(
            CommandMeta::new("remove", handler_fn(remove))
                .aliases(["uninstall", "rm"])
                .describe("Unloads a plugin and deletes its manifest.")
                .usage("remove <name>"),
        )
        .command(
            CommandMeta::new("reload", handler_fn(reload))
                .describe("Reloads a plugin, or a system module given as system.<name>.")
                .usage("reload <name>"),
        )
        .command(
            CommandMeta::new("update", handler_fn(update))
                .alias("up")
                .describe("Re-downloads a plugin installed from a repository.")
                .usage("update <name>"),
        )
        .command(
            CommandMeta::new("haruka", handler_fn(haruka))
                .describe(
                    "Package manager.\n\
                     haruka add <link> adds a repository\n\
                     haruka list lists repositories\n\
                     haruka install <name> [repo:user/repo] installs a plugin\n\
                     haruka update updates every installed plugin",
                )
                .usage("haruka <add|list|install|update> ..."),
        ))
}

async fn remove(ctx: Arc<CommandContext>) -> Result<(), BoxError> {
    let Some(name) = ctx.args().first() else {
        ctx.err("Specify module name").await?;
        return Ok(());
    };
    let loader = require::<Loader>(&ctx)?;
    let manager = require::<RepoManager>(&ctx)?;

    match manager.remove(&loader, name).await {
        Ok(true) => ctx.ok(&format!("Module {name} removed.")).await?,
        Ok(false) => ctx.err("Module not found or it's a system module.").await?,
        Err(e) => ctx.err(&e.to_string()).await?,
    };
    Ok(())
}

/// Maps `system.<name>` to the builtin source; anything else is a plugin.
fn reload_source(name: &str) -> String {
    match name.strip_prefix("system.") {
        Some(kind) => format!("builtin:{kind}"),
        None => name.to_string(),
    }
}

async fn reload(ctx: Arc<CommandContext>) -> Result<(), BoxError> {
    let Some(name) = ctx.args().first() else {
        ctx.err("Specify module name").await?;
        return Ok(());
    };
    let source = reload_source(name);
    if !source.starts_with("builtin:") && validate_plugin_name(&source).is_err() {
        ctx.err(&format!("Invalid module name {name}")).await?;
        return Ok(());
    }
    let loader = require::<Loader>(&ctx)?;

    let report = loader.reload(&source).await;
    if report.success {
        ctx.ok(&format!("Module {name} reloaded: {}", report.detail)).await?;
    } else {
        ctx.err(&format!("Reload of {name} failed: {}", report.detail)).await?;
    }
    Ok(())
}

async fn update(ctx: Arc<CommandContext>) -> Result<(), BoxError> {
    let Some(name) = ctx.args().first() else {
        ctx.err(&format!(
            "Specify module name to update or {}haruka update for all.",
            ctx.prefix()
        ))
        .await?;
        return Ok(());
    };
    let loader = require::<Loader>(&ctx)?;
    let manager = require::<RepoManager>(&ctx)?;

    ctx.warn(&format!("🔄 Updating {name} from cloud...")).await?;
    match manager.update(&loader, name).await {
        Ok(_) => ctx.ok(&format!("Module {name} updated!")).await?,
        Err(PackageError::NotTracked(_)) => {
            ctx.err(&format!(
                "Module {name} was installed manually. Replace its manifest and {}reload it.",
                ctx.prefix()
            ))
            .await?
        }
        Err(e) => ctx.err(&format!("Update error: {e}")).await?,
    };
    Ok(())
}

async fn haruka(ctx: Arc<CommandContext>) -> Result<(), BoxError> {
    let p = ctx.prefix().to_string();
    let Some(sub) = ctx.args().first().map(|s| s.to_lowercase()) else {
        ctx.respond(&format!(
            "📦 Haruka Package Manager\n\
             {p}haruka add (link) - Add repository\n\
             {p}haruka install (name) - Install plugin\n\
             {p}haruka list - List of repositories\n\
             {p}haruka update - Update all installed"
        ))
        .await?;
        return Ok(());
    };
    let manager = require::<RepoManager>(&ctx)?;

    match sub.as_str() {
        "add" => {
            let Some(url) = ctx.args().get(1) else {
                ctx.err("Specify GitHub link!").await?;
                return Ok(());
            };
            match manager.add_repo(url).await {
                Ok((normalized, true)) => ctx.ok(&format!("Repository added!\n🔗 {normalized}")).await?,
                Ok((_, false)) => ctx.warn("This repository is already in the list.").await?,
                Err(e) => ctx.err(&e.to_string()).await?,
            };
        }
        "list" => {
            let repos = manager.repos().await?;
            if repos.is_empty() {
                ctx.warn("Repository list is empty.").await?;
            } else {
                ctx.respond(&format!("🔗 Connected repositories:\n{}", repos.join("\n")))
                    .await?;
            }
        }
        "install" => {
            let selector = ctx
                .args()
                .iter()
                .skip(1)
                .find_map(|a| a.strip_prefix(REPO_SELECTOR))
                .map(str::to_string);
            let Some(name) = ctx
                .args()
                .iter()
                .skip(1)
                .find(|a| !a.starts_with(REPO_SELECTOR))
            else {
                ctx.err("Specify plugin name!").await?;
                return Ok(());
            };
            let loader = require::<Loader>(&ctx)?;

            ctx.warn(&format!("🔎 Searching for {name} in repositories...")).await?;
            match manager.install(&loader, name, selector.as_deref()).await {
                Ok(report) => {
                    ctx.ok(&format!("Installed {name} from {}", report.url)).await?;
                }
                Err(PackageError::Ambiguous { candidates, .. }) => {
                    let mut text = format!("⚠️ Found multiple versions of '{name}':\n");
                    for c in &candidates {
                        text.push_str(&format!("• {c}\n"));
                    }
                    text.push_str(&format!(
                        "\nSpecify: {p}haruka install {name} {REPO_SELECTOR}{}",
                        candidates.first().map_or("user/repo", String::as_str)
                    ));
                    ctx.respond(&text).await?;
                }
                Err(e) => {
                    ctx.err(&e.to_string()).await?;
                }
            }
        }
        "update" => {
            let loader = require::<Loader>(&ctx)?;
            let results = manager.update_all(&loader).await?;
            if results.is_empty() {
                ctx.warn("No plugins were installed from repositories.").await?;
                return Ok(());
            }
            let mut text = String::from("🔄 Update results:\n");
            for (name, result) in &results {
                match result {
                    Ok(report) => text.push_str(&format!(
                        "✅ {name} ({})\n",
                        repo_short_name(&report.url)
                    )),
                    Err(e) => text.push_str(&format!("⛔ {name}: {e}\n")),
                }
            }
            ctx.respond(text.trim_end()).await?;
        }
        other => {
            ctx.err(&format!("Unknown subcommand {other}")).await?;
        }
    }
    Ok(())
}
