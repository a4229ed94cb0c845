//! Command descriptors and handler services.
//!
//! A handler is a `tower::Service<Arc<CommandContext>>` boxed into a
//! [`CommandHandler`]. Most handlers are plain async closures wrapped with
//! [`handler_fn`]:
//!
//! ```rust,ignore
//! let ping = CommandMeta::new("ping", handler_fn(|ctx: Arc<CommandContext>| async move {
//!     ctx.respond("Pong!").await?;
//!     Ok::<_, BoxError>(())
//! }))
//! .alias("p")
//! .describe("Replies with Pong!");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, service_fn};

use crate::context::CommandContext;

/// Type-erased, cloneable command handler.
pub type CommandHandler = BoxCloneSyncService<Arc<CommandContext>, (), BoxError>;

/// Wraps an async function into a [`CommandHandler`].
pub fn handler_fn<F, Fut, E>(f: F) -> CommandHandler
where
    F: Fn(Arc<CommandContext>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    BoxCloneSyncService::new(service_fn(move |ctx: Arc<CommandContext>| {
        let fut = f(ctx);
        async move { fut.await.map_err(Into::into) }
    }))
}

/// Per-command flags.
///
/// `allow_external` is the only flag the dispatcher interprets; everything
/// else lives in `extra` for handlers and help output to read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandFlags {
    /// Lets users other than the account owner invoke the command.
    pub allow_external: bool,
    /// Free-form flags.
    pub extra: BTreeMap<String, Value>,
}

impl CommandFlags {
    /// Returns the named extra flag.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

/// A registered (or to-be-registered) command.
#[derive(Clone)]
pub struct CommandMeta {
    name: String,
    aliases: Vec<String>,
    handler: CommandHandler,
    module_name: String,
    description: Option<String>,
    usage: Option<String>,
    flags: CommandFlags,
}

impl CommandMeta {
    /// Creates a command with no aliases and default flags.
    ///
    /// The owning module is stamped by the registry at registration time.
    pub fn new(name: impl Into<String>, handler: CommandHandler) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            handler,
            module_name: String::new(),
            description: None,
            usage: None,
            flags: CommandFlags::default(),
        }
    }

    /// Adds an alternate trigger.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Adds several alternate triggers.
    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Sets the one-line description shown by help.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Sets the usage line shown by help, e.g. `<text>`.
    pub fn usage(mut self, text: impl Into<String>) -> Self {
        self.usage = Some(text.into());
        self
    }

    /// Lets users other than the account owner invoke the command.
    pub fn allow_external(mut self) -> Self {
        self.flags.allow_external = true;
        self
    }

    /// Sets a free-form flag.
    pub fn flag(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.flags.extra.insert(name.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases_list(&self) -> &[String] {
        &self.aliases
    }

    /// The canonical name followed by every alias.
    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    /// Id of the module that registered this command.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn usage_text(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    pub fn flags(&self) -> &CommandFlags {
        &self.flags
    }

    pub(crate) fn flags_mut(&mut self) -> &mut CommandFlags {
        &mut self.flags
    }

    pub(crate) fn aliases_mut(&mut self) -> &mut Vec<String> {
        &mut self.aliases
    }

    /// Case-folds the triggers, drops duplicate aliases and stamps the owner.
    pub(crate) fn normalized(mut self, module_id: &str) -> Self {
        self.name = self.name.trim().to_lowercase();
        let mut seen = vec![self.name.clone()];
        self.aliases = std::mem::take(&mut self.aliases)
            .into_iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| {
                if seen.contains(a) {
                    false
                } else {
                    seen.push(a.clone());
                    true
                }
            })
            .collect();
        self.module_name = module_id.to_string();
        self
    }
}

impl fmt::Debug for CommandMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandMeta")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("module_name", &self.module_name)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}
