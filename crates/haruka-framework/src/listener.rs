//! Passive message listeners.
//!
//! Listeners see every inbound message before command dispatch, whether or
//! not it carries a prefix. They are owned by a module id so a reload or
//! unload replaces them together with the module's commands.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, ServiceExt, service_fn};
use tracing::warn;

use crate::context::EventContext;

/// Type-erased, cloneable listener.
pub type Listener = BoxCloneSyncService<Arc<EventContext>, (), BoxError>;

/// Wraps an async function into a [`Listener`].
pub fn listener_fn<F, Fut, E>(f: F) -> Listener
where
    F: Fn(Arc<EventContext>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    BoxCloneSyncService::new(service_fn(move |ctx: Arc<EventContext>| {
        let fut = f(ctx);
        async move { fut.await.map_err(Into::into) }
    }))
}

/// Listeners grouped by owning module.
#[derive(Default)]
pub struct ListenerRegistry {
    by_module: RwLock<BTreeMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every listener owned by `module_id`.
    ///
    /// An empty list removes the module's entry.
    pub fn replace(&self, module_id: &str, listeners: Vec<Listener>) {
        let mut map = self.by_module.write();
        if listeners.is_empty() {
            map.remove(module_id);
        } else {
            map.insert(module_id.to_string(), listeners);
        }
    }

    /// Removes the listeners owned by `module_id`. Returns how many there
    /// were.
    pub fn remove(&self, module_id: &str) -> usize {
        self.by_module
            .write()
            .remove(module_id)
            .map_or(0, |l| l.len())
    }

    /// Number of listeners owned by `module_id`.
    pub fn count(&self, module_id: &str) -> usize {
        self.by_module.read().get(module_id).map_or(0, Vec::len)
    }

    /// Runs every listener on `ctx`, in module-id order.
    ///
    /// Failures are logged and never stop the remaining listeners or the
    /// command dispatch that follows.
    pub async fn notify(&self, ctx: &Arc<EventContext>) {
        let snapshot: Vec<(String, Listener)> = {
            let map = self.by_module.read();
            map.iter()
                .flat_map(|(id, ls)| ls.iter().map(move |l| (id.clone(), l.clone())))
                .collect()
        };

        for (module, listener) in snapshot {
            if let Err(e) = listener.oneshot(Arc::clone(ctx)).await {
                warn!(
                    module = %module,
                    chat = ctx.event().chat_id,
                    error = %e,
                    "Listener failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.by_module.read();
        f.debug_map()
            .entries(map.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}
