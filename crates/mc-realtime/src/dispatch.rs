use mc_core::Event;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Opaque handle returned by registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    by_type: HashMap<String, Vec<(HandlerId, Handler)>>,
    any: Vec<(HandlerId, Handler)>,
}

/// Handler registry for incoming events.
///
/// Every event goes to the handlers registered for its exact type string and
/// to every any-message observer. A panicking handler is caught and logged;
/// it never takes down the other handlers or the connection loop.
#[derive(Default)]
pub struct Dispatcher {
    next_id: AtomicU64,
    handlers: Mutex<Handlers>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on(&self, kind: &str, handler: impl Fn(&Event) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_id();
        let mut handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
        handlers
            .by_type
            .entry(kind.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn on_any(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_id();
        let mut handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
        handlers.any.push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler. Returns false when the id was not registered for
    /// that type.
    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
        let Some(list) = handlers.by_type.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(entry, _)| *entry != id);
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.by_type.remove(kind);
        }
        removed
    }

    pub fn off_any(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
        let before = handlers.any.len();
        handlers.any.retain(|(entry, _)| *entry != id);
        handlers.any.len() < before
    }

    pub fn dispatch(&self, event: &Event) {
        let targets: Vec<Handler> = {
            let handlers = self.handlers.lock().unwrap_or_else(|p| p.into_inner());
            let typed = handlers
                .by_type
                .get(event.kind.as_str())
                .into_iter()
                .flatten();
            typed
                .chain(handlers.any.iter())
                .map(|(_, handler)| handler.clone())
                .collect()
        };
        for handler in targets {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = "handler_panic", kind = %event.kind);
            }
        }
    }
}
