//! In-process synchronous publish/subscribe channel
//!
//! Every lifecycle signal in a run travels over this bus: browser engine
//! callbacks, internal timers and module notifications are all translated
//! into [`Event`] values and dispatched synchronously, in registration
//! order, to the handlers subscribed for that event kind.

use crate::metrics::MetricValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A single in-flight HTTP request as reported by the browser engine.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: String,
    pub url: String,
}

/// A completed HTTP response as reported by the browser engine.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub id: String,
    pub url: String,
    pub status: u16,
    pub mime_type: Option<String>,
    pub body_size: Option<u64>,
}

/// Terminal status of the page load as reported by the browser engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    Failed(String),
}

/// Events carried on the bus. Each variant has a fixed payload shape;
/// handlers subscribe per [`EventKind`].
#[derive(Debug, Clone)]
pub enum Event {
    /// Page object initialized, before navigation starts.
    Init,
    /// Navigation has begun.
    LoadStarted,
    /// An HTTP request left the engine.
    Send(RequestRecord),
    /// An HTTP response completed.
    Recv(ResponseRecord),
    /// An in-flight request was aborted; payload is the request id.
    Abort(String),
    /// The engine reported the load finished with the given status.
    LoadFinished(LoadStatus),
    /// The global run timeout elapsed before completion.
    Timeout,
    /// Report generation is starting; observers may still mutate results.
    Report,
    /// A metric was declared final.
    Metric { name: String, value: MetricValue },
    /// A console message originated inside the page.
    ConsoleMessage(String),
    /// A script error originated inside the page.
    PageError(String),
    /// The page opened an alert/confirm/prompt dialog.
    Dialog(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Init,
    LoadStarted,
    Send,
    Recv,
    Abort,
    LoadFinished,
    Timeout,
    Report,
    Metric,
    ConsoleMessage,
    PageError,
    Dialog,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Init => EventKind::Init,
            Event::LoadStarted => EventKind::LoadStarted,
            Event::Send(_) => EventKind::Send,
            Event::Recv(_) => EventKind::Recv,
            Event::Abort(_) => EventKind::Abort,
            Event::LoadFinished(_) => EventKind::LoadFinished,
            Event::Timeout => EventKind::Timeout,
            Event::Report => EventKind::Report,
            Event::Metric { .. } => EventKind::Metric,
            Event::ConsoleMessage(_) => EventKind::ConsoleMessage,
            Event::PageError(_) => EventKind::PageError,
            Event::Dialog(_) => EventKind::Dialog,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind() {
            EventKind::Init => "init",
            EventKind::LoadStarted => "loadStarted",
            EventKind::Send => "send",
            EventKind::Recv => "recv",
            EventKind::Abort => "abort",
            EventKind::LoadFinished => "loadFinished",
            EventKind::Timeout => "timeout",
            EventKind::Report => "report",
            EventKind::Metric => "metric",
            EventKind::ConsoleMessage => "consoleMessage",
            EventKind::PageError => "pageError",
            EventKind::Dialog => "dialog",
        }
    }
}

type Handler = Arc<Mutex<dyn FnMut(&Event) + Send>>;

#[derive(Clone)]
struct Registration {
    id: u64,
    once: bool,
    fired: Arc<AtomicBool>,
    handler: Handler,
}

/// Synchronous fan-out bus. `emit` invokes all handlers registered for the
/// event's kind, in registration order, before returning to the caller.
/// Handler panics are not caught. Handlers registered while a dispatch is
/// running take effect from the next emission.
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a persistent handler for the given event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.register(kind, handler, false);
    }

    /// Register a handler removed after its first invocation.
    pub fn once<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.register(kind, handler, true);
    }

    fn register<F>(&self, kind: EventKind, handler: F, once: bool)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let registration = Registration {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            once,
            fired: Arc::new(AtomicBool::new(false)),
            handler: Arc::new(Mutex::new(handler)),
        };
        self.handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(registration);
    }

    /// Dispatch an event to all currently-registered handlers for its kind.
    ///
    /// The registration list is snapshotted before invocation so a handler
    /// may emit further events (including of the same kind) without
    /// deadlocking the bus. A handler that re-emits its own kind is not
    /// re-entered: the inner dispatch skips the handler still running in
    /// the outer one.
    pub fn emit(&self, event: &Event) {
        debug!(event = event.name(), "emit");

        let snapshot: Vec<Registration> = {
            let handlers = self.handlers.lock().unwrap();
            handlers.get(&event.kind()).cloned().unwrap_or_default()
        };

        let mut spent = Vec::new();
        for registration in &snapshot {
            if registration.once {
                // once-semantics survive re-entrant emits of the same kind
                if registration.fired.swap(true, Ordering::SeqCst) {
                    continue;
                }
                spent.push(registration.id);
            }
            match registration.handler.try_lock() {
                Ok(mut handler) => handler(event),
                // held by an outer dispatch on this stack; re-entering
                // the same handler would deadlock on its own mutex
                Err(_) => debug!(event = event.name(), "handler busy, skipping"),
            }
        }

        if !spent.is_empty() {
            let mut handlers = self.handlers.lock().unwrap();
            if let Some(list) = handlers.get_mut(&event.kind()) {
                list.retain(|r| !spent.contains(&r.id));
            }
        }
    }

    /// Number of handlers currently registered for a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
