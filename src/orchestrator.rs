//! Run orchestration
//!
//! Drives a single instrumentation run through its states: module loading,
//! engine preparation, navigation, awaiting completion (network idle plus
//! the load event, joined by the barrier), then exactly one report. Every
//! terminal path funnels through the same report latch and exit mapping.

use crate::barrier::AsyncBarrier;
use crate::browser::{PageEngine, PageEvent};
use crate::config::Config;
use crate::error::{exit_code, ProbeError};
use crate::events::{Event, EventBus, EventKind, LoadStatus, RequestRecord, ResponseRecord};
use crate::metrics::{MetricsStore, TracingSink};
use crate::network::{NetworkActivityTracker, NetworkSignal};
use crate::registry::{ModuleDeps, ModuleRegistry};
use crate::report::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// One-shot guard around report generation. Whichever terminal path wins
/// the race produces the report; later callers get the recorded exit code.
struct ReportLatch {
    fired: AtomicBool,
    code: AtomicI32,
}

impl ReportLatch {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            code: AtomicI32::new(exit_code::ERROR),
        }
    }

    fn try_fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    fn record(&self, code: i32) {
        self.code.store(code, Ordering::SeqCst);
    }

    fn code(&self) -> i32 {
        self.code.load(Ordering::SeqCst)
    }
}

pub struct Orchestrator {
    config: Config,
    engine: Arc<dyn PageEngine>,
    bus: Arc<EventBus>,
    store: Arc<MetricsStore>,
    registry: ModuleRegistry,
    latch: ReportLatch,
}

impl Orchestrator {
    /// Wire the bus, the store and the module registry, and load every
    /// accepted module. Modules attach their event handlers here, before
    /// navigation can emit anything.
    pub fn new(config: Config, engine: Arc<dyn PageEngine>) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MetricsStore::new(Box::new(TracingSink)));
        store.bind_bus(Arc::downgrade(&bus));
        store.set_asserts(&config.asserts);

        let mut params = config.params.clone();
        if let Some(path) = &config.screenshot {
            params.insert(
                "screenshot".to_string(),
                serde_json::Value::String(path.display().to_string()),
            );
        }
        if let Some(zoom) = config.zoom_factor {
            if let Some(zoom) = serde_json::Number::from_f64(zoom) {
                params.insert("zoom".to_string(), serde_json::Value::Number(zoom));
            }
        }

        let deps = ModuleDeps {
            bus: bus.clone(),
            store: store.clone(),
            params: Arc::new(Mutex::new(params)),
            engine: engine.clone(),
        };
        let mut registry = ModuleRegistry::new(deps, &config.skip_modules);
        registry.load_core();
        registry.load_discovered(config.modules.as_deref(), &config.module_dirs);
        info!(modules = ?registry.loaded_names(), "modules loaded");

        Self {
            config,
            engine,
            bus,
            store,
            registry,
            latch: ReportLatch::new(),
        }
    }

    /// Run to completion and return the process exit code. The engine is
    /// shut down on every path, including failures.
    pub async fn run(self) -> i32 {
        let code = match self.execute().await {
            Ok(code) => code,
            Err(e) => {
                error!("run aborted: {e}");
                match e {
                    ProbeError::ConfigParse(_) => exit_code::CONFIG_FAILED,
                    ProbeError::PageLoad(_) => exit_code::LOAD_FAILED,
                    ProbeError::Timeout(_) => exit_code::TIMED_OUT,
                    _ => exit_code::ERROR,
                }
            }
        };
        if let Err(e) = self.engine.close().await {
            warn!("browser shutdown failed: {e}");
        }
        info!(code, "run finished");
        code
    }

    async fn execute(&self) -> Result<i32, ProbeError> {
        self.store
            .set_metric("url", self.config.url.as_str(), false);

        self.engine.set_viewport(&self.config.viewport).await?;
        if let Some(user_agent) = &self.config.user_agent {
            self.engine.set_user_agent(user_agent).await?;
        }
        self.engine
            .set_javascript_enabled(self.config.javascript_enabled)
            .await?;
        for cookie in &self.config.cookies {
            self.engine.set_cookie(cookie).await?;
        }
        if let Some(zoom) = self.config.zoom_factor {
            self.engine.set_zoom(zoom).await?;
        }

        let events = self
            .engine
            .take_events()
            .ok_or_else(|| ProbeError::Engine("engine event stream already taken".to_string()))?;
        let (net_tx, tracker) = NetworkActivityTracker::channel();
        let pump = spawn_event_pump(
            self.bus.clone(),
            self.store.clone(),
            net_tx.clone(),
            events,
        );

        // completion requires both units: network idle and the load event
        let barrier = AsyncBarrier::new();
        barrier.push(|handle| tracker.run(handle));
        let bus = self.bus.clone();
        barrier.push(move |handle| {
            bus.once(EventKind::LoadFinished, move |_| handle.done());
            std::future::ready(())
        });

        self.bus.emit(&Event::Init);

        let deadline = Instant::now() + self.config.timeout();
        info!(url = %self.config.url, timeout = ?self.config.timeout(), "navigation starting");
        self.bus.emit(&Event::LoadStarted);

        let status = match timeout_at(deadline, self.engine.open(&self.config.url)).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("navigation exceeded the global timeout");
                self.on_timeout(&net_tx);
                let code = self.report(true).await;
                pump.abort();
                return Ok(code);
            }
        };

        if let LoadStatus::Failed(reason) = status {
            warn!(%reason, "page load failed");
            self.bus
                .emit(&Event::LoadFinished(LoadStatus::Failed(reason)));
            // best-effort report so partial metrics are not lost
            let _ = self.report(false).await;
            pump.abort();
            return Ok(exit_code::LOAD_FAILED);
        }

        let code = tokio::select! {
            _ = barrier.wait() => {
                debug!("completion barrier satisfied");
                self.report(false).await
            }
            _ = sleep_until(deadline) => {
                warn!("global timeout reached before completion");
                self.on_timeout(&net_tx);
                self.report(true).await
            }
        };
        pump.abort();
        Ok(code)
    }

    fn on_timeout(&self, net_tx: &mpsc::UnboundedSender<NetworkSignal>) {
        self.bus.emit(&Event::Timeout);
        let _ = net_tx.send(NetworkSignal::Timeout);
    }

    /// Produce the report, at most once per run. Emits the `report` event,
    /// runs every module's collection pass, evaluates assertions, writes
    /// the serialized report and returns the exit code.
    async fn report(&self, timed_out: bool) -> i32 {
        if !self.latch.try_fire() {
            debug!("report already generated");
            return self.latch.code();
        }

        self.bus.emit(&Event::Report);
        self.registry.collect_all().await;

        let failed = self.store.evaluate_asserts();
        for metric in &failed {
            warn!(%metric, "assertion failed");
        }

        let report = Report::build(&self.config.url, &self.store, timed_out);
        if let Err(e) = report.write(self.config.output.as_deref()).await {
            error!("cannot write report: {e}");
            self.latch.record(exit_code::ERROR);
            return exit_code::ERROR;
        }

        let code = if timed_out {
            exit_code::TIMED_OUT
        } else {
            exit_code::from_failed_asserts(failed.len())
        };
        self.latch.record(code);
        code
    }
}

/// Translate engine lifecycle events into bus events and network signals.
/// Response metadata arrives before the loading-finished marker, so it is
/// cached per request id and joined into a single `recv` emission.
fn spawn_event_pump(
    bus: Arc<EventBus>,
    store: Arc<MetricsStore>,
    net_tx: mpsc::UnboundedSender<NetworkSignal>,
    mut events: mpsc::UnboundedReceiver<PageEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut responses: HashMap<String, ResponseRecord> = HashMap::new();
        let mut load_fired = false;

        while let Some(event) = events.recv().await {
            match event {
                PageEvent::RequestWillBeSent { id, url } => {
                    bus.emit(&Event::Send(RequestRecord {
                        id: id.clone(),
                        url: url.clone(),
                    }));
                    let _ = net_tx.send(NetworkSignal::Send { id, url });
                }
                PageEvent::ResponseReceived {
                    id,
                    url,
                    status,
                    mime_type,
                    body_size,
                } => {
                    responses.insert(
                        id.clone(),
                        ResponseRecord {
                            id,
                            url,
                            status,
                            mime_type: Some(mime_type),
                            body_size,
                        },
                    );
                }
                PageEvent::LoadingFinished { id } => {
                    store.record_response_end(std::time::Instant::now());
                    let record = responses.remove(&id).unwrap_or_else(|| ResponseRecord {
                        id: id.clone(),
                        url: String::new(),
                        status: 0,
                        mime_type: None,
                        body_size: None,
                    });
                    bus.emit(&Event::Recv(record));
                    let _ = net_tx.send(NetworkSignal::Recv { id });
                }
                PageEvent::LoadingFailed { id } => {
                    responses.remove(&id);
                    bus.emit(&Event::Abort(id.clone()));
                    let _ = net_tx.send(NetworkSignal::Abort { id });
                }
                PageEvent::LoadEventFired => {
                    // late re-fires (e.g. in-page navigations) are ignored
                    if !load_fired {
                        load_fired = true;
                        bus.emit(&Event::LoadFinished(LoadStatus::Success));
                    }
                }
                PageEvent::Console(message) => bus.emit(&Event::ConsoleMessage(message)),
                PageEvent::PageError(message) => bus.emit(&Event::PageError(message)),
                PageEvent::Dialog(message) => bus.emit(&Event::Dialog(message)),
            }
        }
        debug!("engine event stream closed");
    })
}
