//! Plugin registry and capability façade
//!
//! Modules never see the orchestrator: each accepted module receives a
//! [`ModuleContext`] exposing only event subscription, run parameters,
//! metric mutation, offender reporting, scoped logging and the narrow
//! browser operations a metrics plugin legitimately needs. Timers, the
//! completion barrier and exit logic stay out of reach.

use crate::browser::PageEngine;
use crate::error::ProbeError;
use crate::events::{Event, EventBus, EventKind};
use crate::metrics::{MetricValue, MetricsStore};
use crate::modules;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Resolved module identity, fixed once per run at load time.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: Option<String>,
    pub skip: bool,
}

impl ModuleDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            skip: false,
        }
    }

    pub fn with_version(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Some(version.to_string()),
            skip: false,
        }
    }
}

/// Contract every metrics plugin satisfies.
#[async_trait]
pub trait ProbeModule: Send + Sync {
    fn descriptor(&self) -> ModuleDescriptor;

    /// Subscribe to bus events at load time. Handlers run synchronously
    /// during dispatch and must not block.
    fn attach(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError>;

    /// Collect in-page data at report time, after the `report` event.
    async fn collect(&self, _ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Collaborators a façade is built from.
#[derive(Clone)]
pub struct ModuleDeps {
    pub bus: Arc<EventBus>,
    pub store: Arc<MetricsStore>,
    pub params: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    pub engine: Arc<dyn PageEngine>,
}

/// Capability-scoped façade handed to a module instead of the
/// orchestrator itself. Constructed per module at load time.
pub struct ModuleContext {
    module: String,
    deps: ModuleDeps,
}

impl ModuleContext {
    fn new(module: &str, deps: ModuleDeps) -> Arc<Self> {
        Arc::new(Self {
            module: module.to_string(),
            deps,
        })
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    // -- event subscription ------------------------------------------------

    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.deps.bus.on(kind, handler);
    }

    pub fn once<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.deps.bus.once(kind, handler);
    }

    pub fn emit(&self, event: &Event) {
        self.deps.bus.emit(event);
    }

    // -- run parameters ----------------------------------------------------

    pub fn get_param(&self, key: &str) -> Option<serde_json::Value> {
        self.deps.params.lock().unwrap().get(key).cloned()
    }

    pub fn set_param(&self, key: &str, value: serde_json::Value) {
        self.deps.params.lock().unwrap().insert(key.to_string(), value);
    }

    // -- metrics -----------------------------------------------------------

    pub fn set_metric(&self, name: &str, value: impl Into<MetricValue>, is_final: bool) {
        self.deps.store.set_metric(name, value, is_final);
    }

    pub fn incr_metric(&self, name: &str, incr: f64) {
        self.deps.store.incr_metric(name, incr);
    }

    pub fn set_marker_metric(&self, name: &str) -> Result<f64, ProbeError> {
        self.deps.store.set_marker_metric(name)
    }

    pub fn add_offender(&self, metric: &str, message: impl Into<String>) {
        self.deps.store.add_offender(metric, message);
    }

    /// Read a value from the in-page scope object and record it as a
    /// final metric. Missing numeric values normalize to zero.
    pub async fn set_metric_from_scope(&self, name: &str, key: &str) -> Result<(), ProbeError> {
        let value = self.get_from_scope(key).await?;
        let metric = match value {
            serde_json::Value::Number(n) => MetricValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => MetricValue::Text(s),
            _ => MetricValue::Number(0.0),
        };
        self.deps.store.set_metric(name, metric, true);
        Ok(())
    }

    /// Read a raw value from the in-page scope object.
    pub async fn get_from_scope(&self, key: &str) -> Result<serde_json::Value, ProbeError> {
        let expression = format!(
            "(window.__pageprobe_scope && window.__pageprobe_scope[{}]) ?? null",
            serde_json::to_string(key)?
        );
        self.deps.engine.evaluate(&expression).await
    }

    // -- logging -----------------------------------------------------------

    pub fn log(&self, message: &str) {
        info!(module = %self.module, "{message}");
    }

    // -- narrow browser operations ------------------------------------------

    pub async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, ProbeError> {
        self.deps.engine.evaluate(expression).await
    }

    pub async fn inject_script(&self, path: &Path) -> Result<(), ProbeError> {
        self.deps.engine.inject_script(path).await
    }

    pub async fn render(&self, path: &Path) -> Result<(), ProbeError> {
        self.deps.engine.render(path).await
    }

    pub async fn set_zoom(&self, factor: f64) -> Result<(), ProbeError> {
        self.deps.engine.set_zoom(factor).await
    }

    pub async fn page_source(&self) -> Result<String, ProbeError> {
        self.deps.engine.page_source().await
    }
}

/// Discovers, filters and initializes modules with least privilege.
pub struct ModuleRegistry {
    deps: ModuleDeps,
    skip: HashSet<String>,
    loaded: Vec<(Arc<dyn ProbeModule>, Arc<ModuleContext>)>,
}

impl ModuleRegistry {
    pub fn new(deps: ModuleDeps, skip_list: &[String]) -> Self {
        Self {
            deps,
            skip: skip_list.iter().cloned().collect(),
            loaded: Vec::new(),
        }
    }

    /// Load the fixed built-in core set, in order, before anything else.
    pub fn load_core(&mut self) {
        for module in modules::core_modules() {
            self.init_module(module);
        }
    }

    /// Load the explicitly-listed modules in order, or discover every
    /// eligible module: the built-in catalog first, then script modules
    /// from each extra search directory in order.
    pub fn load_discovered(&mut self, explicit: Option<&[String]>, search_dirs: &[PathBuf]) {
        match explicit {
            Some(names) => {
                for name in names {
                    match modules::catalog_module(name) {
                        Some(module) => self.init_module(module),
                        None => {
                            // non-fatal: log and continue with the rest
                            warn!(module = %name, "module not found, skipping");
                        }
                    }
                }
            }
            None => {
                for module in modules::catalog_modules() {
                    self.init_module(module);
                }
                for dir in search_dirs {
                    for module in discover_script_modules(dir) {
                        self.init_module(module);
                    }
                }
            }
        }
    }

    /// Load a single module instance directly, subject to the same
    /// filtering as discovery. This is the embedding hook for modules
    /// built outside the catalog.
    pub fn load_module(&mut self, module: Arc<dyn ProbeModule>) {
        self.init_module(module);
    }

    fn init_module(&mut self, module: Arc<dyn ProbeModule>) {
        let descriptor = module.descriptor();
        if descriptor.skip {
            info!(module = %descriptor.name, "module declares itself skippable, not initializing");
            return;
        }
        if self.skip.contains(&descriptor.name) {
            info!(module = %descriptor.name, "module on skip-list, not initializing");
            return;
        }
        if self
            .loaded
            .iter()
            .any(|(m, _)| m.descriptor().name == descriptor.name)
        {
            debug!(module = %descriptor.name, "module already loaded");
            return;
        }

        let ctx = ModuleContext::new(&descriptor.name, self.deps.clone());
        if let Err(e) = module.attach(&ctx) {
            warn!(module = %descriptor.name, "module failed to attach: {e}");
            return;
        }

        match &descriptor.version {
            Some(version) => info!(module = %descriptor.name, %version, "module initialized"),
            None => info!(module = %descriptor.name, "module initialized"),
        }
        self.loaded.push((module, ctx));
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded
            .iter()
            .map(|(m, _)| m.descriptor().name)
            .collect()
    }

    /// Report-time collection pass. A failing module is a module-local
    /// concern: log and continue.
    pub async fn collect_all(&self) {
        for (module, ctx) in &self.loaded {
            if let Err(e) = module.collect(ctx).await {
                warn!(module = %module.descriptor().name, "collect failed: {e}");
            }
        }
    }
}

// -- filesystem script modules ----------------------------------------------

#[derive(Debug, Deserialize)]
struct ScriptModuleDescriptor {
    name: String,
    version: Option<String>,
    #[serde(default)]
    skip: bool,
    script: String,
}

/// A third-party module: a directory with a `module.json` descriptor and a
/// collector script evaluated in page context at report time. The script
/// must return `{"metrics": {...}, "offenders": {"metric": ["..."]}}`.
pub struct ScriptModule {
    descriptor: ModuleDescriptor,
    script_path: PathBuf,
}

#[async_trait]
impl ProbeModule for ScriptModule {
    fn descriptor(&self) -> ModuleDescriptor {
        self.descriptor.clone()
    }

    fn attach(&self, _ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn collect(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        let source = std::fs::read_to_string(&self.script_path).map_err(|e| {
            ProbeError::ModuleResolution(format!(
                "cannot read {}: {e}",
                self.script_path.display()
            ))
        })?;
        let result = ctx.evaluate(&source).await?;

        if let Some(metrics) = result.get("metrics").and_then(|m| m.as_object()) {
            for (name, value) in metrics {
                match value {
                    serde_json::Value::Number(n) => {
                        ctx.set_metric(name, n.as_f64().unwrap_or(0.0), true)
                    }
                    serde_json::Value::String(s) => ctx.set_metric(name, s.clone(), true),
                    _ => debug!(module = %self.descriptor.name, metric = %name,
                        "ignoring non-scalar metric value"),
                }
            }
        }
        if let Some(offenders) = result.get("offenders").and_then(|o| o.as_object()) {
            for (metric, messages) in offenders {
                for message in messages.as_array().into_iter().flatten() {
                    if let Some(text) = message.as_str() {
                        ctx.add_offender(metric, text);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Scan a directory for script modules. A malformed or unreadable
/// descriptor is logged and skipped, never fatal.
pub fn discover_script_modules(dir: &Path) -> Vec<Arc<dyn ProbeModule>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "cannot read module directory: {e}");
            return Vec::new();
        }
    };

    let mut discovered: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.join("module.json").is_file())
        .collect();
    discovered.sort();

    let mut modules: Vec<Arc<dyn ProbeModule>> = Vec::new();
    for module_dir in discovered {
        let descriptor_path = module_dir.join("module.json");
        let descriptor: ScriptModuleDescriptor = match std::fs::read_to_string(&descriptor_path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
        {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(path = %descriptor_path.display(), "malformed module descriptor: {e}");
                continue;
            }
        };

        modules.push(Arc::new(ScriptModule {
            descriptor: ModuleDescriptor {
                name: descriptor.name,
                version: descriptor.version,
                skip: descriptor.skip,
            },
            script_path: module_dir.join(descriptor.script),
        }));
    }
    modules
}
