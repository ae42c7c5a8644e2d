//! # Pageprobe
//!
//! A page-load instrumentation tool built on Chrome headless. Pageprobe
//! loads a single URL, watches every request, response and in-page event
//! the browser reports, runs a set of metrics modules over the traffic,
//! and emits one JSON report. The process exit code encodes the outcome,
//! making it directly usable as a CI performance gate.
//!
//! ## How a run works
//!
//! 1. Configuration is resolved from an optional JSON file plus CLI
//!    overrides. Any failure here exits with the reserved config code
//!    before the browser is touched.
//! 2. Modules are loaded: a fixed core set, then either an explicit
//!    ordered list or the discovered catalog plus script modules from
//!    extra search directories. Each module gets a capability-scoped
//!    context, never the orchestrator itself.
//! 3. The page is navigated. Engine callbacks are fanned out over a
//!    synchronous event bus and mirrored into the network activity
//!    tracker.
//! 4. The run completes when both the load event has fired and the
//!    network has been quiet for one second, or when the global timeout
//!    forces an early report.
//! 5. Exactly one report is generated: modules run their collection
//!    pass, assertion thresholds are evaluated and the JSON document is
//!    written to the configured sink.
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success, all assertions passed |
//! | 1-251 | number of failed assertions (clamped) |
//! | 252 | global timeout forced the report |
//! | 253 | configuration failure |
//! | 254 | page load failed |
//! | 255 | unclassified error |
//!
//! ## CLI usage
//!
//! ```bash
//! pageprobe --url https://example.com --assert requests=30 \
//!     --assert domElements=2000 --output report.json
//! ```

/// Completion barrier joining independent asynchronous units
pub mod barrier;

/// Browser engine trait and the Chrome DevTools Protocol adapter
pub mod browser;

/// Command-line interface and configuration loading
pub mod cli;

/// Run configuration, viewport and cookie parsing
pub mod config;

/// Error types and process exit-code policy
pub mod error;

/// Synchronous publish/subscribe event bus
pub mod events;

/// Metric store, offenders and assertion evaluation
pub mod metrics;

/// Built-in metrics modules
pub mod modules;

/// Network activity tracking and idle detection
pub mod network;

/// Run orchestration state machine
pub mod orchestrator;

/// Module registry and the capability façade handed to modules
pub mod registry;

/// Final report assembly and serialization
pub mod report;

#[cfg(test)]
mod tests;

pub use barrier::*;
pub use browser::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use metrics::*;
pub use network::*;
pub use orchestrator::*;
pub use registry::*;
pub use report::*;
