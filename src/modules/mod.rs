//! Built-in module catalog
//!
//! Core modules load unconditionally before anything else; catalog
//! modules are the default discovery set, loaded when no explicit module
//! list is configured.

use crate::registry::ProbeModule;
use std::sync::Arc;

mod dom_stats;
mod navigation_timings;
mod page_events;
mod requests_monitor;
mod screenshot;

pub use dom_stats::DomStats;
pub use navigation_timings::NavigationTimings;
pub use page_events::PageEvents;
pub use requests_monitor::RequestsMonitor;
pub use screenshot::Screenshot;

/// Fixed core set, in load order.
pub fn core_modules() -> Vec<Arc<dyn ProbeModule>> {
    vec![
        Arc::new(RequestsMonitor::new()),
        Arc::new(PageEvents::new()),
    ]
}

/// Default discovery catalog, in discovery order.
pub fn catalog_modules() -> Vec<Arc<dyn ProbeModule>> {
    vec![
        Arc::new(NavigationTimings::new()),
        Arc::new(DomStats::new()),
        Arc::new(Screenshot::new()),
    ]
}

/// Resolve a catalog module by name.
pub fn catalog_module(name: &str) -> Option<Arc<dyn ProbeModule>> {
    catalog_modules()
        .into_iter()
        .find(|m| m.descriptor().name == name)
}
