//! Catalog module: navigation timing metrics
//!
//! Reads the browser's `performance.timing` record at report time and
//! derives the standard backend/frontend split. Also records a marker
//! metric for the gap between the last completed response and the load
//! event.

use crate::error::ProbeError;
use crate::events::EventKind;
use crate::registry::{ModuleContext, ModuleDescriptor, ProbeModule};
use async_trait::async_trait;
use std::sync::Arc;

const TIMINGS_SCRIPT: &str = r#"(function () {
    var t = window.performance && window.performance.timing;
    if (!t || !t.navigationStart) { return null; }
    return {
        timeToFirstByte: t.responseStart - t.navigationStart,
        timeToLastByte: t.responseEnd - t.navigationStart,
        domInteractive: t.domInteractive - t.navigationStart,
        domContentLoaded: t.domContentLoadedEventEnd - t.navigationStart,
        domComplete: t.domComplete - t.navigationStart,
        loadEvent: t.loadEventEnd - t.navigationStart
    };
})()"#;

pub struct NavigationTimings;

impl NavigationTimings {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NavigationTimings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for NavigationTimings {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new("navigation-timings")
    }

    fn attach(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        // elapsed time from the last completed response to the load event
        let on_load = ctx.clone();
        ctx.once(EventKind::LoadFinished, move |_| {
            if let Err(e) = on_load.set_marker_metric("responseToLoadDelay") {
                // a load that finished without any response is a broken page
                on_load.log(&format!("marker metric unavailable: {e}"));
            }
        });
        Ok(())
    }

    async fn collect(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        let timings = ctx.evaluate(TIMINGS_SCRIPT).await?;
        let Some(timings) = timings.as_object() else {
            ctx.log("performance.timing not available");
            return Ok(());
        };

        for (name, value) in timings {
            // negative deltas mean the phase never happened (e.g. report
            // forced by timeout before the load event)
            if let Some(ms) = value.as_f64().filter(|ms| *ms >= 0.0) {
                ctx.set_metric(name, ms, true);
            }
        }
        Ok(())
    }
}
