//! Core module: HTTP traffic accounting
//!
//! Counts requests, completed responses, aborts, transferred bytes and
//! HTTP errors from the `send`/`recv`/`abort` events, with offenders for
//! everything that deserves a URL in the report.

use crate::error::ProbeError;
use crate::events::{Event, EventKind};
use crate::registry::{ModuleContext, ModuleDescriptor, ProbeModule};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RequestsMonitor;

impl RequestsMonitor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestsMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for RequestsMonitor {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new("requests-monitor")
    }

    fn attach(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        // report zeros even for a page that never does the thing
        for metric in [
            "requests",
            "responses",
            "aborted",
            "bodySize",
            "httpErrors",
            "redirects",
        ] {
            ctx.set_metric(metric, 0u64, false);
        }

        let on_send = ctx.clone();
        ctx.on(EventKind::Send, move |event| {
            if let Event::Send(_) = event {
                on_send.incr_metric("requests", 1.0);
            }
        });

        let on_recv = ctx.clone();
        ctx.on(EventKind::Recv, move |event| {
            if let Event::Recv(response) = event {
                on_recv.incr_metric("responses", 1.0);
                if let Some(size) = response.body_size {
                    on_recv.incr_metric("bodySize", size as f64);
                }
                if response.status >= 400 {
                    on_recv.incr_metric("httpErrors", 1.0);
                    on_recv.add_offender(
                        "httpErrors",
                        format!("{} responded with HTTP {}", response.url, response.status),
                    );
                } else if (300..400).contains(&response.status) {
                    on_recv.incr_metric("redirects", 1.0);
                    on_recv.add_offender(
                        "redirects",
                        format!("{} redirected with HTTP {}", response.url, response.status),
                    );
                }
            }
        });

        let on_abort = ctx.clone();
        ctx.on(EventKind::Abort, move |event| {
            if let Event::Abort(id) = event {
                on_abort.incr_metric("aborted", 1.0);
                on_abort.add_offender("aborted", format!("request {id} was aborted"));
            }
        });

        Ok(())
    }
}
