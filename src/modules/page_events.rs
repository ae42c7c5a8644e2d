//! Core module: in-page diagnostics
//!
//! Maps the engine's debug callbacks (console messages, script errors,
//! dialogs) to metrics and offenders.

use crate::error::ProbeError;
use crate::events::{Event, EventKind};
use crate::registry::{ModuleContext, ModuleDescriptor, ProbeModule};
use async_trait::async_trait;
use std::sync::Arc;

pub struct PageEvents;

impl PageEvents {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PageEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for PageEvents {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new("page-events")
    }

    fn attach(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        for metric in ["consoleMessages", "jsErrors", "dialogs"] {
            ctx.set_metric(metric, 0u64, false);
        }

        let on_console = ctx.clone();
        ctx.on(EventKind::ConsoleMessage, move |event| {
            if let Event::ConsoleMessage(message) = event {
                on_console.incr_metric("consoleMessages", 1.0);
                on_console.add_offender("consoleMessages", message.clone());
            }
        });

        let on_error = ctx.clone();
        ctx.on(EventKind::PageError, move |event| {
            if let Event::PageError(message) = event {
                on_error.incr_metric("jsErrors", 1.0);
                on_error.add_offender("jsErrors", message.clone());
            }
        });

        let on_dialog = ctx.clone();
        ctx.on(EventKind::Dialog, move |event| {
            if let Event::Dialog(message) = event {
                on_dialog.incr_metric("dialogs", 1.0);
                on_dialog.add_offender("dialogs", message.clone());
            }
        });

        Ok(())
    }
}
