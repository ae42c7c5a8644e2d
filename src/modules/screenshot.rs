//! Catalog module: final page render
//!
//! Renders the page to the file named by the `screenshot` run parameter,
//! applying the optional `zoom` parameter first. A no-op when the
//! parameter is unset.

use crate::error::ProbeError;
use crate::registry::{ModuleContext, ModuleDescriptor, ProbeModule};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Screenshot;

impl Screenshot {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Screenshot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for Screenshot {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new("screenshot")
    }

    fn attach(&self, _ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn collect(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        let Some(path) = ctx
            .get_param("screenshot")
            .and_then(|v| v.as_str().map(PathBuf::from))
        else {
            return Ok(());
        };

        if let Some(zoom) = ctx.get_param("zoom").and_then(|v| v.as_f64()) {
            ctx.set_zoom(zoom).await?;
        }

        ctx.render(&path).await?;
        ctx.log(&format!("page rendered to {}", path.display()));
        ctx.set_metric("screenshot", path.display().to_string(), true);
        Ok(())
    }
}
