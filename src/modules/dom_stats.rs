//! Catalog module: DOM shape and document size

use crate::error::ProbeError;
use crate::registry::{ModuleContext, ModuleDescriptor, ProbeModule};
use async_trait::async_trait;
use std::sync::Arc;

const DOM_SCRIPT: &str = r#"(function () {
    if (!document.documentElement) { return null; }
    var maxDepth = 0;
    var walk = function (node, depth) {
        if (depth > maxDepth) { maxDepth = depth; }
        var children = node.children || [];
        for (var i = 0; i < children.length; i++) {
            walk(children[i], depth + 1);
        }
    };
    walk(document.documentElement, 1);
    return {
        domElements: document.getElementsByTagName('*').length,
        domDepth: maxDepth,
        documentTitle: document.title || ''
    };
})()"#;

pub struct DomStats;

impl DomStats {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DomStats {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for DomStats {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new("dom-stats")
    }

    fn attach(&self, _ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn collect(&self, ctx: &Arc<ModuleContext>) -> Result<(), ProbeError> {
        let stats = ctx.evaluate(DOM_SCRIPT).await?;
        if let Some(stats) = stats.as_object() {
            if let Some(count) = stats.get("domElements").and_then(|v| v.as_f64()) {
                ctx.set_metric("domElements", count, true);
            }
            if let Some(depth) = stats.get("domDepth").and_then(|v| v.as_f64()) {
                ctx.set_metric("domDepth", depth, true);
            }
            if let Some(title) = stats.get("documentTitle").and_then(|v| v.as_str()) {
                ctx.set_metric("documentTitle", title, true);
            }
        }

        let source = ctx.page_source().await?;
        ctx.set_metric("htmlSize", source.len(), true);
        Ok(())
    }
}
