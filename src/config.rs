//! Run configuration
//!
//! A run is configured from an optional JSON config file with CLI
//! overrides layered on top. Config parsing happens before any page
//! interaction; a malformed config terminates the process with the
//! reserved config-failure exit code.

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a single instrumented page load.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Target URL to load and instrument.
    pub url: String,

    /// Global run timeout in seconds. The timer is not cancelable and
    /// always wins a race against load completion.
    pub timeout_seconds: u64,

    /// Browser viewport for the load.
    pub viewport: Viewport,

    /// Custom User-Agent string (default: engine default).
    pub user_agent: Option<String>,

    /// Whether JavaScript executes inside the page.
    pub javascript_enabled: bool,

    /// Cookies injected before navigation.
    pub cookies: Vec<Cookie>,

    /// Explicit module list. When set, exactly these modules load, in
    /// order; when unset, every eligible module is discovered.
    pub modules: Option<Vec<String>>,

    /// Modules never initialized even when discovered or listed.
    pub skip_modules: Vec<String>,

    /// Extra directories searched for script modules.
    pub module_dirs: Vec<PathBuf>,

    /// Assertion thresholds keyed by metric name.
    pub asserts: HashMap<String, f64>,

    /// Free-form run parameters readable and writable by modules.
    pub params: HashMap<String, serde_json::Value>,

    /// Report destination; stdout when unset.
    pub output: Option<PathBuf>,

    /// Screenshot destination; rendering is skipped when unset.
    pub screenshot: Option<PathBuf>,

    /// Path to the Chrome/Chromium executable (default: auto-detect).
    pub chrome_path: Option<String>,

    /// Page zoom factor applied before the load.
    pub zoom_factor: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_seconds: 15,
            viewport: Viewport::default(),
            user_agent: None,
            javascript_enabled: true,
            cookies: Vec::new(),
            modules: None,
            skip_modules: Vec::new(),
            module_dirs: Vec::new(),
            asserts: HashMap::new(),
            params: HashMap::new(),
            output: None,
            screenshot: None,
            chrome_path: None,
            zoom_factor: None,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.url.is_empty() {
            return Err(ProbeError::ConfigParse("no target URL supplied".into()));
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| ProbeError::ConfigParse(format!("invalid URL '{}': {e}", self.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProbeError::ConfigParse(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(ProbeError::ConfigParse("timeout must be greater than 0".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ProbeError::ConfigParse(
                "viewport dimensions must be greater than 0".into(),
            ));
        }
        for cookie in &self.cookies {
            if cookie.name.is_empty() || cookie.domain.is_empty() {
                return Err(ProbeError::ConfigParse(
                    "cookies require at least a name and a domain".into(),
                ));
            }
        }
        Ok(())
    }

    /// Host of the target URL, used to default cookie domains.
    pub fn target_host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// Browser viewport used for the load.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

impl Viewport {
    /// Parse a `WIDTHxHEIGHT` spec, e.g. `1366x768`.
    pub fn parse(spec: &str) -> Result<Self, ProbeError> {
        let (w, h) = spec
            .split_once('x')
            .ok_or_else(|| ProbeError::ConfigParse(format!("invalid viewport '{spec}'")))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| ProbeError::ConfigParse(format!("invalid viewport width '{w}'")))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| ProbeError::ConfigParse(format!("invalid viewport height '{h}'")))?;
        Ok(Self {
            width,
            height,
            ..Self::default()
        })
    }
}

/// A cookie injected before navigation. Name, value and domain are the
/// required minimum the engine accepts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: Option<String>,
}

impl Cookie {
    /// Parse a `name=value[;domain=...][;path=...]` cookie string. The
    /// domain falls back to `default_domain` when the string omits it.
    pub fn parse(spec: &str, default_domain: Option<&str>) -> Result<Self, ProbeError> {
        let mut parts = spec.split(';').map(str::trim);
        let pair = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProbeError::ConfigParse(format!("empty cookie spec '{spec}'")))?;
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| ProbeError::ConfigParse(format!("invalid cookie spec '{spec}'")))?;
        if name.trim().is_empty() {
            return Err(ProbeError::ConfigParse(format!(
                "cookie spec '{spec}' has no name"
            )));
        }

        let mut domain = None;
        let mut path = None;
        for attribute in parts {
            match attribute.split_once('=') {
                Some((key, val)) if key.eq_ignore_ascii_case("domain") => {
                    domain = Some(val.trim().to_string());
                }
                Some((key, val)) if key.eq_ignore_ascii_case("path") => {
                    path = Some(val.trim().to_string());
                }
                _ => {
                    return Err(ProbeError::ConfigParse(format!(
                        "unknown cookie attribute in '{spec}'"
                    )));
                }
            }
        }

        let domain = domain
            .or_else(|| default_domain.map(str::to_string))
            .ok_or_else(|| {
                ProbeError::ConfigParse(format!("cookie spec '{spec}' has no domain"))
            })?;

        Ok(Self {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            domain,
            path,
        })
    }
}
