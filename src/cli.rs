use crate::config::{Config, Cookie, Viewport};
use crate::error::ProbeError;
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "pageprobe")]
#[command(about = "Instruments a single page load and reports performance metrics")]
#[command(version)]
pub struct Cli {
    #[arg(long, help = "URL to load and instrument")]
    pub url: Option<String>,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Global run timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Viewport as WIDTHxHEIGHT, e.g. 1366x768")]
    pub viewport: Option<String>,

    #[arg(long, help = "Custom User-Agent string")]
    pub user_agent: Option<String>,

    #[arg(long, help = "Disable JavaScript execution in the page")]
    pub no_javascript: bool,

    #[arg(
        long = "cookie",
        help = "Cookie as name=value[;domain=...][;path=...], repeatable"
    )]
    pub cookies: Vec<String>,

    #[arg(
        long = "module",
        help = "Load exactly this module (repeatable, ordered); disables discovery"
    )]
    pub modules: Vec<String>,

    #[arg(long = "skip-module", help = "Never initialize this module (repeatable)")]
    pub skip_modules: Vec<String>,

    #[arg(long = "module-dir", help = "Extra directory searched for script modules")]
    pub module_dirs: Vec<PathBuf>,

    #[arg(
        long = "assert",
        help = "Assertion threshold as metric=value (repeatable); non-numeric specs are ignored"
    )]
    pub asserts: Vec<String>,

    #[arg(long = "param", help = "Run parameter as key=value (repeatable)")]
    pub params: Vec<String>,

    #[arg(short, long, help = "Report output file (stdout when omitted)")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Render the final page to this file")]
    pub screenshot: Option<PathBuf>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Page zoom factor")]
    pub zoom: Option<f64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Cli {
    /// Load the config file when given, then layer CLI overrides on top.
    /// Any failure here precedes page interaction and maps to the
    /// reserved config-failure exit code.
    pub async fn load_config(&self) -> Result<Config, ProbeError> {
        let mut config = if let Some(path) = &self.config {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                ProbeError::ConfigParse(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_json::from_str::<Config>(&content)
                .map_err(|e| ProbeError::ConfigParse(format!("{}: {e}", path.display())))?
        } else {
            Config::default()
        };

        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
        if let Some(spec) = &self.viewport {
            config.viewport = Viewport::parse(spec)?;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        if self.no_javascript {
            config.javascript_enabled = false;
        }
        if !self.modules.is_empty() {
            config.modules = Some(self.modules.clone());
        }
        config.skip_modules.extend(self.skip_modules.iter().cloned());
        config.module_dirs.extend(self.module_dirs.iter().cloned());
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(screenshot) = &self.screenshot {
            config.screenshot = Some(screenshot.clone());
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Some(zoom) = self.zoom {
            config.zoom_factor = Some(zoom);
        }

        config.validate()?;

        let default_domain = config.target_host();
        for spec in &self.cookies {
            let cookie = Cookie::parse(spec, default_domain.as_deref())?;
            config.cookies.push(cookie);
        }

        // assert specs are filtered, not fatal: non-numeric ones are dropped
        for spec in &self.asserts {
            match spec.split_once('=') {
                Some((name, raw)) if !name.trim().is_empty() => {
                    match raw.trim().parse::<f64>() {
                        Ok(threshold) => {
                            config.asserts.insert(name.trim().to_string(), threshold);
                        }
                        Err(_) => warn!(spec, "ignoring non-numeric assert spec"),
                    }
                }
                _ => warn!(spec, "ignoring malformed assert spec"),
            }
        }

        for spec in &self.params {
            let (key, value) = spec.split_once('=').ok_or_else(|| {
                ProbeError::ConfigParse(format!("invalid --param '{spec}', expected key=value"))
            })?;
            config
                .params
                .insert(key.trim().to_string(), serde_json::Value::String(value.to_string()));
        }

        Ok(config)
    }
}

pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("pageprobe").chain(args.iter().copied()))
    }

    #[tokio::test]
    async fn cli_overrides_build_a_config() {
        let cli = parse(&[
            "--url",
            "https://example.com",
            "--timeout",
            "5",
            "--viewport",
            "1366x768",
            "--assert",
            "requests=20",
            "--assert",
            "bodySize=abc",
            "--cookie",
            "session=abc",
            "--skip-module",
            "screenshot",
        ]);
        let config = cli.load_config().await.unwrap();
        assert_eq!(config.url, "https://example.com");
        assert_eq!(config.timeout_seconds, 5);
        assert_eq!(config.viewport.width, 1366);
        assert_eq!(config.asserts.get("requests"), Some(&20.0));
        assert!(!config.asserts.contains_key("bodySize"));
        assert_eq!(config.cookies[0].domain, "example.com");
        assert_eq!(config.skip_modules, vec!["screenshot".to_string()]);
    }

    #[tokio::test]
    async fn missing_url_is_a_config_error() {
        let cli = parse(&[]);
        let err = cli.load_config().await.unwrap_err();
        assert!(matches!(err, ProbeError::ConfigParse(_)));
    }

    #[tokio::test]
    async fn unreadable_config_file_is_a_config_error() {
        let cli = parse(&["--config", "/nonexistent/pageprobe.json"]);
        let err = cli.load_config().await.unwrap_err();
        assert!(matches!(err, ProbeError::ConfigParse(_)));
    }

    #[tokio::test]
    async fn explicit_module_list_disables_discovery() {
        let cli = parse(&["--url", "https://example.com", "--module", "dom-stats"]);
        let config = cli.load_config().await.unwrap();
        assert_eq!(config.modules, Some(vec!["dom-stats".to_string()]));
    }
}
