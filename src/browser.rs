//! Browser engine boundary
//!
//! The orchestrator core never talks to Chrome directly: it consumes the
//! [`PageEngine`] trait, one method per capability plus a one-shot stream
//! of lifecycle events. [`CdpEngine`] is the concrete adapter implementing
//! it on top of chromiumoxide / the Chrome DevTools Protocol.

use crate::config::{Config, Cookie, Viewport};
use crate::error::ProbeError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetPageScaleFactorParams, SetScriptExecutionDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, SetCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventJavascriptDialogOpening, EventLoadEventFired,
    HandleJavaScriptDialogParams, NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Terminal status of a navigation attempt.
pub use crate::events::LoadStatus;

/// Lifecycle callbacks delivered by the engine, in delivery order.
#[derive(Debug, Clone)]
pub enum PageEvent {
    RequestWillBeSent {
        id: String,
        url: String,
    },
    ResponseReceived {
        id: String,
        url: String,
        status: u16,
        mime_type: String,
        body_size: Option<u64>,
    },
    LoadingFinished {
        id: String,
    },
    LoadingFailed {
        id: String,
    },
    LoadEventFired,
    Console(String),
    PageError(String),
    Dialog(String),
}

/// Capabilities consumed from the browser engine. The metrics façade
/// re-exposes only the narrow subset a plugin legitimately needs.
#[async_trait]
pub trait PageEngine: Send + Sync {
    /// Navigate to the URL. A rejected navigation is reported as a
    /// [`LoadStatus::Failed`], not as an engine error.
    async fn open(&self, url: &str) -> Result<LoadStatus, ProbeError>;

    async fn close(&self) -> Result<(), ProbeError>;

    /// Run an expression in page context and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, ProbeError>;

    /// Load a script file from disk and run it in page context.
    async fn inject_script(&self, path: &Path) -> Result<(), ProbeError>;

    /// Render the current page to an image file.
    async fn render(&self, path: &Path) -> Result<(), ProbeError>;

    async fn set_zoom(&self, factor: f64) -> Result<(), ProbeError>;

    async fn page_source(&self) -> Result<String, ProbeError>;

    async fn set_viewport(&self, viewport: &Viewport) -> Result<(), ProbeError>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), ProbeError>;

    async fn set_javascript_enabled(&self, enabled: bool) -> Result<(), ProbeError>;

    async fn set_cookie(&self, cookie: &Cookie) -> Result<(), ProbeError>;

    /// Take the lifecycle event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PageEvent>>;
}

fn engine_err(err: impl std::fmt::Display) -> ProbeError {
    ProbeError::Engine(err.to_string())
}

/// Chrome DevTools Protocol adapter.
pub struct CdpEngine {
    browser: tokio::sync::Mutex<Browser>,
    page: Page,
    handler_task: tokio::task::JoinHandle<()>,
    listener_tasks: Vec<tokio::task::JoinHandle<()>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
}

impl CdpEngine {
    pub async fn launch(config: &Config) -> Result<Self, ProbeError> {
        let browser_config = build_browser_config(config)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ProbeError::Engine(format!("browser launch failed: {e}")))?;

        // The CDP handler is a stream that must be pumped for the whole run.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("CDP handler error: {e}");
                    break;
                }
            }
            debug!("CDP handler stream ended");
        });

        let page = browser.new_page("about:blank").await.map_err(engine_err)?;
        page.execute(EnableParams::default())
            .await
            .map_err(engine_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let listener_tasks = spawn_event_listeners(&page, tx).await?;

        info!("browser engine ready");
        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            page,
            handler_task,
            listener_tasks,
            events: Mutex::new(Some(rx)),
        })
    }
}

#[async_trait]
impl PageEngine for CdpEngine {
    async fn open(&self, url: &str) -> Result<LoadStatus, ProbeError> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(ProbeError::Engine)?;
        let response = self.page.execute(params).await.map_err(engine_err)?;
        match &response.error_text {
            Some(reason) => Ok(LoadStatus::Failed(reason.clone())),
            None => Ok(LoadStatus::Success),
        }
    }

    async fn close(&self) -> Result<(), ProbeError> {
        for task in &self.listener_tasks {
            task.abort();
        }
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(engine_err)?;
        self.handler_task.abort();
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, ProbeError> {
        let result = self
            .page
            .evaluate(expression.to_string())
            .await
            .map_err(engine_err)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn inject_script(&self, path: &Path) -> Result<(), ProbeError> {
        let source = tokio::fs::read_to_string(path).await?;
        self.page.evaluate(source).await.map_err(engine_err)?;
        Ok(())
    }

    async fn render(&self, path: &Path) -> Result<(), ProbeError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .save_screenshot(params, path)
            .await
            .map_err(engine_err)?;
        Ok(())
    }

    async fn set_zoom(&self, factor: f64) -> Result<(), ProbeError> {
        let params = SetPageScaleFactorParams::builder()
            .page_scale_factor(factor)
            .build()
            .map_err(ProbeError::Engine)?;
        self.page.execute(params).await.map_err(engine_err)?;
        Ok(())
    }

    async fn page_source(&self) -> Result<String, ProbeError> {
        self.page.content().await.map_err(engine_err)
    }

    async fn set_viewport(&self, viewport: &Viewport) -> Result<(), ProbeError> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width)
            .height(viewport.height)
            .device_scale_factor(viewport.device_scale_factor)
            .mobile(viewport.mobile)
            .build()
            .map_err(ProbeError::Engine)?;
        self.page.execute(params).await.map_err(engine_err)?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), ProbeError> {
        self.page
            .set_user_agent(user_agent)
            .await
            .map_err(engine_err)?;
        Ok(())
    }

    async fn set_javascript_enabled(&self, enabled: bool) -> Result<(), ProbeError> {
        self.page
            .execute(SetScriptExecutionDisabledParams::new(!enabled))
            .await
            .map_err(engine_err)?;
        Ok(())
    }

    async fn set_cookie(&self, cookie: &Cookie) -> Result<(), ProbeError> {
        let mut builder = CookieParam::builder()
            .name(&cookie.name)
            .value(&cookie.value)
            .domain(&cookie.domain);
        if let Some(path) = &cookie.path {
            builder = builder.path(path);
        }
        let param = builder.build().map_err(ProbeError::Engine)?;
        self.page
            .execute(SetCookiesParams::new(vec![param]))
            .await
            .map_err(engine_err)?;
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PageEvent>> {
        self.events.lock().unwrap().take()
    }
}

/// Translate CDP event streams into [`PageEvent`]s on one channel.
async fn spawn_event_listeners(
    page: &Page,
    tx: mpsc::UnboundedSender<PageEvent>,
) -> Result<Vec<tokio::task::JoinHandle<()>>, ProbeError> {
    let mut tasks = Vec::new();

    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            let _ = sender.send(PageEvent::RequestWillBeSent {
                id: event.request_id.inner().clone(),
                url: event.request.url.clone(),
            });
        }
    }));

    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            let _ = sender.send(PageEvent::ResponseReceived {
                id: event.request_id.inner().clone(),
                url: event.response.url.clone(),
                status: event.response.status as u16,
                mime_type: event.response.mime_type.clone(),
                body_size: Some(event.response.encoded_data_length as u64),
            });
        }
    }));

    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = finished.next().await {
            let _ = sender.send(PageEvent::LoadingFinished {
                id: event.request_id.inner().clone(),
            });
        }
    }));

    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = failed.next().await {
            let _ = sender.send(PageEvent::LoadingFailed {
                id: event.request_id.inner().clone(),
            });
        }
    }));

    let mut load_fired = page
        .event_listener::<EventLoadEventFired>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    tasks.push(tokio::spawn(async move {
        while load_fired.next().await.is_some() {
            let _ = sender.send(PageEvent::LoadEventFired);
        }
    }));

    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = console.next().await {
            let message = event
                .args
                .iter()
                .filter_map(|arg| arg.value.as_ref())
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let _ = sender.send(PageEvent::Console(message));
        }
    }));

    let mut exceptions = page
        .event_listener::<EventExceptionThrown>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = exceptions.next().await {
            let _ = sender.send(PageEvent::PageError(
                event.exception_details.text.clone(),
            ));
        }
    }));

    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(engine_err)?;
    let sender = tx.clone();
    let dialog_page = page.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = dialogs.next().await {
            let _ = sender.send(PageEvent::Dialog(event.message.clone()));
            // dismiss so the load cannot hang on a dialog
            if let Ok(params) = HandleJavaScriptDialogParams::builder()
                .accept(true)
                .build()
            {
                let _ = dialog_page.execute(params).await;
            }
        }
    }));

    Ok(tasks)
}

/// Chrome launch configuration derived from the run config.
pub fn build_browser_config(config: &Config) -> Result<BrowserConfig, ProbeError> {
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--ignore-certificate-errors".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }
    if !config.javascript_enabled {
        args.push("--disable-javascript".to_string());
    }

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .args(args);

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .map_err(|e| ProbeError::Engine(format!("invalid browser config: {e}")))
}
