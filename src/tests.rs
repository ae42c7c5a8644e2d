#[cfg(test)]
mod end_to_end {
    use crate::browser::{PageEngine, PageEvent};
    use crate::config::{Config, Cookie, Viewport};
    use crate::error::{exit_code, ProbeError};
    use crate::events::{EventBus, LoadStatus};
    use crate::metrics::{MetricsStore, TracingSink};
    use crate::orchestrator::Orchestrator;
    use crate::registry::{discover_script_modules, ModuleDeps, ModuleRegistry};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Scripted engine replaying a fixed feed of lifecycle events, each at
    /// a millisecond offset from the navigation call.
    struct MockEngine {
        status: LoadStatus,
        feed: Mutex<Vec<(u64, PageEvent)>>,
        eval: serde_json::Value,
        zoom_calls: Mutex<Vec<f64>>,
        tx: mpsc::UnboundedSender<PageEvent>,
        rx: Mutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
    }

    impl MockEngine {
        fn new(status: LoadStatus, feed: Vec<(u64, PageEvent)>) -> Arc<Self> {
            Self::with_eval(status, feed, serde_json::Value::Null)
        }

        fn with_eval(
            status: LoadStatus,
            feed: Vec<(u64, PageEvent)>,
            eval: serde_json::Value,
        ) -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                status,
                feed: Mutex::new(feed),
                eval,
                zoom_calls: Mutex::new(Vec::new()),
                tx,
                rx: Mutex::new(Some(rx)),
            })
        }
    }

    #[async_trait]
    impl PageEngine for MockEngine {
        async fn open(&self, _url: &str) -> Result<LoadStatus, ProbeError> {
            let feed = std::mem::take(&mut *self.feed.lock().unwrap());
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now();
                for (offset, event) in feed {
                    tokio::time::sleep_until(start + Duration::from_millis(offset)).await;
                    let _ = tx.send(event);
                }
            });
            Ok(self.status.clone())
        }

        async fn close(&self) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn evaluate(&self, _expression: &str) -> Result<serde_json::Value, ProbeError> {
            Ok(self.eval.clone())
        }

        async fn inject_script(&self, _path: &Path) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn render(&self, _path: &Path) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn set_zoom(&self, factor: f64) -> Result<(), ProbeError> {
            self.zoom_calls.lock().unwrap().push(factor);
            Ok(())
        }

        async fn page_source(&self) -> Result<String, ProbeError> {
            Ok("<html><head></head><body></body></html>".to_string())
        }

        async fn set_viewport(&self, _viewport: &Viewport) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn set_user_agent(&self, _user_agent: &str) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn set_javascript_enabled(&self, _enabled: bool) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn set_cookie(&self, _cookie: &Cookie) -> Result<(), ProbeError> {
            Ok(())
        }

        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PageEvent>> {
            self.rx.lock().unwrap().take()
        }
    }

    fn config(url: &str) -> Config {
        Config {
            url: url.to_string(),
            timeout_seconds: 10,
            ..Config::default()
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pageprobe-test-{name}-{}", uuid::Uuid::new_v4()))
    }

    /// One request, one response, the load event: the run must complete
    /// through network idle and exit zero.
    fn successful_load_feed() -> Vec<(u64, PageEvent)> {
        vec![
            (
                0,
                PageEvent::RequestWillBeSent {
                    id: "1".into(),
                    url: "https://example.com/".into(),
                },
            ),
            (
                100,
                PageEvent::ResponseReceived {
                    id: "1".into(),
                    url: "https://example.com/".into(),
                    status: 200,
                    mime_type: "text/html".into(),
                    body_size: Some(2048),
                },
            ),
            (150, PageEvent::LoadingFinished { id: "1".into() }),
            (200, PageEvent::LoadEventFired),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn successful_run_exits_zero_and_writes_the_report() {
        let output = temp_path("report");
        let mut config = config("https://example.com");
        config.output = Some(output.clone());

        let engine = MockEngine::new(LoadStatus::Success, successful_load_feed());
        let before = tokio::time::Instant::now();
        let code = Orchestrator::new(config, engine).run().await;
        assert_eq!(code, exit_code::SUCCESS);

        // the last response completed at t=150ms, so the run must end one
        // quiet period later, not at the 10s timeout
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_millis(1150), "ended early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "ended late: {elapsed:?}");

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(report["timed_out"], serde_json::Value::Bool(false));
        assert_eq!(report["url"], "https://example.com");
        assert_eq!(report["metrics"]["requests"], 1.0);
        assert_eq!(report["metrics"]["responses"], 1.0);
        assert_eq!(report["metrics"]["bodySize"], 2048.0);
        let _ = std::fs::remove_file(&output);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_asserts_become_the_exit_code() {
        let mut config = config("https://example.com");
        // one failing (1 request < 5) and one passing (htmlSize >= 1)
        config.asserts.insert("requests".to_string(), 5.0);
        config.asserts.insert("htmlSize".to_string(), 1.0);

        let engine = MockEngine::new(LoadStatus::Success, successful_load_feed());
        let code = Orchestrator::new(config, engine).run().await;
        assert_eq!(code, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn global_timeout_forces_the_report() {
        let output = temp_path("timeout-report");
        let mut config = config("https://example.com");
        config.timeout_seconds = 2;
        config.output = Some(output.clone());

        // the request never completes, so network idle never happens
        let feed = vec![
            (
                0,
                PageEvent::RequestWillBeSent {
                    id: "1".into(),
                    url: "https://example.com/slow".into(),
                },
            ),
            (100, PageEvent::LoadEventFired),
        ];
        let engine = MockEngine::new(LoadStatus::Success, feed);
        let code = Orchestrator::new(config, engine).run().await;
        assert_eq!(code, exit_code::TIMED_OUT);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(report["timed_out"], serde_json::Value::Bool(true));
        let _ = std::fs::remove_file(&output);
    }

    #[tokio::test(start_paused = true)]
    async fn zoom_factor_is_applied_during_engine_setup() {
        let mut config = config("https://example.com");
        config.zoom_factor = Some(2.0);

        let engine = MockEngine::new(LoadStatus::Success, successful_load_feed());
        let code = Orchestrator::new(config, engine.clone()).run().await;
        assert_eq!(code, exit_code::SUCCESS);

        // applied once at setup, even with no screenshot configured
        assert_eq!(*engine.zoom_calls.lock().unwrap(), vec![2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_navigation_exits_load_failed() {
        let engine = MockEngine::new(
            LoadStatus::Failed("net::ERR_NAME_NOT_RESOLVED".to_string()),
            Vec::new(),
        );
        let code = Orchestrator::new(config("https://nxdomain.invalid"), engine).run().await;
        assert_eq!(code, exit_code::LOAD_FAILED);
    }

    #[tokio::test(start_paused = true)]
    async fn console_and_error_events_reach_the_diagnostics_metrics() {
        let output = temp_path("diagnostics-report");
        let mut config = config("https://example.com");
        config.output = Some(output.clone());

        let mut feed = successful_load_feed();
        feed.push((50, PageEvent::Console("hello from the page".into())));
        feed.push((60, PageEvent::PageError("ReferenceError: x".into())));
        feed.push((70, PageEvent::Dialog("are you sure?".into())));

        let engine = MockEngine::new(LoadStatus::Success, feed);
        let code = Orchestrator::new(config, engine).run().await;
        assert_eq!(code, exit_code::SUCCESS);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(report["metrics"]["consoleMessages"], 1.0);
        assert_eq!(report["metrics"]["jsErrors"], 1.0);
        assert_eq!(report["metrics"]["dialogs"], 1.0);
        assert_eq!(
            report["offenders"]["jsErrors"][0],
            "ReferenceError: x"
        );
        let _ = std::fs::remove_file(&output);
    }

    fn mock_deps() -> ModuleDeps {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MetricsStore::new(Box::new(TracingSink)));
        store.bind_bus(Arc::downgrade(&bus));
        ModuleDeps {
            bus,
            store,
            params: Arc::new(Mutex::new(HashMap::new())),
            engine: MockEngine::new(LoadStatus::Success, Vec::new()),
        }
    }

    #[tokio::test]
    async fn skip_listed_modules_are_never_initialized() {
        let mut registry = ModuleRegistry::new(mock_deps(), &["dom-stats".to_string()]);
        registry.load_core();
        registry.load_discovered(None, &[]);

        let names = registry.loaded_names();
        assert!(names.contains(&"requests-monitor".to_string()));
        assert!(names.contains(&"navigation-timings".to_string()));
        assert!(!names.contains(&"dom-stats".to_string()));
    }

    #[tokio::test]
    async fn explicit_module_list_replaces_discovery() {
        let mut registry = ModuleRegistry::new(mock_deps(), &[]);
        registry.load_core();
        registry.load_discovered(Some(&["dom-stats".to_string()]), &[]);

        let names = registry.loaded_names();
        assert_eq!(
            names,
            vec![
                "requests-monitor".to_string(),
                "page-events".to_string(),
                "dom-stats".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn explicitly_listed_module_on_the_skip_list_is_never_initialized() {
        let mut registry = ModuleRegistry::new(mock_deps(), &["dom-stats".to_string()]);
        registry.load_discovered(Some(&["dom-stats".to_string()]), &[]);
        assert!(registry.loaded_names().is_empty());
    }

    struct ScopeReader;

    #[async_trait]
    impl crate::registry::ProbeModule for ScopeReader {
        fn descriptor(&self) -> crate::registry::ModuleDescriptor {
            crate::registry::ModuleDescriptor::new("scope-reader")
        }

        fn attach(
            &self,
            _ctx: &Arc<crate::registry::ModuleContext>,
        ) -> Result<(), ProbeError> {
            Ok(())
        }

        async fn collect(
            &self,
            ctx: &Arc<crate::registry::ModuleContext>,
        ) -> Result<(), ProbeError> {
            let raw = ctx.get_from_scope("cssCount").await?;
            assert_eq!(raw, serde_json::json!(7));
            ctx.set_metric_from_scope("cssCount", "cssCount").await
        }
    }

    #[tokio::test]
    async fn scope_values_can_be_read_into_metrics() {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(MetricsStore::new(Box::new(TracingSink)));
        store.bind_bus(Arc::downgrade(&bus));
        let deps = ModuleDeps {
            bus,
            store: store.clone(),
            params: Arc::new(Mutex::new(HashMap::new())),
            engine: MockEngine::with_eval(
                LoadStatus::Success,
                Vec::new(),
                serde_json::json!(7),
            ),
        };

        let mut registry = ModuleRegistry::new(deps, &[]);
        registry.load_module(Arc::new(ScopeReader));
        registry.collect_all().await;

        assert_eq!(
            store.get_metric("cssCount"),
            Some(crate::metrics::MetricValue::Number(7.0))
        );
    }

    #[tokio::test]
    async fn script_modules_are_discovered_and_malformed_ones_skipped() {
        let root = temp_path("modules");
        let good = root.join("a-good");
        let bad = root.join("b-bad");
        std::fs::create_dir_all(&good).unwrap();
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(
            good.join("module.json"),
            r#"{"name": "third-party", "version": "0.2.0", "script": "collect.js"}"#,
        )
        .unwrap();
        std::fs::write(good.join("collect.js"), "({metrics: {}, offenders: {}})").unwrap();
        std::fs::write(bad.join("module.json"), "{not json").unwrap();

        let discovered = discover_script_modules(&root);
        assert_eq!(discovered.len(), 1);
        let descriptor = discovered[0].descriptor();
        assert_eq!(descriptor.name, "third-party");
        assert_eq!(descriptor.version.as_deref(), Some("0.2.0"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn modules_declaring_skip_are_filtered_at_load() {
        let root = temp_path("skip-modules");
        let dir = root.join("skipped");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("module.json"),
            r#"{"name": "wip", "skip": true, "script": "collect.js"}"#,
        )
        .unwrap();

        let mut registry = ModuleRegistry::new(mock_deps(), &[]);
        registry.load_discovered(None, &[root.clone()]);
        assert!(!registry.loaded_names().contains(&"wip".to_string()));

        let _ = std::fs::remove_dir_all(&root);
    }
}
