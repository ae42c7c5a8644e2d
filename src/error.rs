use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("Configuration error: {0}")]
    ConfigParse(String),

    #[error("Module resolution failed: {0}")]
    ModuleResolution(String),

    #[error("Page load failed: {0}")]
    PageLoad(String),

    #[error("Marker metric '{0}' requested before any response completed")]
    MarkerBeforeResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Browser engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unclassified error: {0}")]
    Unclassified(String),
}

impl ProbeError {
    /// Whether the run can continue after this error. Module-local failures
    /// are recovered (skip + log); everything else terminates the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProbeError::ModuleResolution(_) | ProbeError::MarkerBeforeResponse(_)
        )
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Serialization(err.to_string())
    }
}

/// Process exit codes. The reserved high values must stay numerically
/// distinct from any assertion-failure count, so that count is clamped.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const TIMED_OUT: i32 = 252;
    pub const CONFIG_FAILED: i32 = 253;
    pub const LOAD_FAILED: i32 = 254;
    pub const ERROR: i32 = 255;

    /// Largest exit code an assertion-failure count may produce.
    pub const MAX_ASSERT_FAILURES: i32 = 251;

    /// Exit code for a run that produced a report: 0 on success, otherwise
    /// the number of failed assertions clamped below the reserved range.
    pub fn from_failed_asserts(failed: usize) -> i32 {
        failed.min(MAX_ASSERT_FAILURES as usize) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_assert_count_maps_to_exit_code() {
        assert_eq!(exit_code::from_failed_asserts(0), 0);
        assert_eq!(exit_code::from_failed_asserts(1), 1);
        assert_eq!(exit_code::from_failed_asserts(17), 17);
    }

    #[test]
    fn assert_exit_code_never_reaches_reserved_range() {
        assert_eq!(exit_code::from_failed_asserts(251), 251);
        assert_eq!(exit_code::from_failed_asserts(252), 251);
        assert_eq!(exit_code::from_failed_asserts(10_000), 251);
        assert!(exit_code::from_failed_asserts(usize::MAX) < exit_code::TIMED_OUT);
    }

    #[test]
    fn recoverable_classification() {
        assert!(ProbeError::ModuleResolution("missing".into()).is_recoverable());
        assert!(ProbeError::MarkerBeforeResponse("ttfb".into()).is_recoverable());
        assert!(!ProbeError::PageLoad("fail".into()).is_recoverable());
        assert!(!ProbeError::ConfigParse("bad json".into()).is_recoverable());
    }
}
