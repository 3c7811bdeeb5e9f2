//! Library configuration types.

use crate::error::CoreError;
use crate::poll::PollConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when a cached VM handle belongs to a session whose
/// authentication has lapsed.
///
/// `Keep` is the historical behaviour: the lapse is logged and the cached
/// handle is returned anyway, so the following remote call fails against the
/// dead session instead of the handle being re-resolved. Opt into `Refresh`
/// to drop the entry and resolve the name again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaleHandlePolicy {
    /// Log and return the stale handle.
    #[default]
    Keep,
    /// Log, evict and re-resolve.
    Refresh,
}

/// Configuration for a [`SphereLibrary`](crate::SphereLibrary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    /// Interval between process-table checks in `run_synchronous_process` (default: 2 s).
    pub process_poll_interval: Duration,
    /// Maximum wait in `run_synchronous_process`; `None` waits forever
    /// (default: 10 minutes).
    pub process_timeout: Option<Duration>,
    /// Default timeout for `wait_for_vmware_tools` (default: 120 s).
    pub tools_timeout: Duration,
    /// Handling of cached handles owned by an expired session.
    pub stale_handle_policy: StaleHandlePolicy,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            process_poll_interval: Duration::from_secs(2),
            process_timeout: Some(Duration::from_secs(600)),
            tools_timeout: Duration::from_secs(120),
            stale_handle_policy: StaleHandlePolicy::Keep,
        }
    }
}

impl LibraryConfig {
    /// Create a new config builder.
    pub fn builder() -> LibraryConfigBuilder {
        LibraryConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.process_poll_interval.is_zero() {
            return Err(CoreError::Config(
                "process_poll_interval must be > 0".into(),
            ));
        }
        if self.process_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CoreError::Config("process_timeout must be > 0".into()));
        }
        if self.tools_timeout.is_zero() {
            return Err(CoreError::Config("tools_timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Poll settings for synchronous process execution.
    pub fn process_poll(&self) -> PollConfig {
        PollConfig {
            interval: self.process_poll_interval,
            timeout: self.process_timeout,
        }
    }
}

/// Builder for LibraryConfig.
#[derive(Debug, Default)]
pub struct LibraryConfigBuilder {
    config: LibraryConfig,
}

impl LibraryConfigBuilder {
    /// Set the process poll interval.
    pub fn process_poll_interval(mut self, interval: Duration) -> Self {
        self.config.process_poll_interval = interval;
        self
    }

    /// Set the maximum wait for synchronous processes.
    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.config.process_timeout = Some(timeout);
        self
    }

    /// Wait for synchronous processes without a limit.
    pub fn unbounded_process_wait(mut self) -> Self {
        self.config.process_timeout = None;
        self
    }

    /// Set the default guest tools timeout.
    pub fn tools_timeout(mut self, timeout: Duration) -> Self {
        self.config.tools_timeout = timeout;
        self
    }

    /// Set the stale handle policy.
    pub fn stale_handle_policy(mut self, policy: StaleHandlePolicy) -> Self {
        self.config.stale_handle_policy = policy;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<LibraryConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = LibraryConfig::default();
        assert_eq!(config.process_poll_interval, Duration::from_secs(2));
        assert_eq!(config.process_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.tools_timeout, Duration::from_secs(120));
        assert_eq!(config.stale_handle_policy, StaleHandlePolicy::Keep);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = LibraryConfig::builder()
            .process_poll_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = LibraryConfig::builder()
            .process_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_success() {
        let config = LibraryConfig::builder()
            .process_poll_interval(Duration::from_millis(500))
            .unbounded_process_wait()
            .tools_timeout(Duration::from_secs(30))
            .stale_handle_policy(StaleHandlePolicy::Refresh)
            .build()
            .expect("should build successfully");

        assert_eq!(config.process_poll().interval, Duration::from_millis(500));
        assert_eq!(config.process_poll().timeout, None);
        assert_eq!(config.tools_timeout, Duration::from_secs(30));
        assert_eq!(config.stale_handle_policy, StaleHandlePolicy::Refresh);
    }

    #[test]
    fn test_policy_serde() {
        let policy: StaleHandlePolicy = serde_json::from_str("\"refresh\"").unwrap();
        assert_eq!(policy, StaleHandlePolicy::Refresh);
    }
}
