//! Configuration for the keyword server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use sphere_api::sim::{Inventory, SimulatedDatacenter};
use sphere_core::{LibraryConfig, StaleHandlePolicy};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Stdio only (for a local keyword runner)
    Stdio,
    /// Streamable HTTP only (for remote runners)
    Http,
    /// Both stdio and HTTP
    #[default]
    Both,
}

impl TransportMode {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stdio" => Self::Stdio,
            "http" | "sse" | "remote" => Self::Http,
            _ => Self::Both,
        }
    }

    /// Check if stdio transport should be enabled.
    pub fn stdio_enabled(&self) -> bool {
        matches!(self, Self::Stdio | Self::Both)
    }

    /// Check if HTTP transport should be enabled.
    pub fn http_enabled(&self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }
}

/// Configuration for the sphere keyword server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Inventory file describing the simulated datacenter. An empty
    /// datacenter is used when unset.
    pub inventory_path: Option<PathBuf>,

    /// Keyword library settings.
    pub library: LibraryConfig,

    /// Transport mode (default: both stdio and HTTP).
    pub transport_mode: TransportMode,

    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// How long shutdown waits for running keywords before leaving
    /// connections open (default: 10 s).
    pub shutdown_grace: Duration,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("inventory file not found: {0}")]
    MissingInventory(PathBuf),

    #[error("failed to load inventory {path}: {source}")]
    Inventory {
        path: PathBuf,
        #[source]
        source: sphere_api::ApiError,
    },

    #[error(transparent)]
    Library(#[from] sphere_core::CoreError),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            inventory_path: None,
            library: LibraryConfig::default(),
            transport_mode: TransportMode::Both,
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SPHERE_INVENTORY` | unset (empty datacenter) |
    /// | `SPHERE_TRANSPORT` | `both` (stdio, http, both) |
    /// | `SPHERE_HTTP_HOST` | `0.0.0.0` |
    /// | `SPHERE_HTTP_PORT` | `8080` |
    /// | `SPHERE_POLL_INTERVAL_SECS` | `2` |
    /// | `SPHERE_PROCESS_TIMEOUT_SECS` | `600` (`0` waits forever) |
    /// | `SPHERE_TOOLS_TIMEOUT_SECS` | `120` |
    /// | `SPHERE_REFRESH_STALE_HANDLES` | `false` (true, yes, on, 1) |
    /// | `SPHERE_SHUTDOWN_GRACE_SECS` | `10` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        let http_host: IpAddr = lookup("SPHERE_HTTP_HOST")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.ip());

        let http_port: u16 = lookup("SPHERE_HTTP_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.port());

        let mut library = default.library;
        if let Some(interval) = secs("SPHERE_POLL_INTERVAL_SECS") {
            library.process_poll_interval = interval;
        }
        if let Some(timeout) = secs("SPHERE_PROCESS_TIMEOUT_SECS") {
            library.process_timeout = (!timeout.is_zero()).then_some(timeout);
        }
        if let Some(timeout) = secs("SPHERE_TOOLS_TIMEOUT_SECS") {
            library.tools_timeout = timeout;
        }
        if let Some(refresh) = lookup("SPHERE_REFRESH_STALE_HANDLES").and_then(|v| parse_flag(&v)) {
            library.stale_handle_policy = if refresh {
                StaleHandlePolicy::Refresh
            } else {
                StaleHandlePolicy::Keep
            };
        }

        Self {
            inventory_path: lookup("SPHERE_INVENTORY")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            library,
            transport_mode: lookup("SPHERE_TRANSPORT")
                .map(|v| TransportMode::parse(&v))
                .unwrap_or(default.transport_mode),
            http_addr: SocketAddr::new(http_host, http_port),
            shutdown_grace: secs("SPHERE_SHUTDOWN_GRACE_SECS").unwrap_or(default.shutdown_grace),
        }
    }

    /// Validate the library settings and that the inventory file exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.library.validate()?;

        if let Some(path) = &self.inventory_path {
            if !path.exists() {
                return Err(ConfigError::MissingInventory(path.clone()));
            }
        }

        Ok(())
    }

    /// Checks run before the server starts.
    ///
    /// Invalid library settings are an error. A missing or unset inventory
    /// is only logged, since the server can still run on an empty datacenter.
    pub fn validate_startup(&self) -> Result<(), ConfigError> {
        self.library.validate()?;

        match &self.inventory_path {
            Some(path) if !path.exists() => {
                tracing::warn!("Inventory not found: {:?}", path);
            }
            None => {
                tracing::warn!("No inventory configured, starting with an empty datacenter");
            }
            _ => {}
        }
        Ok(())
    }

    /// Build the simulated datacenter described by the inventory file.
    pub async fn datacenter(&self) -> Result<SimulatedDatacenter, ConfigError> {
        let Some(path) = &self.inventory_path else {
            return Ok(SimulatedDatacenter::new());
        };

        let inventory_error = |source| ConfigError::Inventory {
            path: path.clone(),
            source,
        };
        let inventory = Inventory::load(path).await.map_err(inventory_error)?;
        SimulatedDatacenter::from_inventory(inventory)
            .await
            .map_err(inventory_error)
    }
}

/// Parse a boolean environment flag (case-insensitive).
fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.inventory_path, None);
        assert_eq!(config.library, LibraryConfig::default());
        assert_eq!(config.transport_mode, TransportMode::Both);
        assert_eq!(config.http_addr.port(), 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_mode_parsing() {
        assert_eq!(TransportMode::parse("stdio"), TransportMode::Stdio);
        assert_eq!(TransportMode::parse("STDIO"), TransportMode::Stdio);
        assert_eq!(TransportMode::parse("http"), TransportMode::Http);
        assert_eq!(TransportMode::parse("HTTP"), TransportMode::Http);
        assert_eq!(TransportMode::parse("both"), TransportMode::Both);
        assert_eq!(TransportMode::parse("anything"), TransportMode::Both);
    }

    #[test]
    fn test_transport_mode_flags() {
        assert!(TransportMode::Stdio.stdio_enabled());
        assert!(!TransportMode::Stdio.http_enabled());

        assert!(!TransportMode::Http.stdio_enabled());
        assert!(TransportMode::Http.http_enabled());

        assert!(TransportMode::Both.stdio_enabled());
        assert!(TransportMode::Both.http_enabled());
    }

    #[test]
    fn test_from_lookup_uses_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        let default = ServerConfig::default();

        assert_eq!(config.inventory_path, default.inventory_path);
        assert_eq!(config.library, default.library);
        assert_eq!(config.transport_mode, default.transport_mode);
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.shutdown_grace, default.shutdown_grace);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SPHERE_INVENTORY", "/etc/sphere/lab.json"),
            ("SPHERE_TRANSPORT", "stdio"),
            ("SPHERE_HTTP_HOST", "127.0.0.1"),
            ("SPHERE_HTTP_PORT", "9090"),
            ("SPHERE_POLL_INTERVAL_SECS", "5"),
            ("SPHERE_PROCESS_TIMEOUT_SECS", "0"),
            ("SPHERE_TOOLS_TIMEOUT_SECS", "30"),
            ("SPHERE_REFRESH_STALE_HANDLES", "1"),
            ("SPHERE_SHUTDOWN_GRACE_SECS", "3"),
        ]));

        assert_eq!(config.inventory_path, Some(PathBuf::from("/etc/sphere/lab.json")));
        assert_eq!(config.transport_mode, TransportMode::Stdio);
        assert_eq!(config.http_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.library.process_poll_interval, Duration::from_secs(5));
        assert_eq!(config.library.process_timeout, None);
        assert_eq!(config.library.tools_timeout, Duration::from_secs(30));
        assert_eq!(config.library.stale_handle_policy, StaleHandlePolicy::Refresh);
        assert_eq!(config.shutdown_grace, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SPHERE_HTTP_PORT", "not-a-port"),
            ("SPHERE_POLL_INTERVAL_SECS", "soon"),
            ("SPHERE_REFRESH_STALE_HANDLES", "false"),
        ]));
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.library.process_poll_interval, Duration::from_secs(2));
        assert_eq!(config.library.stale_handle_policy, StaleHandlePolicy::Keep);
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_missing_inventory() {
        let config = ServerConfig::from_lookup(lookup(&[("SPHERE_POLL_INTERVAL_SECS", "0")]));
        assert!(matches!(config.validate(), Err(ConfigError::Library(_))));

        let config = ServerConfig {
            inventory_path: Some(PathBuf::from("/nonexistent/sphere/inventory.json")),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingInventory(_))
        ));
    }

    #[test]
    fn test_startup_rejects_busy_poll_settings() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SPHERE_POLL_INTERVAL_SECS", "0"),
            ("SPHERE_PROCESS_TIMEOUT_SECS", "0"),
        ]));
        assert_eq!(config.library.process_timeout, None);
        assert!(matches!(
            config.validate_startup(),
            Err(ConfigError::Library(_))
        ));
    }

    #[test]
    fn test_startup_tolerates_missing_inventory() {
        let config = ServerConfig {
            inventory_path: Some(PathBuf::from("/nonexistent/sphere/inventory.json")),
            ..Default::default()
        };
        assert!(config.validate_startup().is_ok());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_flag_is_case_insensitive() {
        for value in ["False", "FALSE", "no", "Off", "0"] {
            let config =
                ServerConfig::from_lookup(lookup(&[("SPHERE_REFRESH_STALE_HANDLES", value)]));
            assert_eq!(config.library.stale_handle_policy, StaleHandlePolicy::Keep, "{value}");
        }
        for value in ["True", "YES", "on", "1"] {
            let config =
                ServerConfig::from_lookup(lookup(&[("SPHERE_REFRESH_STALE_HANDLES", value)]));
            assert_eq!(config.library.stale_handle_policy, StaleHandlePolicy::Refresh, "{value}");
        }

        let config = ServerConfig::from_lookup(lookup(&[("SPHERE_REFRESH_STALE_HANDLES", "maybe")]));
        assert_eq!(config.library.stale_handle_policy, StaleHandlePolicy::Keep);
    }

    #[tokio::test]
    async fn test_datacenter_from_inventory_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.json");
        tokio::fs::write(
            &path,
            r#"{"hosts":[{"host":"vc.lab","user":"admin","password":"secret","vms":[{"name":"web01"}]}]}"#,
        )
        .await
        .unwrap();

        let config = ServerConfig {
            inventory_path: Some(path),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        let dc = config.datacenter().await.unwrap();
        assert_eq!(
            dc.power_state("vc.lab", "web01").await.unwrap(),
            sphere_api::PowerState::PoweredOff
        );
    }

    #[tokio::test]
    async fn test_datacenter_reports_bad_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let config = ServerConfig {
            inventory_path: Some(path),
            ..Default::default()
        };
        assert!(matches!(
            config.datacenter().await,
            Err(ConfigError::Inventory { .. })
        ));
    }
}
