//! Inventory files describing a simulated datacenter.
//!
//! ```json
//! {
//!   "hosts": [{
//!     "host": "vcenter.lab",
//!     "user": "admin",
//!     "password": "secret",
//!     "vms": [{
//!       "name": "web01",
//!       "power_state": "poweredOff",
//!       "snapshots": ["clean"],
//!       "guest_user": "root",
//!       "guest_password": "toor",
//!       "programs": { "/bin/false": { "exit_code": 1 } }
//!     }]
//!   }]
//! }
//! ```

use super::guest::ProgramBehavior;
use crate::error::{ApiError, Result};
use crate::types::{PowerState, VmProperties};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Whole simulated datacenter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// Hosts that accept connections.
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
}

/// One vCenter or ESXi host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    /// Host name used by `connect`.
    pub host: String,
    /// Accepted user.
    pub user: String,
    /// Accepted password.
    pub password: String,
    /// Registered VMs.
    #[serde(default)]
    pub vms: Vec<VmSpec>,
}

/// One virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSpec {
    /// Display name.
    pub name: String,
    /// Initial power state (default: powered off).
    #[serde(
        default = "default_power_state",
        deserialize_with = "deserialize_power_state"
    )]
    pub power_state: PowerState,
    /// Whether guest tools start with the guest OS (default: true).
    #[serde(default = "default_true")]
    pub tools_installed: bool,
    /// Snapshots taken from the initial state, oldest first. The last one is
    /// the current snapshot.
    #[serde(default)]
    pub snapshots: Vec<String>,
    /// Guest OS user. Any credentials are accepted when unset.
    #[serde(default)]
    pub guest_user: Option<String>,
    /// Guest OS password.
    #[serde(default)]
    pub guest_password: Option<String>,
    /// Extra properties reported by `properties()`.
    #[serde(default)]
    pub properties: VmProperties,
    /// Behaviour of guest programs by absolute path.
    #[serde(default)]
    pub programs: BTreeMap<String, ProgramBehavior>,
}

fn default_power_state() -> PowerState {
    PowerState::PoweredOff
}

/// Accept the vSphere spelling as well as shorthands like `on` or `powered_off`.
fn deserialize_power_state<'de, D>(deserializer: D) -> std::result::Result<PowerState, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    PowerState::parse(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown power state `{raw}`")))
}

fn default_true() -> bool {
    true
}

impl VmSpec {
    /// A powered-off VM with guest tools and no snapshots.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            power_state: PowerState::PoweredOff,
            tools_installed: true,
            snapshots: Vec::new(),
            guest_user: None,
            guest_password: None,
            properties: VmProperties::new(),
            programs: BTreeMap::new(),
        }
    }

    /// Set the initial power state.
    pub fn power_state(mut self, state: PowerState) -> Self {
        self.power_state = state;
        self
    }

    /// Add a snapshot of the initial state.
    pub fn snapshot(mut self, name: impl Into<String>) -> Self {
        self.snapshots.push(name.into());
        self
    }

    /// Require these guest credentials.
    pub fn guest_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.guest_user = Some(user.into());
        self.guest_password = Some(password.into());
        self
    }

    /// Set whether guest tools are installed.
    pub fn tools_installed(mut self, installed: bool) -> Self {
        self.tools_installed = installed;
        self
    }

    /// Add a reported property.
    pub fn property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Configure how a guest program behaves.
    pub fn program(mut self, path: impl Into<String>, behavior: ProgramBehavior) -> Self {
        self.programs.insert(path.into(), behavior);
        self
    }
}

impl Inventory {
    /// Parse an inventory from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ApiError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Load an inventory file.
    pub async fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading inventory");
        let text = tokio::fs::read_to_string(path).await?;
        let inventory = Self::from_json(&text)?;
        tracing::info!(
            path = %path.display(),
            hosts = inventory.hosts.len(),
            vms = inventory.hosts.iter().map(|h| h.vms.len()).sum::<usize>(),
            "Inventory loaded"
        );
        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_vm() {
        let inventory = Inventory::from_json(
            r#"{"hosts":[{"host":"vc","user":"u","password":"p","vms":[{"name":"web01"}]}]}"#,
        )
        .unwrap();
        let vm = &inventory.hosts[0].vms[0];
        assert_eq!(vm.name, "web01");
        assert_eq!(vm.power_state, PowerState::PoweredOff);
        assert!(vm.tools_installed);
        assert!(vm.snapshots.is_empty());
        assert!(vm.guest_user.is_none());
    }

    #[test]
    fn test_parse_programs() {
        let inventory = Inventory::from_json(
            r#"{"hosts":[{"host":"vc","user":"u","password":"p","vms":[{
                "name":"db",
                "power_state":"poweredOn",
                "programs":{"/bin/false":{"exit_code":1},"/bin/sleep":{"hang":true}}
            }]}]}"#,
        )
        .unwrap();
        let vm = &inventory.hosts[0].vms[0];
        assert_eq!(vm.power_state, PowerState::PoweredOn);
        assert_eq!(vm.programs["/bin/false"], ProgramBehavior::exits_after(0, 1));
        assert_eq!(vm.programs["/bin/sleep"], ProgramBehavior::hangs());
    }

    #[test]
    fn test_parse_power_state_shorthand() {
        let inventory = Inventory::from_json(
            r#"{"hosts":[{"host":"vc","user":"u","password":"p","vms":[
                {"name":"a","power_state":"on"},
                {"name":"b","power_state":"POWERED_OFF"}
            ]}]}"#,
        )
        .unwrap();
        let vms = &inventory.hosts[0].vms;
        assert_eq!(vms[0].power_state, PowerState::PoweredOn);
        assert_eq!(vms[1].power_state, PowerState::PoweredOff);

        let err = Inventory::from_json(
            r#"{"hosts":[{"host":"vc","user":"u","password":"p","vms":[{"name":"a","power_state":"rebooting"}]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rebooting"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Inventory::from_json("{not json"),
            Err(ApiError::Io(_))
        ));
    }

    #[test]
    fn test_empty_inventory() {
        let inventory = Inventory::from_json("{}").unwrap();
        assert!(inventory.hosts.is_empty());
    }
}
