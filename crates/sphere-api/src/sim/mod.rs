//! In-memory simulated datacenter.
//!
//! [`SimulatedDatacenter`] implements [`Connector`] over a set of simulated
//! hosts. Sessions, VM handles, guest filesystems and guest processes behave
//! like a small vCenter: handles are bound to the session that resolved
//! them, guest operations need running tools and a guest login, and every
//! lookup returns a fresh handle object.
//!
//! It does not model the vSphere wire protocol. It exists to exercise the
//! keyword layer in tests and dry runs.
//!
//! # Example
//!
//! ```ignore
//! use sphere_api::sim::{SimulatedDatacenter, VmSpec};
//! use sphere_api::Connector;
//!
//! let dc = SimulatedDatacenter::new();
//! dc.add_host("vc.lab", "admin", "secret").await;
//! dc.add_vm("vc.lab", VmSpec::new("web01")).await?;
//!
//! let session = dc.connect("vc.lab", "admin", "secret").await?;
//! let vm = session.vm_by_name("web01").await?;
//! vm.power_on().await?;
//! ```

mod guest;
mod inventory;
mod vm;

pub use guest::ProgramBehavior;
pub use inventory::{HostSpec, Inventory, VmSpec};
pub use vm::SimVm;

use crate::client::{Connector, Session, SessionHandle, VmHandle};
use crate::error::{ApiError, Result};
use crate::types::{GuestProcess, PowerState};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use vm::VmState;

// ============================================================================
// Statistics
// ============================================================================

/// Call counters for the simulated datacenter.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct SimStats {
    connects: AtomicU64,
    disconnects: AtomicU64,
    lookups: AtomicU64,
    power_on_calls: AtomicU64,
    power_off_calls: AtomicU64,
    process_list_calls: AtomicU64,
}

impl SimStats {
    /// Sessions opened.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Sessions closed.
    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    /// `vm_by_name` calls.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// `power_on` calls.
    pub fn power_on_calls(&self) -> u64 {
        self.power_on_calls.load(Ordering::Relaxed)
    }

    /// `power_off` calls.
    pub fn power_off_calls(&self) -> u64 {
        self.power_off_calls.load(Ordering::Relaxed)
    }

    /// `list_processes` calls.
    pub fn process_list_calls(&self) -> u64 {
        self.process_list_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn record_power_on(&self) {
        self.power_on_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_power_off(&self) {
        self.power_off_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_process_list(&self) {
        self.process_list_calls.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Datacenter
// ============================================================================

struct SimHost {
    user: String,
    password: String,
    vms: BTreeMap<String, Arc<Mutex<VmState>>>,
}

/// Liveness of one simulated session.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) host: String,
    connected: AtomicBool,
    expired: AtomicBool,
}

impl SessionState {
    pub(crate) fn is_alive(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.expired.load(Ordering::SeqCst)
    }
}

struct DatacenterState {
    hosts: Mutex<HashMap<String, SimHost>>,
    sessions: Mutex<Vec<Arc<SessionState>>>,
    stats: Arc<SimStats>,
}

/// In-memory datacenter implementing [`Connector`].
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct SimulatedDatacenter {
    inner: Arc<DatacenterState>,
}

impl Default for SimulatedDatacenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDatacenter {
    /// Create an empty datacenter.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DatacenterState {
                hosts: Mutex::new(HashMap::new()),
                sessions: Mutex::new(Vec::new()),
                stats: Arc::new(SimStats::default()),
            }),
        }
    }

    /// Build a datacenter from an inventory.
    pub async fn from_inventory(inventory: Inventory) -> Result<Self> {
        let dc = Self::new();
        for host in inventory.hosts {
            dc.add_host(&host.host, &host.user, &host.password).await;
            for vm in host.vms {
                dc.add_vm(&host.host, vm).await?;
            }
        }
        Ok(dc)
    }

    /// Call counters.
    pub fn stats(&self) -> &SimStats {
        &self.inner.stats
    }

    /// Register a host accepting `user`/`password`. Replaces an existing host
    /// of the same name.
    pub async fn add_host(&self, host: &str, user: &str, password: &str) {
        tracing::debug!(host = %host, "Adding simulated host");
        self.inner.hosts.lock().await.insert(
            host.to_string(),
            SimHost {
                user: user.to_string(),
                password: password.to_string(),
                vms: BTreeMap::new(),
            },
        );
    }

    /// Names of every registered host, sorted.
    pub async fn host_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.hosts.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a VM on `host`.
    pub async fn add_vm(&self, host: &str, spec: VmSpec) -> Result<()> {
        let mut hosts = self.inner.hosts.lock().await;
        let sim_host = hosts.get_mut(host).ok_or_else(|| unknown_host(host))?;
        tracing::debug!(host = %host, vm = %spec.name, "Adding simulated VM");
        sim_host
            .vms
            .insert(spec.name.clone(), Arc::new(Mutex::new(VmState::from_spec(spec))));
        Ok(())
    }

    /// Unregister a VM, as if destroyed outside the library. Handles already
    /// resolved for it start failing with `VmNotFound`.
    pub async fn remove_vm(&self, host: &str, name: &str) -> Result<()> {
        let state = {
            let mut hosts = self.inner.hosts.lock().await;
            let sim_host = hosts.get_mut(host).ok_or_else(|| unknown_host(host))?;
            sim_host
                .vms
                .remove(name)
                .ok_or_else(|| ApiError::VmNotFound(name.to_string()))?
        };
        state.lock().await.destroyed = true;
        Ok(())
    }

    /// Expire the authentication of every open session to `host`.
    pub async fn expire_sessions(&self, host: &str) {
        let sessions = self.inner.sessions.lock().await;
        for session in sessions.iter().filter(|s| s.host == host) {
            session.expired.store(true, Ordering::SeqCst);
        }
        tracing::debug!(host = %host, "Expired simulated sessions");
    }

    /// Current power state of a VM.
    pub async fn power_state(&self, host: &str, vm: &str) -> Result<PowerState> {
        let state = self.vm_state(host, vm).await?;
        let power = state.lock().await.power;
        Ok(power)
    }

    /// Start or stop guest tools on a VM.
    pub async fn set_tools_running(&self, host: &str, vm: &str, running: bool) -> Result<()> {
        let state = self.vm_state(host, vm).await?;
        state.lock().await.tools_running = running;
        Ok(())
    }

    /// Configure how a guest program behaves on a VM.
    pub async fn set_program(
        &self,
        host: &str,
        vm: &str,
        program: &str,
        behavior: ProgramBehavior,
    ) -> Result<()> {
        let state = self.vm_state(host, vm).await?;
        state.lock().await.processes.set_program(program, behavior);
        Ok(())
    }

    /// Contents of a guest file, if present.
    pub async fn guest_file(&self, host: &str, vm: &str, path: &str) -> Result<Option<Bytes>> {
        let state = self.vm_state(host, vm).await?;
        let file = state.lock().await.fs.file(path);
        Ok(file)
    }

    /// Whether a guest directory exists.
    pub async fn guest_directory_exists(&self, host: &str, vm: &str, path: &str) -> Result<bool> {
        let state = self.vm_state(host, vm).await?;
        let exists = state.lock().await.fs.has_directory(path);
        Ok(exists)
    }

    /// Append a raw entry to a VM's process table.
    pub async fn insert_process(&self, host: &str, vm: &str, process: GuestProcess) -> Result<()> {
        let state = self.vm_state(host, vm).await?;
        state.lock().await.processes.insert(process);
        Ok(())
    }

    /// Drop every entry for `pid` from a VM's process table.
    pub async fn reap_process(&self, host: &str, vm: &str, pid: i64) -> Result<()> {
        let state = self.vm_state(host, vm).await?;
        state.lock().await.processes.reap(pid);
        Ok(())
    }

    async fn vm_state(&self, host: &str, vm: &str) -> Result<Arc<Mutex<VmState>>> {
        let hosts = self.inner.hosts.lock().await;
        let sim_host = hosts.get(host).ok_or_else(|| unknown_host(host))?;
        sim_host
            .vms
            .get(vm)
            .cloned()
            .ok_or_else(|| ApiError::VmNotFound(vm.to_string()))
    }
}

fn unknown_host(host: &str) -> ApiError {
    ApiError::Connection {
        host: host.to_string(),
        reason: "unknown host".into(),
    }
}

#[async_trait]
impl Connector for SimulatedDatacenter {
    async fn connect(&self, host: &str, user: &str, password: &str) -> Result<SessionHandle> {
        {
            let hosts = self.inner.hosts.lock().await;
            let sim_host = hosts.get(host).ok_or_else(|| unknown_host(host))?;
            if sim_host.user != user || sim_host.password != password {
                tracing::debug!(host = %host, user = %user, "Simulated login rejected");
                return Err(ApiError::Authentication {
                    host: host.to_string(),
                    user: user.to_string(),
                });
            }
        }

        let state = Arc::new(SessionState {
            host: host.to_string(),
            connected: AtomicBool::new(true),
            expired: AtomicBool::new(false),
        });
        self.inner.sessions.lock().await.push(Arc::clone(&state));
        self.inner.stats.connects.fetch_add(1, Ordering::Relaxed);

        let session = SimSession {
            id: Uuid::new_v4(),
            state,
            datacenter: Arc::clone(&self.inner),
        };
        tracing::debug!(host = %host, session = %session.id, "Simulated session opened");
        Ok(Arc::new(session))
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session to a simulated host.
pub struct SimSession {
    id: Uuid,
    state: Arc<SessionState>,
    datacenter: Arc<DatacenterState>,
}

impl SimSession {
    fn ensure_alive(&self) -> Result<()> {
        if !self.state.is_alive() {
            return Err(ApiError::NotConnected(self.state.host.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for SimSession {
    fn host(&self) -> &str {
        &self.state.host
    }

    async fn is_connected(&self) -> bool {
        self.state.is_alive()
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        self.datacenter
            .sessions
            .lock()
            .await
            .retain(|s| !Arc::ptr_eq(s, &self.state));
        self.datacenter.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(host = %self.state.host, session = %self.id, "Simulated session closed");
        Ok(())
    }

    async fn registered_vms(&self) -> Result<Vec<String>> {
        self.ensure_alive()?;
        let hosts = self.datacenter.hosts.lock().await;
        let sim_host = hosts
            .get(&self.state.host)
            .ok_or_else(|| unknown_host(&self.state.host))?;
        Ok(sim_host.vms.keys().cloned().collect())
    }

    async fn vm_by_name(&self, name: &str) -> Result<VmHandle> {
        self.ensure_alive()?;
        self.datacenter.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let state = {
            let hosts = self.datacenter.hosts.lock().await;
            let sim_host = hosts
                .get(&self.state.host)
                .ok_or_else(|| unknown_host(&self.state.host))?;
            sim_host
                .vms
                .get(name)
                .cloned()
                .ok_or_else(|| ApiError::VmNotFound(name.to_string()))?
        };
        Ok(Arc::new(SimVm::new(
            name,
            Arc::clone(&self.state),
            state,
            Arc::clone(&self.datacenter.stats),
        )))
    }
}
