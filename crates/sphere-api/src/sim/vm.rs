//! Simulated virtual machines.

use super::guest::{GuestFs, ProcessTable};
use super::inventory::VmSpec;
use super::{SessionState, SimStats};
use crate::client::VirtualMachine;
use crate::error::{ApiError, Result};
use crate::types::{GuestFileEntry, GuestProcess, PowerState, ProcessSpec, VmProperties};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Interval at which `wait_for_tools` re-checks the tools state.
const TOOLS_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct Snapshot {
    name: String,
    power: PowerState,
    fs: GuestFs,
}

/// Server-side state of one VM, shared by every handle resolved for it.
#[derive(Debug)]
pub(crate) struct VmState {
    pub(crate) name: String,
    pub(crate) power: PowerState,
    pub(crate) tools_installed: bool,
    pub(crate) tools_running: bool,
    pub(crate) guest_credentials: Option<(String, String)>,
    pub(crate) properties: VmProperties,
    snapshots: Vec<Snapshot>,
    current_snapshot: Option<usize>,
    pub(crate) fs: GuestFs,
    pub(crate) processes: ProcessTable,
    pub(crate) destroyed: bool,
}

impl VmState {
    pub(crate) fn from_spec(spec: VmSpec) -> Self {
        let fs = GuestFs::default();
        let running = spec.power_state == PowerState::PoweredOn;
        let snapshots: Vec<Snapshot> = spec
            .snapshots
            .iter()
            .map(|name| Snapshot {
                name: name.clone(),
                power: spec.power_state,
                fs: fs.clone(),
            })
            .collect();
        let current_snapshot = snapshots.len().checked_sub(1);
        let guest_credentials = match (spec.guest_user, spec.guest_password) {
            (Some(user), password) => Some((user, password.unwrap_or_default())),
            _ => None,
        };

        Self {
            name: spec.name,
            power: spec.power_state,
            tools_installed: spec.tools_installed,
            tools_running: running && spec.tools_installed,
            guest_credentials,
            properties: spec.properties,
            snapshots,
            current_snapshot,
            fs,
            processes: ProcessTable::with_programs(spec.programs),
            destroyed: false,
        }
    }

    fn set_power(&mut self, power: PowerState) {
        self.power = power;
        self.tools_running = power == PowerState::PoweredOn && self.tools_installed;
    }

    fn restore(&mut self, index: usize) {
        let snapshot = self.snapshots[index].clone();
        self.fs = snapshot.fs;
        self.set_power(snapshot.power);
        self.current_snapshot = Some(index);
    }

    fn expect_power(&self, expected: PowerState) -> Result<()> {
        if self.power != expected {
            return Err(ApiError::InvalidPowerState {
                vm: self.name.clone(),
                expected: expected.to_string(),
                actual: self.power.to_string(),
            });
        }
        Ok(())
    }

    fn expect_tools(&self) -> Result<()> {
        self.expect_power(PowerState::PoweredOn)?;
        if !self.tools_running {
            return Err(ApiError::ToolsNotRunning(self.name.clone()));
        }
        Ok(())
    }
}

/// Handle to a simulated VM, bound to the session that resolved it.
///
/// Guest login state lives on the handle, so a handle obtained from a fresh
/// lookup has to log in again.
pub struct SimVm {
    name: String,
    session: Arc<SessionState>,
    state: Arc<Mutex<VmState>>,
    stats: Arc<SimStats>,
    guest_user: Mutex<Option<String>>,
}

impl SimVm {
    pub(crate) fn new(
        name: &str,
        session: Arc<SessionState>,
        state: Arc<Mutex<VmState>>,
        stats: Arc<SimStats>,
    ) -> Self {
        Self {
            name: name.to_string(),
            session,
            state,
            stats,
            guest_user: Mutex::new(None),
        }
    }

    /// Lock the VM state after checking the session and that the VM still exists.
    async fn lock(&self) -> Result<tokio::sync::MutexGuard<'_, VmState>> {
        if !self.session.is_alive() {
            return Err(ApiError::NotConnected(self.session.host.clone()));
        }
        let state = self.state.lock().await;
        if state.destroyed {
            return Err(ApiError::VmNotFound(self.name.clone()));
        }
        Ok(state)
    }

    /// Lock the VM state for a guest operation: tools running and logged in.
    async fn lock_guest(&self) -> Result<(tokio::sync::MutexGuard<'_, VmState>, String)> {
        let state = self.lock().await?;
        state.expect_tools()?;
        let user = self
            .guest_user
            .lock()
            .await
            .clone()
            .ok_or_else(|| ApiError::GuestAuth(self.name.clone()))?;
        Ok((state, user))
    }
}

#[async_trait]
impl VirtualMachine for SimVm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn properties(&self) -> Result<VmProperties> {
        let state = self.lock().await?;
        let mut properties = state.properties.clone();
        properties.insert("name".into(), serde_json::json!(state.name));
        properties.insert("host".into(), serde_json::json!(self.session.host));
        properties.insert("power_state".into(), serde_json::json!(state.power));
        properties.insert("tools_running".into(), serde_json::json!(state.tools_running));
        properties.insert(
            "snapshots".into(),
            serde_json::json!(state.snapshots.iter().map(|s| &s.name).collect::<Vec<_>>()),
        );
        Ok(properties)
    }

    async fn power_state(&self) -> Result<PowerState> {
        Ok(self.lock().await?.power)
    }

    async fn power_on(&self) -> Result<()> {
        self.stats.record_power_on();
        let mut state = self.lock().await?;
        if state.power == PowerState::PoweredOn {
            return Err(ApiError::InvalidPowerState {
                vm: state.name.clone(),
                expected: "poweredOff or suspended".into(),
                actual: state.power.to_string(),
            });
        }
        state.set_power(PowerState::PoweredOn);
        tracing::debug!(vm = %self.name, "Simulated power on");
        Ok(())
    }

    async fn power_off(&self) -> Result<()> {
        self.stats.record_power_off();
        let mut state = self.lock().await?;
        state.expect_power(PowerState::PoweredOn)?;
        state.set_power(PowerState::PoweredOff);
        tracing::debug!(vm = %self.name, "Simulated power off");
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.lock().await?;
        state.expect_power(PowerState::PoweredOn)?;
        state.set_power(PowerState::PoweredOn);
        Ok(())
    }

    async fn shutdown_guest(&self) -> Result<()> {
        let mut state = self.lock().await?;
        state.expect_tools()?;
        state.set_power(PowerState::PoweredOff);
        Ok(())
    }

    async fn reboot_guest(&self) -> Result<()> {
        let state = self.lock().await?;
        state.expect_tools()?;
        Ok(())
    }

    async fn revert_to_snapshot(&self) -> Result<()> {
        let mut state = self.lock().await?;
        let index = state
            .current_snapshot
            .ok_or_else(|| ApiError::SnapshotNotFound {
                vm: self.name.clone(),
                snapshot: "<current>".into(),
            })?;
        state.restore(index);
        Ok(())
    }

    async fn revert_to_named_snapshot(&self, snapshot: &str) -> Result<()> {
        let mut state = self.lock().await?;
        let index = state
            .snapshots
            .iter()
            .position(|s| s.name == snapshot)
            .ok_or_else(|| ApiError::SnapshotNotFound {
                vm: self.name.clone(),
                snapshot: snapshot.to_string(),
            })?;
        state.restore(index);
        Ok(())
    }

    async fn wait_for_tools(&self, timeout: Duration) -> Result<()> {
        let start = tokio::time::Instant::now();
        loop {
            {
                let state = self.lock().await?;
                if state.power == PowerState::PoweredOn && state.tools_running {
                    return Ok(());
                }
            }
            if start.elapsed() >= timeout {
                return Err(ApiError::Timeout(timeout));
            }
            tokio::time::sleep(TOOLS_CHECK_INTERVAL).await;
        }
    }

    async fn login_in_guest(&self, user: &str, password: &str) -> Result<()> {
        let state = self.lock().await?;
        state.expect_tools()?;
        if let Some((expected_user, expected_password)) = &state.guest_credentials {
            if expected_user != user || expected_password != password {
                return Err(ApiError::GuestAuth(self.name.clone()));
            }
        }
        *self.guest_user.lock().await = Some(user.to_string());
        Ok(())
    }

    async fn send_file(&self, local_path: &Path, guest_path: &str, overwrite: bool) -> Result<()> {
        let data = Bytes::from(tokio::fs::read(local_path).await?);
        let (mut state, _) = self.lock_guest().await?;
        state.fs.write(guest_path, data, overwrite)
    }

    async fn get_file(&self, guest_path: &str, local_path: &Path, overwrite: bool) -> Result<()> {
        let data = {
            let (state, _) = self.lock_guest().await?;
            state.fs.read(guest_path)?
        };
        if !overwrite && tokio::fs::try_exists(local_path).await? {
            return Err(ApiError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", local_path.display()),
            )));
        }
        tokio::fs::write(local_path, &data).await?;
        Ok(())
    }

    async fn move_file(&self, src_path: &str, dst_path: &str, overwrite: bool) -> Result<()> {
        let (mut state, _) = self.lock_guest().await?;
        state.fs.move_file(src_path, dst_path, overwrite)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let (mut state, _) = self.lock_guest().await?;
        state.fs.delete_file(path)
    }

    async fn list_files(&self, path: &str) -> Result<Vec<GuestFileEntry>> {
        let (state, _) = self.lock_guest().await?;
        state.fs.list(path)
    }

    async fn make_directory(&self, path: &str, create_parents: bool) -> Result<()> {
        let (mut state, _) = self.lock_guest().await?;
        state.fs.make_directory(path, create_parents)
    }

    async fn move_directory(&self, src_path: &str, dst_path: &str) -> Result<()> {
        let (mut state, _) = self.lock_guest().await?;
        state.fs.move_directory(src_path, dst_path)
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let (mut state, _) = self.lock_guest().await?;
        state.fs.delete_directory(path, recursive)
    }

    async fn start_process(&self, spec: &ProcessSpec) -> Result<i64> {
        let (mut state, user) = self.lock_guest().await?;
        let pid = state.processes.start(spec, &user);
        tracing::debug!(vm = %self.name, pid, cmd = %spec.command_line(), "Simulated process started");
        Ok(pid)
    }

    async fn list_processes(&self) -> Result<Vec<GuestProcess>> {
        self.stats.record_process_list();
        let (mut state, _) = self.lock_guest().await?;
        Ok(state.processes.list())
    }

    async fn terminate_process(&self, pid: i64) -> Result<()> {
        let (mut state, _) = self.lock_guest().await?;
        state.processes.terminate(pid)
    }
}
