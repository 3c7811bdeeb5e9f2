//! SphereLibrary - the keyword context owned by one test run.
//!
//! Every public method is one keyword. Keywords resolve their VM through the
//! handle cache of the current connection, make one client call and log the
//! outcome. Nothing is retried; client errors propagate unchanged.

use crate::cache::VmCache;
use crate::config::LibraryConfig;
use crate::error::{CoreError, Result};
use crate::poll::{poll_until, PollConfig, PollOutcome};
use crate::registry::{Connection, ConnectionCache};
use sphere_api::{Connector, GuestFileEntry, GuestProcess, ProcessSpec, VmHandle, VmProperties};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Keyword library for VMware test automation.
///
/// Owns the connection registry and the VM handle cache for one test run.
/// Create it at suite setup and call
/// [`close_all_connections`](Self::close_all_connections) at teardown.
///
/// # Example
///
/// ```ignore
/// use sphere_core::{LibraryConfig, SphereLibrary};
///
/// let mut lib = SphereLibrary::new(connector, LibraryConfig::default());
/// let index = lib.open_connection("vc.lab", "admin", "secret", Some("lab")).await?;
/// lib.power_on_vm("web01").await?;
/// lib.login_in_guest("web01", "root", "toor").await?;
/// let exit_code = lib
///     .run_synchronous_process("web01", &ProcessSpec::new("/bin/true"))
///     .await?;
/// lib.close_all_connections().await?;
/// ```
pub struct SphereLibrary<C> {
    connector: C,
    connections: ConnectionCache<Connection>,
    vms: VmCache,
    config: LibraryConfig,
}

fn require(name: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidArgument {
            name,
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

impl<C: Connector> SphereLibrary<C> {
    /// Create a library with no open connections.
    pub fn new(connector: C, config: LibraryConfig) -> Self {
        tracing::info!(
            poll_interval_ms = config.process_poll_interval.as_millis() as u64,
            process_timeout_secs = config.process_timeout.map(|t| t.as_secs()),
            stale_handle_policy = ?config.stale_handle_policy,
            "Creating keyword library"
        );
        Self {
            connector,
            connections: ConnectionCache::new(),
            vms: VmCache::new(),
            config,
        }
    }

    /// Get the library configuration.
    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Get the connection registry.
    pub fn connections(&self) -> &ConnectionCache<Connection> {
        &self.connections
    }

    /// Get the VM handle cache.
    pub fn vm_cache(&self) -> &VmCache {
        &self.vms
    }

    fn current(&self) -> Result<&Connection> {
        self.connections.current().ok_or(CoreError::NoConnection)
    }

    async fn vm(&mut self, name: &str) -> Result<VmHandle> {
        require("name", name)?;
        let connection = self
            .connections
            .current()
            .ok_or(CoreError::NoConnection)?;
        self.vms
            .resolve(connection, name, self.config.stale_handle_policy)
            .await
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Open a connection to `host` and make it current.
    ///
    /// Existing connections stay open in the background. Returns the 1-based
    /// index of the new connection; indices restart at `1` after
    /// [`close_all_connections`](Self::close_all_connections).
    pub async fn open_connection(
        &mut self,
        host: &str,
        user: &str,
        password: &str,
        alias: Option<&str>,
    ) -> Result<usize> {
        require("host", host)?;
        require("user", user)?;
        let session = self.connector.connect(host, user, password).await?;
        let index = self
            .connections
            .register(Connection::new(host, session), alias);
        tracing::info!(host = %host, index, alias = ?alias, "Connection opened to host {host}");
        Ok(index)
    }

    /// Whether the current connection is still authenticated.
    pub async fn is_connected(&self) -> Result<bool> {
        let connected = self.current()?.session().is_connected().await;
        tracing::debug!(connected, "Checked current connection");
        Ok(connected)
    }

    /// Make the connection named by `index_or_alias` current.
    ///
    /// `None` leaves the current connection unchanged. Returns the index that
    /// was current before the call.
    pub fn switch_connection(&mut self, index_or_alias: Option<&str>) -> Result<Option<usize>> {
        let previous = self.connections.current_index();
        match index_or_alias {
            Some(target) => {
                self.connections.switch(target)?;
                tracing::info!(
                    target = %target,
                    index = self.connections.current_index(),
                    "Connection switched to {target}"
                );
            }
            None => {
                tracing::info!("No index or alias given, connection has not been switched");
            }
        }
        Ok(previous)
    }

    /// Close the current connection.
    ///
    /// No other connection becomes current; use
    /// [`switch_connection`](Self::switch_connection) afterwards.
    pub async fn close_connection(&mut self) -> Result<()> {
        let connection = self.current()?.clone();
        connection.session().disconnect().await?;
        self.vms.invalidate_for_session(connection.id());
        self.connections.clear_current();
        tracing::info!(
            host = %connection.host(),
            "Connection closed, there is no longer a current connection"
        );
        Ok(())
    }

    /// Close every connection and reset index allocation.
    ///
    /// Every session is disconnected even if an earlier one fails; the first
    /// failure is returned once the registry and cache are reset.
    pub async fn close_all_connections(&mut self) -> Result<()> {
        let connections = self.connections.close_all();
        self.vms.clear();

        let count = connections.len();
        let mut first_error = None;
        for connection in connections {
            if let Err(e) = connection.session().disconnect().await {
                tracing::warn!(host = %connection.host(), error = %e, "Failed to disconnect");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        tracing::info!(count, "All connections closed");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Names of every VM registered on the current connection.
    pub async fn get_vm_names(&self) -> Result<Vec<String>> {
        let names = self.current()?.session().registered_vms().await?;
        tracing::debug!(count = names.len(), "Listed registered VMs");
        Ok(names)
    }

    /// Properties of the named VM, fetched fresh from the server.
    pub async fn get_vm_properties(&mut self, name: &str) -> Result<VmProperties> {
        let vm = self.vm(name).await?;
        let properties = vm.properties().await?;
        tracing::debug!(vm = %name, count = properties.len(), "Fetched VM properties");
        Ok(properties)
    }

    // =========================================================================
    // Power
    // =========================================================================

    /// Power on the VM unless it already is. Blocks until the task completes.
    pub async fn power_on_vm(&mut self, name: &str) -> Result<()> {
        if self.vm_is_powered_on(name).await? {
            tracing::info!(vm = %name, "VM {name} was already powered on");
            return Ok(());
        }
        self.vm(name).await?.power_on().await?;
        tracing::info!(vm = %name, "VM {name} powered on");
        Ok(())
    }

    /// Power off the VM unless it already is. Blocks until the task completes.
    pub async fn power_off_vm(&mut self, name: &str) -> Result<()> {
        if self.vm_is_powered_off(name).await? {
            tracing::info!(vm = %name, "VM {name} was already powered off");
            return Ok(());
        }
        self.vm(name).await?.power_off().await?;
        tracing::info!(vm = %name, "VM {name} powered off");
        Ok(())
    }

    /// Hard reset the VM. Blocks until the task completes.
    pub async fn reset_vm(&mut self, name: &str) -> Result<()> {
        self.vm(name).await?.reset().await?;
        tracing::info!(vm = %name, "VM {name} reset");
        Ok(())
    }

    /// Initiate a guest OS shutdown and return immediately.
    pub async fn shutdown_vm_os(&mut self, name: &str) -> Result<()> {
        self.vm(name).await?.shutdown_guest().await?;
        tracing::info!(vm = %name, "VM {name} shutdown initiated");
        Ok(())
    }

    /// Initiate a guest OS reboot and return immediately.
    pub async fn reboot_vm_os(&mut self, name: &str) -> Result<()> {
        self.vm(name).await?.reboot_guest().await?;
        tracing::info!(vm = %name, "VM {name} reboot initiated");
        Ok(())
    }

    /// True if the VM is powered on.
    pub async fn vm_is_powered_on(&mut self, name: &str) -> Result<bool> {
        Ok(self.vm(name).await?.is_powered_on().await?)
    }

    /// True if the VM is powered off.
    pub async fn vm_is_powered_off(&mut self, name: &str) -> Result<bool> {
        Ok(self.vm(name).await?.is_powered_off().await?)
    }

    /// Revert to `snapshot`, or to the current snapshot when `None`.
    pub async fn revert_vm_to_snapshot(&mut self, name: &str, snapshot: Option<&str>) -> Result<()> {
        if let Some(snapshot) = snapshot {
            require("snapshot", snapshot)?;
        }
        let vm = self.vm(name).await?;
        match snapshot {
            None => {
                vm.revert_to_snapshot().await?;
                tracing::info!(vm = %name, "VM {name} reverted to current snapshot");
            }
            Some(snapshot) => {
                vm.revert_to_named_snapshot(snapshot).await?;
                tracing::info!(vm = %name, snapshot = %snapshot, "VM {name} reverted to snapshot {snapshot}");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Guest
    // =========================================================================

    /// Wait until guest tools run, up to `timeout` or the configured default.
    pub async fn wait_for_vmware_tools(&mut self, name: &str, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.config.tools_timeout);
        let start = tokio::time::Instant::now();
        self.vm(name).await?.wait_for_tools(timeout).await?;
        tracing::info!(
            vm = %name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "VMware tools running in VM {name}"
        );
        Ok(())
    }

    /// Log in to the guest OS. Guest file and process keywords need this.
    pub async fn login_in_guest(&mut self, name: &str, user: &str, password: &str) -> Result<()> {
        require("user", user)?;
        self.vm(name).await?.login_in_guest(user, password).await?;
        tracing::info!(vm = %name, user = %user, "Logged in to guest of VM {name}");
        Ok(())
    }

    /// Copy a host file into the guest.
    pub async fn send_file(
        &mut self,
        name: &str,
        local_path: &Path,
        guest_path: &str,
        overwrite: bool,
    ) -> Result<()> {
        require("guest_path", guest_path)?;
        self.vm(name)
            .await?
            .send_file(local_path, guest_path, overwrite)
            .await?;
        tracing::info!(
            vm = %name,
            local = %local_path.display(),
            guest = %guest_path,
            "File sent to VM {name}"
        );
        Ok(())
    }

    /// Copy a guest file to the host.
    pub async fn get_file(
        &mut self,
        name: &str,
        guest_path: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> Result<()> {
        require("guest_path", guest_path)?;
        self.vm(name)
            .await?
            .get_file(guest_path, local_path, overwrite)
            .await?;
        tracing::info!(
            vm = %name,
            guest = %guest_path,
            local = %local_path.display(),
            "File retrieved from VM {name}"
        );
        Ok(())
    }

    /// Move or rename a guest file.
    pub async fn move_file(&mut self, name: &str, src_path: &str, dst_path: &str, overwrite: bool) -> Result<()> {
        require("src_path", src_path)?;
        require("dst_path", dst_path)?;
        self.vm(name)
            .await?
            .move_file(src_path, dst_path, overwrite)
            .await?;
        tracing::info!(vm = %name, src = %src_path, dst = %dst_path, "File moved in VM {name}");
        Ok(())
    }

    /// Delete a guest file.
    pub async fn delete_file(&mut self, name: &str, path: &str) -> Result<()> {
        require("path", path)?;
        self.vm(name).await?.delete_file(path).await?;
        tracing::info!(vm = %name, path = %path, "File deleted in VM {name}");
        Ok(())
    }

    /// Entries of a guest directory.
    pub async fn list_files(&mut self, name: &str, path: &str) -> Result<Vec<GuestFileEntry>> {
        require("path", path)?;
        let entries = self.vm(name).await?.list_files(path).await?;
        tracing::debug!(vm = %name, path = %path, count = entries.len(), "Listed guest directory");
        Ok(entries)
    }

    /// Create a guest directory.
    pub async fn make_directory(&mut self, name: &str, path: &str, create_parents: bool) -> Result<()> {
        require("path", path)?;
        self.vm(name)
            .await?
            .make_directory(path, create_parents)
            .await?;
        tracing::info!(vm = %name, path = %path, "Directory created in VM {name}");
        Ok(())
    }

    /// Move or rename a guest directory.
    pub async fn move_directory(&mut self, name: &str, src_path: &str, dst_path: &str) -> Result<()> {
        require("src_path", src_path)?;
        require("dst_path", dst_path)?;
        self.vm(name)
            .await?
            .move_directory(src_path, dst_path)
            .await?;
        tracing::info!(vm = %name, src = %src_path, dst = %dst_path, "Directory moved in VM {name}");
        Ok(())
    }

    /// Delete a guest directory.
    pub async fn delete_directory(&mut self, name: &str, path: &str, recursive: bool) -> Result<()> {
        require("path", path)?;
        self.vm(name)
            .await?
            .delete_directory(path, recursive)
            .await?;
        tracing::info!(vm = %name, path = %path, recursive, "Directory deleted in VM {name}");
        Ok(())
    }

    // =========================================================================
    // Processes
    // =========================================================================

    /// Start a guest process and return its pid.
    pub async fn start_process(&mut self, name: &str, spec: &ProcessSpec) -> Result<i64> {
        require("program", &spec.program)?;
        let pid = self.vm(name).await?.start_process(spec).await?;
        tracing::info!(vm = %name, pid, cmd = %spec.command_line(), "Process started in VM {name}");
        Ok(pid)
    }

    /// The guest process table.
    pub async fn list_processes(&mut self, name: &str) -> Result<Vec<GuestProcess>> {
        let processes = self.vm(name).await?.list_processes().await?;
        tracing::debug!(vm = %name, count = processes.len(), "Listed guest processes");
        Ok(processes)
    }

    /// Kill a guest process.
    pub async fn terminate_process(&mut self, name: &str, pid: i64) -> Result<()> {
        self.vm(name).await?.terminate_process(pid).await?;
        tracing::info!(vm = %name, pid, "Process {pid} terminated in VM {name}");
        Ok(())
    }

    /// Start a guest process and wait for it to finish.
    ///
    /// The process table is checked right after the start and then every
    /// `process_poll_interval`. Exactly one entry must carry the pid at each
    /// check; the exit code is returned once that entry reports an end time.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ProcessState`] when no entry or several entries match,
    ///   or a finished entry carries no exit code
    /// - [`CoreError::PollTimeout`] when `process_timeout` elapses first
    pub async fn run_synchronous_process(&mut self, name: &str, spec: &ProcessSpec) -> Result<i32> {
        self.start_synchronous_process(name, spec).await?.wait().await
    }

    /// Start a guest process and return a waiter for its exit code.
    ///
    /// The waiter owns the VM handle and poll settings, so the library can be
    /// used or dropped while the process runs. [`ProcessWait::wait`] behaves
    /// like the polling half of
    /// [`run_synchronous_process`](Self::run_synchronous_process).
    pub async fn start_synchronous_process(&mut self, name: &str, spec: &ProcessSpec) -> Result<ProcessWait> {
        require("program", &spec.program)?;
        let vm = self.vm(name).await?;
        let pid = vm.start_process(spec).await?;
        tracing::info!(
            vm = %name,
            pid,
            cmd = %spec.command_line(),
            "Process started in VM {name}, waiting for completion"
        );
        Ok(ProcessWait {
            vm_name: name.to_string(),
            vm,
            pid,
            poll: self.config.process_poll(),
        })
    }
}

/// A started guest process whose exit code has not been collected yet.
pub struct ProcessWait {
    vm_name: String,
    vm: VmHandle,
    pid: i64,
    poll: PollConfig,
}

impl ProcessWait {
    /// Guest pid of the process.
    pub fn pid(&self) -> i64 {
        self.pid
    }

    /// Poll the guest process table until the process ends.
    pub async fn wait(self) -> Result<i32> {
        let Self { vm_name, vm, pid, poll } = self;

        let outcome = poll_until(&poll, || {
            let vm = Arc::clone(&vm);
            async move { check_process(&vm, pid).await }
        })
        .await?;

        match outcome {
            PollOutcome::Ready(exit_code) => {
                tracing::info!(vm = %vm_name, pid, exit_code, "Process {pid} in VM {vm_name} finished");
                Ok(exit_code)
            }
            PollOutcome::TimedOut { elapsed, attempts } => {
                tracing::warn!(
                    vm = %vm_name,
                    pid,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Gave up waiting for process"
                );
                Err(CoreError::PollTimeout { pid, elapsed })
            }
        }
    }
}

impl std::fmt::Debug for ProcessWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWait")
            .field("vm", &self.vm_name)
            .field("pid", &self.pid)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

/// One check of the process table: `Some(exit_code)` once `pid` has ended.
async fn check_process(vm: &VmHandle, pid: i64) -> Result<Option<i32>> {
    let processes = vm.list_processes().await?;
    let matches: Vec<&GuestProcess> = processes.iter().filter(|p| p.pid == pid).collect();
    let process = match matches.as_slice() {
        [process] => *process,
        [] => {
            return Err(CoreError::ProcessState {
                pid,
                reason: "no process with this pid in the guest process list".into(),
            })
        }
        many => {
            return Err(CoreError::ProcessState {
                pid,
                reason: format!("{} processes share this pid", many.len()),
            })
        }
    };

    if !process.has_exited() {
        tracing::trace!(pid, "Process still running");
        return Ok(None);
    }
    process
        .exit_code
        .map(Some)
        .ok_or_else(|| CoreError::ProcessState {
            pid,
            reason: "process ended without an exit code".into(),
        })
}
