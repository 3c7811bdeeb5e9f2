//! Client traits for a virtualization server.
//!
//! These traits are the whole contract between the keyword library and a
//! VMware client. Each method is one remote call; implementations do not
//! retry and report failures as [`ApiError`](crate::ApiError).

use crate::error::Result;
use crate::types::{GuestFileEntry, GuestProcess, PowerState, ProcessSpec, VmProperties};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to an open session.
pub type SessionHandle = Arc<dyn Session>;

/// Shared handle to a resolved virtual machine.
pub type VmHandle = Arc<dyn VirtualMachine>;

/// Opens authenticated sessions to vCenter or ESXi hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate to `host`.
    ///
    /// # Errors
    /// [`ApiError::Connection`](crate::ApiError::Connection) when the host is
    /// unreachable, [`ApiError::Authentication`](crate::ApiError::Authentication)
    /// when the credentials are rejected.
    async fn connect(&self, host: &str, user: &str, password: &str) -> Result<SessionHandle>;
}

/// An authenticated connection to one host.
#[async_trait]
pub trait Session: Send + Sync {
    /// Host this session is connected to.
    fn host(&self) -> &str;

    /// Whether the server still accepts this session's authentication.
    async fn is_connected(&self) -> bool;

    /// Log out and close the session.
    async fn disconnect(&self) -> Result<()>;

    /// Display names of every VM registered on the host.
    async fn registered_vms(&self) -> Result<Vec<String>>;

    /// Resolve a VM by display name.
    ///
    /// # Errors
    /// [`ApiError::VmNotFound`](crate::ApiError::VmNotFound) if no VM of that
    /// name is registered.
    async fn vm_by_name(&self, name: &str) -> Result<VmHandle>;
}

/// A virtual machine resolved from a session.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    /// Display name the VM was resolved with.
    fn name(&self) -> &str;

    /// Fetch the VM's properties from the server, bypassing any client cache.
    async fn properties(&self) -> Result<VmProperties>;

    /// Current power state.
    async fn power_state(&self) -> Result<PowerState>;

    /// Power on, blocking until the task completes.
    async fn power_on(&self) -> Result<()>;

    /// Power off, blocking until the task completes.
    async fn power_off(&self) -> Result<()>;

    /// Hard reset, blocking until the task completes.
    async fn reset(&self) -> Result<()>;

    /// Ask the guest OS to shut down. Returns immediately.
    async fn shutdown_guest(&self) -> Result<()>;

    /// Ask the guest OS to reboot. Returns immediately.
    async fn reboot_guest(&self) -> Result<()>;

    /// Revert to the current snapshot.
    async fn revert_to_snapshot(&self) -> Result<()>;

    /// Revert to the snapshot called `snapshot`.
    async fn revert_to_named_snapshot(&self, snapshot: &str) -> Result<()>;

    /// Block until guest tools report running, or fail after `timeout`.
    async fn wait_for_tools(&self, timeout: Duration) -> Result<()>;

    /// Authenticate against the guest OS. Required before guest file and
    /// process operations.
    async fn login_in_guest(&self, user: &str, password: &str) -> Result<()>;

    /// Copy a host file into the guest.
    async fn send_file(&self, local_path: &Path, guest_path: &str, overwrite: bool) -> Result<()>;

    /// Copy a guest file to the host.
    async fn get_file(&self, guest_path: &str, local_path: &Path, overwrite: bool) -> Result<()>;

    /// Move or rename a guest file.
    async fn move_file(&self, src_path: &str, dst_path: &str, overwrite: bool) -> Result<()>;

    /// Delete a guest file.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// List the entries of a guest directory.
    async fn list_files(&self, path: &str) -> Result<Vec<GuestFileEntry>>;

    /// Create a guest directory.
    async fn make_directory(&self, path: &str, create_parents: bool) -> Result<()>;

    /// Move or rename a guest directory.
    async fn move_directory(&self, src_path: &str, dst_path: &str) -> Result<()>;

    /// Delete a guest directory.
    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<()>;

    /// Start a guest process and return its pid.
    async fn start_process(&self, spec: &ProcessSpec) -> Result<i64>;

    /// Current guest process table, including recently exited processes.
    async fn list_processes(&self) -> Result<Vec<GuestProcess>>;

    /// Kill a guest process.
    async fn terminate_process(&self, pid: i64) -> Result<()>;

    /// True if the VM is powered on.
    async fn is_powered_on(&self) -> Result<bool> {
        Ok(self.power_state().await? == PowerState::PoweredOn)
    }

    /// True if the VM is powered off.
    async fn is_powered_off(&self) -> Result<bool> {
        Ok(self.power_state().await? == PowerState::PoweredOff)
    }
}
