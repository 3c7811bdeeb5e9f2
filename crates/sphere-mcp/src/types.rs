//! Tool parameter and response types for the keyword tools.
//!
//! These types use serde for serialization and schemars for automatic
//! JSON Schema generation required by MCP.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sphere_api::{FileKind, GuestFileEntry, GuestProcess, ProcessSpec, VmProperties};
use std::collections::BTreeMap;

// ============================================================================
// Connections
// ============================================================================

/// Parameters for opening a connection.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenConnectionParams {
    /// vCenter or ESXi host name.
    pub host: String,

    /// User name.
    pub user: String,

    /// Password.
    pub password: String,

    /// Optional alias for switching back to this connection.
    #[serde(default)]
    pub alias: Option<String>,
}

/// Result of opening a connection.
#[derive(Debug, Serialize, JsonSchema)]
pub struct OpenConnectionResult {
    /// 1-based index of the new connection.
    pub index: usize,
}

/// A connection named by its 1-based index or by its alias.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum IndexOrAlias {
    /// Index returned by `open_connection`.
    Index(usize),
    /// Alias given to `open_connection`, or an index written as text.
    Alias(String),
}

impl IndexOrAlias {
    /// The lookup key understood by the connection registry.
    pub fn to_key(&self) -> String {
        match self {
            Self::Index(index) => index.to_string(),
            Self::Alias(alias) => alias.clone(),
        }
    }
}

/// Parameters for switching the current connection.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SwitchConnectionParams {
    /// Index or alias of the target connection. Omit to keep the current one.
    #[serde(default)]
    pub index_or_alias: Option<IndexOrAlias>,
}

/// Result of switching connections.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SwitchConnectionResult {
    /// Index that was current before the switch.
    pub previous_index: Option<usize>,
}

/// Result of checking the current connection.
#[derive(Debug, Serialize, JsonSchema)]
pub struct IsConnectedResult {
    /// Whether the session is still authenticated.
    pub connected: bool,
}

/// Snapshot of the server reported by the health endpoint.
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    /// `ready`, or `busy` while a keyword holds the library.
    pub status: &'static str,

    /// Backend behind the keywords.
    pub backend: &'static str,

    /// Hosts known to the backend.
    pub hosts: Vec<String>,

    /// Connections registered since the last `close_all_connections`,
    /// closed ones included. Absent while busy.
    pub registered_connections: Option<usize>,

    /// Index of the current connection. Absent while busy or when none is current.
    pub current_index: Option<usize>,
}

/// Result of an operation with no return value.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SuccessResult {
    /// Whether the operation succeeded.
    pub success: bool,
}

// ============================================================================
// Inventory and power
// ============================================================================

/// Parameters naming a VM.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VmParams {
    /// VM display name.
    pub name: String,
}

/// Result of listing VM names.
#[derive(Debug, Serialize, JsonSchema)]
pub struct VmNamesResult {
    /// Names of every registered VM.
    pub names: Vec<String>,
}

/// Result of reading VM properties.
#[derive(Debug, Serialize, JsonSchema)]
pub struct VmPropertiesResult {
    /// Property name to value.
    pub properties: VmProperties,
}

/// Result of a power state check.
#[derive(Debug, Serialize, JsonSchema)]
pub struct PowerCheckResult {
    /// Whether the VM is in the queried state.
    pub value: bool,
}

/// Parameters for reverting to a snapshot.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RevertSnapshotParams {
    /// VM display name.
    pub name: String,

    /// Snapshot name. Omit to revert to the current snapshot.
    #[serde(default)]
    pub snapshot: Option<String>,
}

// ============================================================================
// Guest
// ============================================================================

/// Parameters for waiting on guest tools.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WaitForToolsParams {
    /// VM display name.
    pub name: String,

    /// Timeout in seconds (default: server setting).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Parameters for a guest login.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoginInGuestParams {
    /// VM display name.
    pub name: String,

    /// Guest OS user.
    pub user: String,

    /// Guest OS password.
    pub password: String,
}

/// Parameters for copying a host file into the guest.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendFileParams {
    /// VM display name.
    pub name: String,

    /// Path on the server host.
    pub local_path: String,

    /// Absolute guest path.
    pub guest_path: String,

    /// Replace an existing file (default: false).
    #[serde(default)]
    pub overwrite: bool,
}

/// Parameters for copying a guest file to the host.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetFileParams {
    /// VM display name.
    pub name: String,

    /// Absolute guest path.
    pub guest_path: String,

    /// Path on the server host.
    pub local_path: String,

    /// Replace an existing file (default: false).
    #[serde(default)]
    pub overwrite: bool,
}

/// Parameters for moving a guest file.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveFileParams {
    /// VM display name.
    pub name: String,

    /// Current guest path.
    pub src_path: String,

    /// New guest path.
    pub dst_path: String,

    /// Replace an existing file (default: false).
    #[serde(default)]
    pub overwrite: bool,
}

/// Parameters naming a guest path.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GuestPathParams {
    /// VM display name.
    pub name: String,

    /// Absolute guest path.
    pub path: String,
}

/// Parameters for creating a guest directory.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MakeDirectoryParams {
    /// VM display name.
    pub name: String,

    /// Absolute guest path.
    pub path: String,

    /// Create missing parent directories (default: false).
    #[serde(default)]
    pub create_parents: bool,
}

/// Parameters for moving a guest directory.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveDirectoryParams {
    /// VM display name.
    pub name: String,

    /// Current guest path.
    pub src_path: String,

    /// New guest path.
    pub dst_path: String,
}

/// Parameters for deleting a guest directory.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteDirectoryParams {
    /// VM display name.
    pub name: String,

    /// Absolute guest path.
    pub path: String,

    /// Delete contents as well (default: false).
    #[serde(default)]
    pub recursive: bool,
}

/// Result of listing a guest directory.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListFilesResult {
    /// Entries directly inside the directory.
    pub entries: Vec<FileEntryResponse>,
}

/// Information about a guest file or directory entry.
#[derive(Debug, Serialize, JsonSchema)]
pub struct FileEntryResponse {
    /// Absolute guest path.
    pub path: String,

    /// Whether this is a directory.
    pub is_dir: bool,

    /// File size in bytes (0 for directories).
    pub size: u64,
}

impl From<GuestFileEntry> for FileEntryResponse {
    fn from(entry: GuestFileEntry) -> Self {
        Self {
            is_dir: entry.kind == FileKind::Directory,
            path: entry.path,
            size: entry.size,
        }
    }
}

// ============================================================================
// Processes
// ============================================================================

/// Parameters for starting a guest process.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProcessParams {
    /// VM display name.
    pub name: String,

    /// Absolute path of the program.
    pub program: String,

    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ProcessParams {
    /// Build the process description.
    pub fn spec(&self) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.program).args(&self.args);
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            spec = spec.cwd(cwd);
        }
        spec
    }
}

/// Result of starting a guest process.
#[derive(Debug, Serialize, JsonSchema)]
pub struct StartProcessResult {
    /// Guest process id.
    pub pid: i64,
}

/// Result of running a process to completion.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ExitCodeResult {
    /// Exit code reported by the guest.
    pub exit_code: i32,
}

/// Parameters for terminating a guest process.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TerminateProcessParams {
    /// VM display name.
    pub name: String,

    /// Guest process id.
    pub pid: i64,
}

/// Result of listing guest processes.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListProcessesResult {
    /// Guest process table.
    pub processes: Vec<ProcessInfo>,
}

/// Information about a guest process.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ProcessInfo {
    /// Guest process id.
    pub pid: i64,
    /// Program name.
    pub name: String,
    /// Owning guest user.
    pub owner: String,
    /// Full command line.
    pub cmd_line: String,
    /// Start time (ISO 8601).
    pub start_time: String,
    /// End time (ISO 8601), absent while running.
    pub end_time: Option<String>,
    /// Exit code, absent while running.
    pub exit_code: Option<i32>,
}

impl From<GuestProcess> for ProcessInfo {
    fn from(process: GuestProcess) -> Self {
        Self {
            pid: process.pid,
            name: process.name,
            owner: process.owner,
            cmd_line: process.cmd_line,
            start_time: process.start_time.to_rfc3339(),
            end_time: process.end_time.map(|t| t.to_rfc3339()),
            exit_code: process.exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_process_params_defaults() {
        let params: ProcessParams =
            serde_json::from_value(serde_json::json!({"name": "web01", "program": "/bin/true"}))
                .unwrap();
        assert!(params.args.is_empty());
        assert!(params.env.is_empty());

        let spec = params.spec();
        assert_eq!(spec.program, "/bin/true");
        assert_eq!(spec.cwd, None);
    }

    #[test]
    fn test_process_params_spec() {
        let params: ProcessParams = serde_json::from_value(serde_json::json!({
            "name": "web01",
            "program": "/usr/bin/make",
            "args": ["-j", "4"],
            "env": {"CC": "clang"},
            "cwd": "/src"
        }))
        .unwrap();

        let spec = params.spec();
        assert_eq!(spec.args, vec!["-j".to_string(), "4".to_string()]);
        assert_eq!(spec.env.get("CC").map(String::as_str), Some("clang"));
        assert_eq!(spec.cwd.as_deref(), Some("/src"));
    }

    #[test]
    fn test_process_info_from_running_process() {
        let info = ProcessInfo::from(GuestProcess {
            pid: 1000,
            name: "sleep".into(),
            owner: "root".into(),
            cmd_line: "/bin/sleep 60".into(),
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
        });
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["pid"], 1000);
        assert!(json["end_time"].is_null());
    }

    #[test]
    fn test_file_entry_response() {
        let entry = FileEntryResponse::from(GuestFileEntry {
            path: "/tmp/logs".into(),
            kind: FileKind::Directory,
            size: 0,
        });
        assert!(entry.is_dir);
        assert_eq!(entry.path, "/tmp/logs");
    }

    #[test]
    fn test_switch_params_optional() {
        let params: SwitchConnectionParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(params.index_or_alias.is_none());
    }

    #[test]
    fn test_switch_params_index_or_alias() {
        let params: SwitchConnectionParams =
            serde_json::from_value(serde_json::json!({"index_or_alias": 2})).unwrap();
        assert_eq!(params.index_or_alias, Some(IndexOrAlias::Index(2)));
        assert_eq!(params.index_or_alias.unwrap().to_key(), "2");

        let params: SwitchConnectionParams =
            serde_json::from_value(serde_json::json!({"index_or_alias": "lab"})).unwrap();
        assert_eq!(params.index_or_alias, Some(IndexOrAlias::Alias("lab".into())));

        let err = serde_json::from_value::<SwitchConnectionParams>(
            serde_json::json!({"index_or_alias": -1}),
        );
        assert!(err.is_err());
    }
}
