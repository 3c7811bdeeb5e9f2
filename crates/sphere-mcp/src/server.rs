//! KeywordServer - MCP server that exposes the VMware keywords as tools.
//!
//! This module implements ServerHandler manually. Every tool is named after
//! its keyword and takes the keyword's arguments as a JSON object. All calls
//! go through one shared [`SphereLibrary`], so keywords run one at a time.

use crate::types::*;

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData,
};
use schemars::schema_for;
use serde::de::DeserializeOwned;
use sphere_api::sim::SimulatedDatacenter;
use sphere_core::{LibraryConfig, SphereLibrary};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

type Args = Option<serde_json::Map<String, serde_json::Value>>;

/// MCP server for the sphere keyword library.
#[derive(Clone)]
pub struct KeywordServer {
    /// Keyword library shared by every transport
    library: Arc<TokioMutex<SphereLibrary<SimulatedDatacenter>>>,

    /// Simulated backend behind the library
    datacenter: SimulatedDatacenter,
}

impl KeywordServer {
    /// Create a server backed by `datacenter`.
    pub fn new(datacenter: SimulatedDatacenter, config: LibraryConfig) -> Self {
        let library = SphereLibrary::new(datacenter.clone(), config);
        Self {
            library: Arc::new(TokioMutex::new(library)),
            datacenter,
        }
    }

    /// Get the simulated datacenter behind the library.
    pub fn datacenter(&self) -> &SimulatedDatacenter {
        &self.datacenter
    }

    /// Get a cloned Arc to the keyword library.
    pub fn library_arc(&self) -> Arc<TokioMutex<SphereLibrary<SimulatedDatacenter>>> {
        Arc::clone(&self.library)
    }

    /// Report backend hosts and connection state without waiting on a
    /// running keyword.
    pub async fn status(&self) -> ServerStatus {
        let hosts = self.datacenter.host_names().await;
        let (status, registered_connections, current_index) = match self.library.try_lock() {
            Ok(library) => (
                "ready",
                Some(library.connections().len()),
                library.connections().current_index(),
            ),
            Err(_) => ("busy", None, None),
        };
        ServerStatus {
            status,
            backend: "simulated",
            hosts,
            registered_connections,
            current_index,
        }
    }

    /// Close every connection, giving up if the library is still busy after
    /// `grace`. Returns true once all sessions were disconnected.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let close = async { self.library.lock().await.close_all_connections().await };
        match tokio::time::timeout(grace, close).await {
            Ok(Ok(())) => {
                tracing::info!("All connections closed");
                true
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Error while closing connections");
                false
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Library still busy, leaving connections open"
                );
                false
            }
        }
    }

    /// Parse tool arguments into `T`.
    fn parse_args<T: DeserializeOwned>(args: Args, expected: &str) -> Result<T, CallToolResult> {
        let value = serde_json::Value::Object(args.unwrap_or_default());
        serde_json::from_value(value).map_err(|e| {
            Self::error_result(format!("Invalid parameters ({e}); expected: {expected}"))
        })
    }

    /// Helper to create success result with JSON content
    fn json_result<T: serde::Serialize>(data: &T) -> CallToolResult {
        match serde_json::to_string_pretty(data) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!(
                "JSON serialization error: {e}"
            ))]),
        }
    }

    /// Helper to create error result
    fn error_result(message: impl Into<String>) -> CallToolResult {
        CallToolResult::error(vec![Content::text(message.into())])
    }

    /// Turn a keyword outcome into a tool result.
    fn respond<T, R>(
        keyword: &str,
        outcome: sphere_core::Result<T>,
        into_response: impl FnOnce(T) -> R,
    ) -> CallToolResult
    where
        R: serde::Serialize,
    {
        match outcome {
            Ok(value) => Self::json_result(&into_response(value)),
            Err(e) => {
                tracing::warn!(keyword, error = %e, "Keyword failed");
                Self::error_result(e.to_string())
            }
        }
    }

    /// Convert schemars RootSchema to rmcp JsonObject
    fn schema_to_json_object<T: schemars::JsonSchema>(
    ) -> Arc<serde_json::Map<String, serde_json::Value>> {
        let schema = schema_for!(T);
        let json = serde_json::to_value(&schema.schema).unwrap_or_else(|_| serde_json::json!({}));
        match json {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        }
    }

    /// Create an empty schema for tools with no parameters
    fn empty_schema() -> Arc<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        map.insert("type".into(), serde_json::json!("object"));
        map.insert("properties".into(), serde_json::json!({}));
        Arc::new(map)
    }

    fn success(_: ()) -> SuccessResult {
        SuccessResult { success: true }
    }

    // ========================================================================
    // Connections
    // ========================================================================

    async fn handle_open_connection(&self, args: Args) -> CallToolResult {
        let params: OpenConnectionParams = match Self::parse_args(args, "host, user, password")
        {
            Ok(p) => p,
            Err(e) => return e,
        };

        tracing::info!(host = %params.host, user = %params.user, "Opening connection");

        let outcome = self
            .library
            .lock()
            .await
            .open_connection(
                &params.host,
                &params.user,
                &params.password,
                params.alias.as_deref(),
            )
            .await;
        Self::respond("open_connection", outcome, |index| OpenConnectionResult {
            index,
        })
    }

    async fn handle_is_connected(&self) -> CallToolResult {
        let outcome = self.library.lock().await.is_connected().await;
        Self::respond("is_connected", outcome, |connected| IsConnectedResult {
            connected,
        })
    }

    async fn handle_switch_connection(&self, args: Args) -> CallToolResult {
        let params: SwitchConnectionParams = match Self::parse_args(args, "index_or_alias") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let key = params.index_or_alias.as_ref().map(IndexOrAlias::to_key);
        let outcome = self
            .library
            .lock()
            .await
            .switch_connection(key.as_deref());
        Self::respond("switch_connection", outcome, |previous_index| {
            SwitchConnectionResult { previous_index }
        })
    }

    async fn handle_close_connection(&self) -> CallToolResult {
        let outcome = self.library.lock().await.close_connection().await;
        Self::respond("close_connection", outcome, Self::success)
    }

    async fn handle_close_all_connections(&self) -> CallToolResult {
        let outcome = self.library.lock().await.close_all_connections().await;
        Self::respond("close_all_connections", outcome, Self::success)
    }

    // ========================================================================
    // Inventory and power
    // ========================================================================

    async fn handle_get_vm_names(&self) -> CallToolResult {
        let outcome = self.library.lock().await.get_vm_names().await;
        Self::respond("get_vm_names", outcome, |names| VmNamesResult { names })
    }

    async fn handle_get_vm_properties(&self, args: Args) -> CallToolResult {
        let params: VmParams = match Self::parse_args(args, "name") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .get_vm_properties(&params.name)
            .await;
        Self::respond("get_vm_properties", outcome, |properties| {
            VmPropertiesResult { properties }
        })
    }

    /// Power and state keywords that take only a VM name.
    async fn handle_vm_keyword(&self, keyword: &str, args: Args) -> CallToolResult {
        let params: VmParams = match Self::parse_args(args, "name") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let name = params.name.as_str();

        tracing::info!(keyword, vm = %name, "Running VM keyword");

        let mut library = self.library.lock().await;
        match keyword {
            "power_on_vm" => Self::respond(keyword, library.power_on_vm(name).await, Self::success),
            "power_off_vm" => {
                Self::respond(keyword, library.power_off_vm(name).await, Self::success)
            }
            "reset_vm" => Self::respond(keyword, library.reset_vm(name).await, Self::success),
            "shutdown_vm_os" => {
                Self::respond(keyword, library.shutdown_vm_os(name).await, Self::success)
            }
            "reboot_vm_os" => {
                Self::respond(keyword, library.reboot_vm_os(name).await, Self::success)
            }
            "vm_is_powered_on" => Self::respond(
                keyword,
                library.vm_is_powered_on(name).await,
                |value| PowerCheckResult { value },
            ),
            "vm_is_powered_off" => Self::respond(
                keyword,
                library.vm_is_powered_off(name).await,
                |value| PowerCheckResult { value },
            ),
            _ => Self::error_result(format!("Unknown tool: {keyword}")),
        }
    }

    async fn handle_revert_vm_to_snapshot(&self, args: Args) -> CallToolResult {
        let params: RevertSnapshotParams = match Self::parse_args(args, "name, snapshot") {
            Ok(p) => p,
            Err(e) => return e,
        };

        tracing::info!(vm = %params.name, snapshot = ?params.snapshot, "Reverting VM");

        let outcome = self
            .library
            .lock()
            .await
            .revert_vm_to_snapshot(&params.name, params.snapshot.as_deref())
            .await;
        Self::respond("revert_vm_to_snapshot", outcome, Self::success)
    }

    // ========================================================================
    // Guest
    // ========================================================================

    async fn handle_wait_for_vmware_tools(&self, args: Args) -> CallToolResult {
        let params: WaitForToolsParams = match Self::parse_args(args, "name, timeout_secs") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .wait_for_vmware_tools(&params.name, params.timeout_secs.map(Duration::from_secs))
            .await;
        Self::respond("wait_for_vmware_tools", outcome, Self::success)
    }

    async fn handle_login_in_guest(&self, args: Args) -> CallToolResult {
        let params: LoginInGuestParams = match Self::parse_args(args, "name, user, password") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .login_in_guest(&params.name, &params.user, &params.password)
            .await;
        Self::respond("login_in_guest", outcome, Self::success)
    }

    async fn handle_send_file(&self, args: Args) -> CallToolResult {
        let params: SendFileParams =
            match Self::parse_args(args, "name, local_path, guest_path, overwrite") {
                Ok(p) => p,
                Err(e) => return e,
            };

        let outcome = self
            .library
            .lock()
            .await
            .send_file(
                &params.name,
                Path::new(&params.local_path),
                &params.guest_path,
                params.overwrite,
            )
            .await;
        Self::respond("send_file", outcome, Self::success)
    }

    async fn handle_get_file(&self, args: Args) -> CallToolResult {
        let params: GetFileParams =
            match Self::parse_args(args, "name, guest_path, local_path, overwrite") {
                Ok(p) => p,
                Err(e) => return e,
            };

        let outcome = self
            .library
            .lock()
            .await
            .get_file(
                &params.name,
                &params.guest_path,
                Path::new(&params.local_path),
                params.overwrite,
            )
            .await;
        Self::respond("get_file", outcome, Self::success)
    }

    async fn handle_move_file(&self, args: Args) -> CallToolResult {
        let params: MoveFileParams =
            match Self::parse_args(args, "name, src_path, dst_path, overwrite") {
                Ok(p) => p,
                Err(e) => return e,
            };

        let outcome = self
            .library
            .lock()
            .await
            .move_file(
                &params.name,
                &params.src_path,
                &params.dst_path,
                params.overwrite,
            )
            .await;
        Self::respond("move_file", outcome, Self::success)
    }

    async fn handle_delete_file(&self, args: Args) -> CallToolResult {
        let params: GuestPathParams = match Self::parse_args(args, "name, path") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .delete_file(&params.name, &params.path)
            .await;
        Self::respond("delete_file", outcome, Self::success)
    }

    async fn handle_list_files(&self, args: Args) -> CallToolResult {
        let params: GuestPathParams = match Self::parse_args(args, "name, path") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .list_files(&params.name, &params.path)
            .await;
        Self::respond("list_files", outcome, |entries| ListFilesResult {
            entries: entries.into_iter().map(FileEntryResponse::from).collect(),
        })
    }

    async fn handle_make_directory(&self, args: Args) -> CallToolResult {
        let params: MakeDirectoryParams =
            match Self::parse_args(args, "name, path, create_parents") {
                Ok(p) => p,
                Err(e) => return e,
            };

        let outcome = self
            .library
            .lock()
            .await
            .make_directory(&params.name, &params.path, params.create_parents)
            .await;
        Self::respond("make_directory", outcome, Self::success)
    }

    async fn handle_move_directory(&self, args: Args) -> CallToolResult {
        let params: MoveDirectoryParams = match Self::parse_args(args, "name, src_path, dst_path")
        {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .move_directory(&params.name, &params.src_path, &params.dst_path)
            .await;
        Self::respond("move_directory", outcome, Self::success)
    }

    async fn handle_delete_directory(&self, args: Args) -> CallToolResult {
        let params: DeleteDirectoryParams = match Self::parse_args(args, "name, path, recursive")
        {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .delete_directory(&params.name, &params.path, params.recursive)
            .await;
        Self::respond("delete_directory", outcome, Self::success)
    }

    // ========================================================================
    // Processes
    // ========================================================================

    async fn handle_start_process(&self, args: Args) -> CallToolResult {
        let params: ProcessParams = match Self::parse_args(args, "name, program, args, env, cwd")
        {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .start_process(&params.name, &params.spec())
            .await;
        Self::respond("start_process", outcome, |pid| StartProcessResult { pid })
    }

    async fn handle_list_processes(&self, args: Args) -> CallToolResult {
        let params: VmParams = match Self::parse_args(args, "name") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .list_processes(&params.name)
            .await;
        Self::respond("list_processes", outcome, |processes| ListProcessesResult {
            processes: processes.into_iter().map(ProcessInfo::from).collect(),
        })
    }

    async fn handle_terminate_process(&self, args: Args) -> CallToolResult {
        let params: TerminateProcessParams = match Self::parse_args(args, "name, pid") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let outcome = self
            .library
            .lock()
            .await
            .terminate_process(&params.name, params.pid)
            .await;
        Self::respond("terminate_process", outcome, Self::success)
    }

    async fn handle_run_synchronous_process(&self, args: Args) -> CallToolResult {
        let params: ProcessParams = match Self::parse_args(args, "name, program, args, env, cwd")
        {
            Ok(p) => p,
            Err(e) => return e,
        };

        // The library is only held while the process starts.
        let started = self
            .library
            .lock()
            .await
            .start_synchronous_process(&params.name, &params.spec())
            .await;
        let outcome = match started {
            Ok(waiter) => waiter.wait().await,
            Err(e) => Err(e),
        };
        Self::respond("run_synchronous_process", outcome, |exit_code| {
            ExitCodeResult { exit_code }
        })
    }

    /// Build the list of available tools
    pub(crate) fn build_tools_list() -> Vec<Tool> {
        vec![
            Tool::new(
                "open_connection",
                "Open a connection to a vCenter or ESXi host and make it current. Returns its index.",
                Self::schema_to_json_object::<OpenConnectionParams>(),
            ),
            Tool::new(
                "is_connected",
                "Check whether the current connection is still authenticated.",
                Self::empty_schema(),
            ),
            Tool::new(
                "switch_connection",
                "Make the connection with the given index (integer) or alias (string) current. Returns the previous index.",
                Self::schema_to_json_object::<SwitchConnectionParams>(),
            ),
            Tool::new(
                "close_connection",
                "Close the current connection. No other connection becomes current.",
                Self::empty_schema(),
            ),
            Tool::new(
                "close_all_connections",
                "Close every connection and restart index numbering at 1.",
                Self::empty_schema(),
            ),
            Tool::new(
                "get_vm_names",
                "List the names of all VMs registered on the current connection.",
                Self::empty_schema(),
            ),
            Tool::new(
                "get_vm_properties",
                "Get the properties of a VM.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "power_on_vm",
                "Power on a VM unless it is already powered on.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "power_off_vm",
                "Power off a VM unless it is already powered off.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "reset_vm",
                "Hard reset a VM.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "shutdown_vm_os",
                "Initiate a guest OS shutdown. Returns without waiting.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "reboot_vm_os",
                "Initiate a guest OS reboot. Returns without waiting.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "vm_is_powered_on",
                "Check whether a VM is powered on.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "vm_is_powered_off",
                "Check whether a VM is powered off.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "revert_vm_to_snapshot",
                "Revert a VM to a named snapshot, or to its current snapshot.",
                Self::schema_to_json_object::<RevertSnapshotParams>(),
            ),
            Tool::new(
                "wait_for_vmware_tools",
                "Wait until VMware tools are running in the guest.",
                Self::schema_to_json_object::<WaitForToolsParams>(),
            ),
            Tool::new(
                "login_in_guest",
                "Log in to the guest OS. Required before guest file and process tools.",
                Self::schema_to_json_object::<LoginInGuestParams>(),
            ),
            Tool::new(
                "send_file",
                "Copy a file from the server host into the guest.",
                Self::schema_to_json_object::<SendFileParams>(),
            ),
            Tool::new(
                "get_file",
                "Copy a file from the guest to the server host.",
                Self::schema_to_json_object::<GetFileParams>(),
            ),
            Tool::new(
                "move_file",
                "Move or rename a file in the guest.",
                Self::schema_to_json_object::<MoveFileParams>(),
            ),
            Tool::new(
                "delete_file",
                "Delete a file in the guest.",
                Self::schema_to_json_object::<GuestPathParams>(),
            ),
            Tool::new(
                "list_files",
                "List the contents of a guest directory.",
                Self::schema_to_json_object::<GuestPathParams>(),
            ),
            Tool::new(
                "make_directory",
                "Create a directory in the guest.",
                Self::schema_to_json_object::<MakeDirectoryParams>(),
            ),
            Tool::new(
                "move_directory",
                "Move or rename a directory in the guest.",
                Self::schema_to_json_object::<MoveDirectoryParams>(),
            ),
            Tool::new(
                "delete_directory",
                "Delete a directory in the guest.",
                Self::schema_to_json_object::<DeleteDirectoryParams>(),
            ),
            Tool::new(
                "start_process",
                "Start a process in the guest and return its pid without waiting.",
                Self::schema_to_json_object::<ProcessParams>(),
            ),
            Tool::new(
                "list_processes",
                "List the guest process table.",
                Self::schema_to_json_object::<VmParams>(),
            ),
            Tool::new(
                "terminate_process",
                "Kill a guest process.",
                Self::schema_to_json_object::<TerminateProcessParams>(),
            ),
            Tool::new(
                "run_synchronous_process",
                "Start a process in the guest, wait for it to finish and return its exit code.",
                Self::schema_to_json_object::<ProcessParams>(),
            ),
        ]
    }

    /// Dispatch a tool call by keyword name.
    pub async fn dispatch(&self, name: &str, args: Args) -> CallToolResult {
        match name {
            "open_connection" => self.handle_open_connection(args).await,
            "is_connected" => self.handle_is_connected().await,
            "switch_connection" => self.handle_switch_connection(args).await,
            "close_connection" => self.handle_close_connection().await,
            "close_all_connections" => self.handle_close_all_connections().await,
            "get_vm_names" => self.handle_get_vm_names().await,
            "get_vm_properties" => self.handle_get_vm_properties(args).await,
            "power_on_vm" | "power_off_vm" | "reset_vm" | "shutdown_vm_os" | "reboot_vm_os"
            | "vm_is_powered_on" | "vm_is_powered_off" => {
                self.handle_vm_keyword(name, args).await
            }
            "revert_vm_to_snapshot" => self.handle_revert_vm_to_snapshot(args).await,
            "wait_for_vmware_tools" => self.handle_wait_for_vmware_tools(args).await,
            "login_in_guest" => self.handle_login_in_guest(args).await,
            "send_file" => self.handle_send_file(args).await,
            "get_file" => self.handle_get_file(args).await,
            "move_file" => self.handle_move_file(args).await,
            "delete_file" => self.handle_delete_file(args).await,
            "list_files" => self.handle_list_files(args).await,
            "make_directory" => self.handle_make_directory(args).await,
            "move_directory" => self.handle_move_directory(args).await,
            "delete_directory" => self.handle_delete_directory(args).await,
            "start_process" => self.handle_start_process(args).await,
            "list_processes" => self.handle_list_processes(args).await,
            "terminate_process" => self.handle_terminate_process(args).await,
            "run_synchronous_process" => self.handle_run_synchronous_process(args).await,
            _ => Self::error_result(format!("Unknown tool: {name}")),
        }
    }
}

// ============================================================================
// ServerHandler Implementation
// ============================================================================

impl ServerHandler for KeywordServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Sphere MCP Server - VMware test automation keywords. \
                 Start with open_connection, then use the power, snapshot and guest tools \
                 on VMs by display name. Guest file and process tools need login_in_guest \
                 first. Call close_all_connections when done."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: Self::build_tools_list(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.dispatch(request.name.as_ref(), request.arguments).await)
    }
}
