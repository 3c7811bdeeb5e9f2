//! Keyword tools dispatched by name against a simulated datacenter.

use rmcp::model::CallToolResult;
use serde_json::{json, Value};
use sphere_api::sim::{ProgramBehavior, SimulatedDatacenter, VmSpec};
use sphere_api::PowerState;
use sphere_core::LibraryConfig;
use sphere_mcp::KeywordServer;
use std::time::Duration;

const HOST: &str = "vc.lab";

async fn server() -> KeywordServer {
    let dc = SimulatedDatacenter::new();
    dc.add_host(HOST, "admin", "secret").await;
    dc.add_vm(
        HOST,
        VmSpec::new("web01")
            .snapshot("clean")
            .guest_credentials("root", "toor")
            .program("/bin/false", ProgramBehavior::exits_after(1, 1))
            .program("/bin/sleep", ProgramBehavior::hangs()),
    )
    .await
    .unwrap();

    let config = LibraryConfig::builder()
        .process_poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    KeywordServer::new(dc, config)
}

async fn call(server: &KeywordServer, tool: &str, args: Value) -> CallToolResult {
    let args = match args {
        Value::Object(map) => Some(map),
        _ => None,
    };
    server.dispatch(tool, args).await
}

fn text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text())
        .map(|t| t.text.clone())
        .collect()
}

/// Call a tool that must succeed and return its JSON payload.
async fn ok(server: &KeywordServer, tool: &str, args: Value) -> Value {
    let result = call(server, tool, args).await;
    assert_ne!(result.is_error, Some(true), "{tool} failed: {}", text(&result));
    serde_json::from_str(&text(&result)).unwrap()
}

/// Call a tool that must fail and return its error text.
async fn fails(server: &KeywordServer, tool: &str, args: Value) -> String {
    let result = call(server, tool, args).await;
    assert_eq!(result.is_error, Some(true), "{tool} unexpectedly succeeded");
    text(&result)
}

#[tokio::test]
async fn test_connection_tools() {
    let server = server().await;

    let opened = ok(
        &server,
        "open_connection",
        json!({"host": HOST, "user": "admin", "password": "secret", "alias": "lab"}),
    )
    .await;
    assert_eq!(opened["index"], 1);

    assert_eq!(ok(&server, "is_connected", Value::Null).await["connected"], true);

    let switched = ok(&server, "switch_connection", json!({"index_or_alias": "lab"})).await;
    assert_eq!(switched["previous_index"], 1);

    let err = fails(&server, "switch_connection", json!({"index_or_alias": "7"})).await;
    assert!(err.contains("non-existing index or alias"));

    ok(&server, "close_all_connections", Value::Null).await;
    let err = fails(&server, "is_connected", Value::Null).await;
    assert!(err.contains("no open connection"));
}

#[tokio::test]
async fn test_switch_connection_by_integer_index() {
    let server = server().await;
    let credentials = json!({"host": HOST, "user": "admin", "password": "secret"});
    ok(&server, "open_connection", credentials.clone()).await;
    let second = ok(&server, "open_connection", credentials).await;
    assert_eq!(second["index"], 2);

    let switched = ok(&server, "switch_connection", json!({"index_or_alias": 1})).await;
    assert_eq!(switched["previous_index"], 2);

    let switched = ok(&server, "switch_connection", json!({"index_or_alias": second["index"]})).await;
    assert_eq!(switched["previous_index"], 1);

    let err = fails(&server, "switch_connection", json!({"index_or_alias": 9})).await;
    assert!(err.contains("non-existing index or alias"));
}

#[tokio::test]
async fn test_power_tools() {
    let server = server().await;
    ok(
        &server,
        "open_connection",
        json!({"host": HOST, "user": "admin", "password": "secret"}),
    )
    .await;

    let names = ok(&server, "get_vm_names", Value::Null).await;
    assert_eq!(names["names"], json!(["web01"]));

    ok(&server, "power_on_vm", json!({"name": "web01"})).await;
    ok(&server, "power_on_vm", json!({"name": "web01"})).await;
    assert_eq!(server.datacenter().stats().power_on_calls(), 1);
    assert_eq!(
        ok(&server, "vm_is_powered_on", json!({"name": "web01"})).await["value"],
        true
    );

    ok(
        &server,
        "revert_vm_to_snapshot",
        json!({"name": "web01", "snapshot": "clean"}),
    )
    .await;
    assert_eq!(
        server.datacenter().power_state(HOST, "web01").await.unwrap(),
        PowerState::PoweredOff
    );

    let err = fails(&server, "power_on_vm", json!({"name": "ghost"})).await;
    assert!(err.contains("ghost"));
}

#[tokio::test]
async fn test_guest_tools() {
    let server = server().await;
    ok(
        &server,
        "open_connection",
        json!({"host": HOST, "user": "admin", "password": "secret"}),
    )
    .await;
    ok(&server, "power_on_vm", json!({"name": "web01"})).await;
    ok(&server, "wait_for_vmware_tools", json!({"name": "web01", "timeout_secs": 5})).await;
    ok(
        &server,
        "login_in_guest",
        json!({"name": "web01", "user": "root", "password": "toor"}),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("motd");
    tokio::fs::write(&local, b"welcome").await.unwrap();

    ok(
        &server,
        "send_file",
        json!({"name": "web01", "local_path": local, "guest_path": "/tmp/motd"}),
    )
    .await;
    let listing = ok(&server, "list_files", json!({"name": "web01", "path": "/tmp"})).await;
    assert_eq!(listing["entries"][0]["path"], "/tmp/motd");
    assert_eq!(listing["entries"][0]["size"], 7);

    let exit = ok(
        &server,
        "run_synchronous_process",
        json!({"name": "web01", "program": "/bin/false"}),
    )
    .await;
    assert_eq!(exit["exit_code"], 1);

    let started = ok(
        &server,
        "start_process",
        json!({"name": "web01", "program": "/bin/echo", "args": ["hi"]}),
    )
    .await;
    let processes = ok(&server, "list_processes", json!({"name": "web01"})).await;
    let listed = processes["processes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["pid"] == started["pid"] && p["cmd_line"] == "/bin/echo hi");
    assert!(listed);
}

#[tokio::test]
async fn test_other_tools_run_while_process_waits() {
    let server = server().await;
    ok(
        &server,
        "open_connection",
        json!({"host": HOST, "user": "admin", "password": "secret"}),
    )
    .await;
    ok(&server, "power_on_vm", json!({"name": "web01"})).await;
    ok(&server, "wait_for_vmware_tools", json!({"name": "web01", "timeout_secs": 5})).await;
    ok(
        &server,
        "login_in_guest",
        json!({"name": "web01", "user": "root", "password": "toor"}),
    )
    .await;

    let waiting = {
        let server = server.clone();
        tokio::spawn(async move {
            call(
                &server,
                "run_synchronous_process",
                json!({"name": "web01", "program": "/bin/sleep"}),
            )
            .await
        })
    };

    // find the hanging process while the wait is in progress
    let pid = loop {
        let processes = ok(&server, "list_processes", json!({"name": "web01"})).await;
        let running = processes["processes"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["cmd_line"] == "/bin/sleep" && p["end_time"].is_null())
            .map(|p| p["pid"].clone());
        if let Some(pid) = running {
            break pid;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(!waiting.is_finished());

    ok(&server, "terminate_process", json!({"name": "web01", "pid": pid})).await;
    let result = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(result.is_error, Some(true), "{}", text(&result));
    let exit: Value = serde_json::from_str(&text(&result)).unwrap();
    assert_eq!(exit["exit_code"], -1);
}

#[tokio::test]
async fn test_invalid_arguments_and_unknown_tool() {
    let server = server().await;

    let err = fails(&server, "open_connection", json!({"host": HOST})).await;
    assert!(err.contains("expected: host, user, password"));

    let err = fails(&server, "format_datastore", Value::Null).await;
    assert!(err.contains("Unknown tool"));
}
