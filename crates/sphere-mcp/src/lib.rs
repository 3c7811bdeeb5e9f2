//! # sphere-mcp
//!
//! MCP (Model Context Protocol) server exposing the sphere VMware keywords
//! to keyword runners and AI agents.
//!
//! Every keyword of [`sphere_core::SphereLibrary`] is a tool of the same
//! name taking its arguments as a JSON object. The backend is the simulated
//! datacenter from `sphere-api`, loaded from an inventory file, so suites
//! can be dry-run without a vCenter.
//!
//! ## Quick Start
//!
//! ```bash
//! export SPHERE_INVENTORY=/etc/sphere/lab.json
//! export SPHERE_TRANSPORT=http
//! cargo run -p sphere-mcp
//! ```
//!
//! ## MCP Tools
//!
//! | Group | Tools |
//! |-------|-------|
//! | Connections | `open_connection`, `is_connected`, `switch_connection`, `close_connection`, `close_all_connections` |
//! | Inventory | `get_vm_names`, `get_vm_properties` |
//! | Power | `power_on_vm`, `power_off_vm`, `reset_vm`, `shutdown_vm_os`, `reboot_vm_os`, `vm_is_powered_on`, `vm_is_powered_off`, `revert_vm_to_snapshot` |
//! | Guest | `wait_for_vmware_tools`, `login_in_guest` |
//! | Guest files | `send_file`, `get_file`, `move_file`, `delete_file`, `list_files`, `make_directory`, `move_directory`, `delete_directory` |
//! | Guest processes | `start_process`, `list_processes`, `terminate_process`, `run_synchronous_process` |

mod config;
pub mod http;
mod server;
mod types;

pub use config::{ConfigError, ServerConfig, TransportMode};
pub use server::KeywordServer;
pub use types::*;
