//! # sphere-core
//!
//! Keyword layer for VMware test automation.
//!
//! [`SphereLibrary`] is the context object a test run owns. It keeps a
//! registry of open vCenter/ESX connections, caches VM handles per
//! connection and exposes one async method per keyword.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     sphere-core                          │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌──────────────────┐    ┌───────────────────────────┐   │
//! │  │  SphereLibrary   │───▶│ ConnectionCache           │   │
//! │  │  - open_conn..() │    │  index / alias -> session │   │
//! │  │  - power_on_vm() │    └───────────────────────────┘   │
//! │  │  - send_file()   │    ┌───────────────────────────┐   │
//! │  │  - run_sync..()  │───▶│ VmCache                   │   │
//! │  └──────────────────┘    │  (session, name) -> VM    │   │
//! │           │              └───────────────────────────┘   │
//! │           ▼                                              │
//! │  ┌──────────────────┐                                    │
//! │  │  poll_until      │  fixed interval, optional limit    │
//! │  └──────────────────┘                                    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │          sphere-api (Connector / Session / VM)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sphere_api::sim::{SimulatedDatacenter, VmSpec};
//! use sphere_api::ProcessSpec;
//! use sphere_core::{LibraryConfig, SphereLibrary};
//!
//! # async fn example() -> sphere_core::Result<()> {
//! let dc = SimulatedDatacenter::new();
//! dc.add_host("vc.lab", "admin", "secret").await;
//! dc.add_vm("vc.lab", VmSpec::new("web01").guest_credentials("root", "toor")).await?;
//!
//! let mut lib = SphereLibrary::new(dc, LibraryConfig::default());
//! lib.open_connection("vc.lab", "admin", "secret", None).await?;
//! lib.power_on_vm("web01").await?;
//! lib.wait_for_vmware_tools("web01", None).await?;
//! lib.login_in_guest("web01", "root", "toor").await?;
//!
//! let exit_code = lib
//!     .run_synchronous_process("web01", &ProcessSpec::new("/bin/true"))
//!     .await?;
//! assert_eq!(exit_code, 0);
//!
//! lib.close_all_connections().await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod error;
mod library;
mod poll;
mod registry;

pub use cache::VmCache;
pub use config::{LibraryConfig, LibraryConfigBuilder, StaleHandlePolicy};
pub use error::{CoreError, Result};
pub use library::{ProcessWait, SphereLibrary};
pub use poll::{poll_until, PollConfig, PollOutcome};
pub use registry::{Connection, ConnectionCache, SessionId};
