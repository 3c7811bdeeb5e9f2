//! # sphere-api
//!
//! Client contract between the sphere keyword library and a VMware client.
//!
//! The library never talks to vCenter directly. Everything it needs from the
//! server goes through three traits:
//!
//! - [`Connector`] opens authenticated sessions
//! - [`Session`] enumerates and resolves VMs by display name
//! - [`VirtualMachine`] performs power, snapshot and guest operations
//!
//! Each method maps to one remote call. Implementations do not retry and
//! surface every failure as an [`ApiError`].
//!
//! The [`sim`] module provides an in-memory datacenter implementing these
//! traits, used by tests and by the keyword server's dry-run backend.

mod client;
mod error;
pub mod sim;
mod types;

pub use client::{Connector, Session, SessionHandle, VirtualMachine, VmHandle};
pub use error::{ApiError, Result};
pub use types::{FileKind, GuestFileEntry, GuestProcess, PowerState, ProcessSpec, VmProperties};
