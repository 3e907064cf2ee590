//! # devsync Core
//!
//! In-memory management resource model for devsync.
//!
//! This crate provides:
//! - A hierarchical resource tree with typed leaf values and change listeners
//! - The device management model (device info, location, metadata, firmware)
//! - Observe/notify diffing that reports only changed fields
//!
//! Everything here is synchronous, in-memory state. The tree lives for the
//! duration of one managed session and is not persisted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod model;
pub mod resource;
pub mod value;

pub use diff::ObservationSet;
pub use model::{DeviceInfo, DeviceModel, FirmwareState, FirmwareUpdateStatus};
pub use resource::{ListenerId, ListenerScope, ResourceNode, ResourceTree};
pub use value::{ResourceValue, ValueError};
