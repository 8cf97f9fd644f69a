//! CoAP Bridge Registry - Resource directory and bus object mirroring
//!
//! This crate keeps the two namespaces of the bridge in step:
//! - [`ResourceDirectory`] records which node owns which resource path
//! - [`ObjectManager`] mirrors each registered path as a bus object and
//!   translates method calls into upstream exchanges
//! - [`Bridge`] receives registration, removal and method-call events
//! - [`LocalBus`] is the in-process bus transport used by the daemon

pub mod bridge;
pub mod directory;
pub mod local_bus;
pub mod object_manager;
pub mod translate;

pub use bridge::Bridge;
pub use directory::{DirectoryEvent, ResourceDirectory};
pub use local_bus::{is_valid_object_path, LocalBus};
pub use object_manager::{BusObject, ObjectManager};
