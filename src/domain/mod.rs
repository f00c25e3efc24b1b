//! Domain layer - Paths, resources and port definitions
//!
//! This module defines the registry data model and the traits (ports) the
//! cache consumes from, and exposes to, the rest of the system.

pub mod path;
pub mod ports;
pub mod resource;

pub use ports::*;
pub use resource::Resource;
