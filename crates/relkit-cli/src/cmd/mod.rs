//! Command implementations

pub mod build;
pub mod keygen;
pub mod targets;
pub mod verify;
