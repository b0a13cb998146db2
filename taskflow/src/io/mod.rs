//! Side-effecting collaborators: persistent store and configuration files.

pub mod config;
pub mod store;
