pub mod config;
pub mod registry;
pub mod health;  // readiness probing for workflow server children
pub mod supervisor;
pub mod ipc;
