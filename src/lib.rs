//! School administration sidecar: tenant records, face-matched enrollment
//! and attendance, fee billing and reports, served over JSON lines.

pub mod assistant;
pub mod attendance;
pub mod billing;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod ipc;
pub mod matcher;
pub mod model;
pub mod provider;
pub mod reports;
pub mod session;
pub mod store;
