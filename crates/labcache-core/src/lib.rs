pub mod config;
pub mod models;
pub mod persistence;
pub mod registry;
pub mod remote;
pub mod sqlite;
pub mod tracking;

pub use tracking::{OperationTracker, SessionGuard, TrackerEvent};
