//! Persistent store layer

pub mod security_event_repo;

pub use security_event_repo::*;
