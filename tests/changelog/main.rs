//! Changelog Integration Tests
//!
//! Exercises the public facade: publishing, cursor composition, offline
//! replicas, retention and restart.

#[path = "../common/mod.rs"]
mod common;

mod cursors;
mod multi_domain;
mod offline;
mod restart;
mod retention;
