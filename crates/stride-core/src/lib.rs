//! stride-core - Core library for Stride
//!
//! This crate contains the local record store, the pending mutation log and
//! the sync engine that reconciles them with a shared remote store. Every
//! Stride interface (CLI, mobile, desktop) reads and writes domain data
//! through [`db::LocalStore`] and triggers sync through
//! [`sync::SyncCoordinator`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityRecord, RecordId, SyncTable, UserId};
