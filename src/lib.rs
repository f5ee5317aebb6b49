//! Transcript Sync: rebuilds agent conversations from platform logs.

pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod sync;
pub mod transcript;
pub mod upstream;
