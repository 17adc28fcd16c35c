// src/repository/mod.rs

//! Remote recipe repositories
//!
//! This module provides functionality for:
//! - Registering remote repositories and their signing keys
//! - Fetching repository indexes and recipe documents over HTTP
//! - Importing fetched recipes into the catalog

mod client;
mod sync;

pub use client::{HTTP_TIMEOUT, HttpFetcher, RecipeFetcher, join_url};
pub use sync::{
    DEFAULT_SYNC_INTERVAL_HOURS, RemoteRepository, RepositorySyncer, SyncReport, needs_sync,
};
