// src/lib.rs

//! Build archive indexer library.
//!
//! Crawls the directory listings of a build archive, derives one provenance
//! record per build artifact, and publishes the records to a remote record
//! store in batches.

pub mod config;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod remote;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;
