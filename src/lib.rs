//! rswift core library
//!
//! The concurrent client engine behind the `rswift` tool: high-level
//! operations (list, download, upload, delete, stat, post, copy) over a
//! Swift-style object storage account, fanned out across bounded worker
//! pools with per-object results streamed back to the caller.
//!
//! # Architecture
//!
//! - [`service`] - the [`SwiftService`] façade, one orchestrator per operation
//! - [`executor`] - bounded-concurrency job pool with backpressure
//! - [`connection`] - transport contract and its reqwest implementation
//! - [`large_object`] - DLO/SLO inspection, segment enumeration, identity
//! - [`segment`] / [`sink`] - hashing body sources and verifying sinks
//! - [`results`] / [`error`] / [`options`] - records, errors, option bag

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod clock;
pub mod connection;
pub mod error;
pub mod executor;
pub mod large_object;
pub mod options;
pub mod results;
pub mod segment;
pub mod service;
pub mod sink;

// Re-export commonly used types
pub use connection::{Connection, ConnectionFactory, HttpConnection, HttpConnectionFactory};
pub use error::SwiftError;
pub use executor::{AsCompleted, JobExecutor, JobHandle, DEFAULT_WORKERS};
pub use options::{process_options, split_headers, Options, OptionsPatch, DEFAULT_RETRIES, DEFAULT_THREADS};
pub use results::{Action, ErrorRecord, OpResult, ResultData, UploadStatus};
pub use service::{ResultStream, SwiftPostObject, SwiftService, SwiftUploadObject, UploadSource};
