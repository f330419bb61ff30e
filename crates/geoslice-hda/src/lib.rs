//! Geoslice HDA - retrieval from the Harmonised Data Access archive
//!
//! STAC search per interval, direct or asynchronous order negotiation,
//! bounded polling, streaming into partial artifacts and the pipeline
//! driver that ties partitioning, scheduling and merging together.

pub mod auth;
pub mod client;
pub mod config;
pub mod download;
pub mod order;
pub mod runner;

// Re-exports
pub use auth::{AccessToken, CredentialSource, DEFAULT_TOKEN_ENV, EnvToken, StaticToken};
pub use client::ArchiveClient;
pub use config::{PeriodConfig, PipelineConfig, PollConfig, Query};
pub use download::PollingDownloader;
pub use order::{Order, OrderResolver};
pub use runner::{IntervalStatus, Pipeline, RunError, RunSummary};
