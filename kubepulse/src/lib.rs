//! Live resource allocation and usage for Kubernetes clusters.
//!
//! A watch-fed [`mirror::ObjectMirror`] and direct list calls feed the
//! [`orchestrator::Orchestrator`], which fans per-entity work out under a
//! concurrency bound and hands sorted rows to the [`live::LiveViewEngine`].
//! Node rows are enriched through the [`cloud::CloudMetadataCache`].

pub mod aggregate;
pub mod cloud;
pub mod config;
pub mod error;
pub mod live;
pub mod log;
pub mod mirror;
pub mod model;
pub mod orchestrator;
pub mod quantity;
pub mod source;
pub mod ui;

pub use error::{Error, Result};
