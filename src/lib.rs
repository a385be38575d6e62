//! CORE-EXTRACT: forensic artifact extraction and ingestion
//!
//! - [`extractors`]: extractor contract, registry, discovery engine,
//!   dual-phase runner and carving monitor, plus the built-in extractors
//! - [`evidence`]: evidence filesystem abstraction and mounted-directory backend
//! - [`database`]: evidence database schema and row helpers
//! - [`config`]: persisted settings and per-run configuration

pub mod common;
pub mod config;
pub mod database;
pub mod error;
pub mod evidence;
pub mod extractors;
pub mod logging;

pub use config::{RunConfig, Settings};
pub use error::{ExtractorError, ExtractorResult};
pub use evidence::{EvidenceFs, MountedEvidence};
pub use extractors::registry::ExtractorRegistry;
pub use extractors::runner::{ExtractorRunner, RunReport, RunStatus};
pub use extractors::{EvidenceContext, Extractor, ExtractorMetadata};
