//! Browser artifact extractors, grouped by engine family

pub mod chromium;
