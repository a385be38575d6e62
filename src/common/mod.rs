// Common utilities shared across extractors

pub mod audit;
pub mod hash;
pub mod path_security;

// Re-exports for convenience
pub use hash::{digest_file, DualHasher, FileDigests};
pub use path_security::{relative_to, resolve_under, sanitize_filename};

// Shared constants
pub const BUFFER_SIZE: usize = 8 * 1024 * 1024; // 8MB buffer for optimal throughput
