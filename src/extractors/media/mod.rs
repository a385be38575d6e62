//! Media recovery extractors (signature carving)

pub mod foremost_carver;

/// Extensions of carved files that ingestion records
pub const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tif", ".tiff", ".webp",
];
