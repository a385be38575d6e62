//! Operating-system level extractors

pub mod file_list;
