pub mod cache;
pub mod cursors;
pub mod operations;
pub mod persistence;
pub mod presence;
pub mod sessions;
pub mod versions;
