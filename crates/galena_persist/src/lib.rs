pub mod changelog;
pub mod compression;
pub mod snapshot;
pub mod versioning;
