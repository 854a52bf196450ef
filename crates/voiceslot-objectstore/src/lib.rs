//! `ObjectStorePort` adapters: a filesystem implementation for local dev
//! and tests, and an S3 implementation for production.

pub mod filesystem;
pub mod s3;

pub use filesystem::FilesystemObjectStore;
pub use s3::S3ObjectStore;
