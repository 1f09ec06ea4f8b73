// src/s3/mod.rs

//! File → S3 uploads: a single `PutObject`, or a multipart upload in
//! fixed-size parts for large files.

pub mod store;
pub mod upload;

pub use store::{ObjectStore, PartSource, S3Store, UploadedPart};
pub use upload::{plan_parts, upload_file, UploadMode, UploadOptions};
