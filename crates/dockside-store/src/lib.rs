//! # dockside-store
//!
//! External service clients for the dockside ingestion pipeline: the
//! object store holding the documents and the queue delivering its
//! change notifications.
//!
//! Both clients speak plain HTTP with AWS Signature V4 authentication
//! implemented in pure Rust (`hmac` + `sha2`), so they work against AWS
//! as well as S3/SQS-compatible stand-ins (MinIO, LocalStack, ElasticMQ)
//! via custom endpoints. In-memory doubles back the test suites.

pub mod memory;
pub mod s3;
pub mod sigv4;
pub mod sqs;

pub use memory::{MemoryObjectStore, MemoryQueue};
pub use s3::{S3Config, S3ObjectStore};
pub use sigv4::AwsCredentials;
pub use sqs::{SqsConfig, SqsQueue};
