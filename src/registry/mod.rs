//! Registry I/O: manifest/referrer/blob access (C1), Quay tag listing (C2),
//! and the process-scoped request cache (C3) that sits in front of both.

pub mod auth;
pub mod cache;
pub mod client;
pub mod quay;
pub mod types;

pub use cache::RequestCache;
pub use client::{OciRegistryClient, RegistryClient, RetryConfig};
pub use quay::{DistributionTagLister, TagLister};
pub use types::{Descriptor, Manifest};
