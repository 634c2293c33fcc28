mod client;

pub use client::{BlobStoreClient, BlobStoreError, Credentials, ObjectInfo, ObjectPage};
