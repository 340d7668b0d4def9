//! Job persistence + HTTP fetch utilities for DJB.

pub mod http;
pub mod store;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchRequest,
    FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use store::{DedupRow, InsertOutcome, JobStore, MemoryJobStore, PgJobStore, StoreError};

pub const CRATE_NAME: &str = "djb-storage";
