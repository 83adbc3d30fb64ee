//! Persistence and outbound fetch plumbing for tender intelligence.

pub mod http;
pub mod memory;
pub mod postgres;
pub mod store;

pub use http::{
    classify_status, FetchError, FetchedPage, HttpClientConfig, HttpFetcher, PageFetcher,
    RetryDisposition, StaticFetcher, DEFAULT_USER_AGENT,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    DigestCandidate, DigestStats, InsertOutcome, SourceQuery, StoreError, TenderPage,
    TenderQuery, TenderStore, UpsertOutcome, DEFAULT_PAGE_SIZE,
};

pub use reqwest::Url;

pub const CRATE_NAME: &str = "tender-storage";
