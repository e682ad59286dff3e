//! Multi-source tree fetching: the candidate race and its status tracking.

mod fetcher;
mod status;

pub use fetcher::{SourceHistory, TreeFetchHandle, TreeFetcher, TreeResolution};
pub use status::{FetchState, FetchStatus, StatusBoard};
