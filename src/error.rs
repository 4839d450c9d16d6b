use thiserror::Error;

/// Errors surfaced by the page cache, page layer, and B-tree/cursor layer.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BtreeError {
    #[error("page number 0 is not a valid page number")]
    InvalidPageNumber,

    #[error("page cache miss")]
    CacheMiss,

    #[error("invalid page flags combination")]
    InvalidFlags,

    #[error("invalid page type")]
    InvalidPageType,

    #[error("corrupted page")]
    CorruptedPage,

    #[error("insert would overflow a non-root page; sibling balancing is not implemented")]
    BalanceUnsupported,
}
