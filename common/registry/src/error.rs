use reqwest::StatusCode;
use thiserror::Error;

/// Enumeration of errors returned by a `RegistryClient`.
///
/// None of them is classified as transient: callers decide whether to retry through a
/// `RetryPolicy`.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid registry address {address}: {error}")]
    InvalidAddress {
        address: String,
        error: url::ParseError,
    },
    #[error("failed to build registry http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("registry unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("registry rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
}
