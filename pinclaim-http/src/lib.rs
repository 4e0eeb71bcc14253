#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP collaborators for [`pinclaim`].
//!
//! - [`HttpPriceOracle`] reads the storage write price and fiat exchange
//!   rates from a JSON price service.
//! - [`KuboContentStore`] adds, stats and unpins objects on an IPFS node
//!   through its RPC API.
//!
//! Both map their transport errors into the collaborator error types of
//! the core crate, so they can be dropped into
//! [`Collaborators`](pinclaim::Collaborators) directly.

pub mod error;
pub mod kubo;
pub mod oracle;

pub use error::HttpClientError;
pub use kubo::KuboContentStore;
pub use oracle::HttpPriceOracle;

/// Reads a response body, turning non-success statuses into
/// [`HttpClientError::HttpStatus`].
pub(crate) async fn read_body(
    response: reqwest::Response,
    context: &'static str,
) -> Result<String, HttpClientError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| HttpClientError::ResponseBodyRead { context, source })?;
    if !status.is_success() {
        return Err(HttpClientError::HttpStatus {
            context,
            status,
            body,
        });
    }
    Ok(body)
}
