use drive_config::ClientConfig;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

use crate::error::Result;

/// Builds the shared HTTP client used for block fetches, with the
/// per-request timeout from the client config. Retry is layered on top by
/// [`RetryWrapper`](crate::RetryWrapper) rather than middleware so the
/// caller controls classification.
pub fn build_http_client(config: &ClientConfig) -> Result<ClientWithMiddleware> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(crate::BlockClientError::from)?;

    Ok(ClientBuilder::new(client).build())
}
