use std::sync::Arc;

use drive_config::ClientConfig;
use futures::{StreamExt, TryStreamExt};
use reqwest_middleware::ClientWithMiddleware;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{BlockClientError, Result};
use crate::http_client::build_http_client;
use crate::interface::{BlockFetcher, ByteStream};
use crate::retry_wrapper::RetryWrapper;
use crate::types::BlockInfo;

/// HTTP implementation of [`BlockFetcher`]: fetches a block body from its
/// pre-authorized URL, retrying the request (not the body stream) on
/// transient failures. Errors while reading the body surface through the
/// returned stream and are classified as network failures, which the
/// transfer engine recovers from by suspending and replaying the block.
pub struct RemoteBlockFetcher {
    http_client: Arc<ClientWithMiddleware>,
    config: ClientConfig,
}

impl RemoteBlockFetcher {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            http_client: Arc::new(build_http_client(config)?),
            config: config.clone(),
        })
    }

    /// Uses an externally built client, e.g. one sharing a connection pool
    /// with the metadata API.
    pub fn with_client(http_client: Arc<ClientWithMiddleware>, config: &ClientConfig) -> Self {
        Self {
            http_client,
            config: config.clone(),
        }
    }
}

#[async_trait::async_trait]
impl BlockFetcher for RemoteBlockFetcher {
    async fn fetch_block(&self, block: &BlockInfo, cancel: CancellationToken) -> Result<ByteStream> {
        let url = Url::parse(&block.url)?;
        debug!(index = block.index, %url, "Fetching block");

        let client = self.http_client.clone();
        let request = RetryWrapper::new("block::get", &self.config).run(move || client.get(url.clone()).send());

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(BlockClientError::Cancelled),
            r = request => r?,
        };

        Ok(resp.bytes_stream().map_err(BlockClientError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn block_at(url: String) -> BlockInfo {
        BlockInfo {
            index: 1,
            url,
            hash: "ab".repeat(16),
            enc_signature: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_block_streams_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/blocks/1");
            then.status(200).body(b"encrypted-block-bytes");
        });

        let fetcher = RemoteBlockFetcher::new(&ClientConfig::default()).unwrap();
        let block = block_at(server.url("/blocks/1"));

        let stream = fetcher.fetch_block(&block, CancellationToken::new()).await.unwrap();
        let chunks: Vec<_> = stream.try_collect().await.unwrap();
        let body: Vec<u8> = chunks.into_iter().flatten().collect();

        assert_eq!(body, b"encrypted-block-bytes");
    }

    #[tokio::test]
    async fn test_fetch_block_expired_reference() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/blocks/2");
            then.status(422);
        });

        let fetcher = RemoteBlockFetcher::new(&ClientConfig::default()).unwrap();
        let block = block_at(server.url("/blocks/2"));

        let err = fetcher.fetch_block(&block, CancellationToken::new()).await.err().unwrap();
        assert!(err.is_expired_reference());
    }

    #[tokio::test]
    async fn test_fetch_block_cancelled() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/blocks/3");
            then.status(200).delay(std::time::Duration::from_secs(5));
        });

        let fetcher = RemoteBlockFetcher::new(&ClientConfig::default()).unwrap();
        let block = block_at(server.url("/blocks/3"));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher.fetch_block(&block, cancel).await.err().unwrap();
        assert!(err.is_cancellation());
    }
}
