use block_client::ByteStream;
use bytes::Bytes;

use crate::errors::Result;

/// Output of the upload-direction transform for one block.
pub struct EncryptedBlock {
    pub data: Bytes,
    /// Integrity hash of the (encrypted) block body, hex encoded.
    pub hash: String,
    pub enc_signature: Option<String>,
}

/// Opaque per-block content transform: decrypt on download, encrypt on
/// upload. The crypto itself is a collaborator; the engines only thread
/// streams and blocks through it.
#[async_trait::async_trait]
pub trait ContentTransform: Send + Sync {
    /// Download direction: wraps a fetched block's byte stream with the
    /// decrypting transform. Progress accounting observes the raw stream
    /// before this is applied.
    async fn decrypt_stream(
        &self,
        index: u64,
        stream: ByteStream,
        enc_signature: Option<&str>,
    ) -> Result<ByteStream>;

    /// Upload direction: encrypts one chunked block and reports its
    /// integrity hash and signature.
    async fn encrypt_block(&self, index: u64, data: Bytes) -> Result<EncryptedBlock>;
}
