//! Request, response, and payload hooks
//!
//! Each hook returns `None` to abort the operation. Closures with the
//! matching signature implement the traits directly.

use bytes::Bytes;
use url::Url;

use super::types::{DownloadRequest, ResponseHead};

/// Rewrites a request before it is sent
pub trait RequestModifier: Send + Sync {
    fn modify_request(&self, request: DownloadRequest) -> Option<DownloadRequest>;
}

impl<F> RequestModifier for F
where
    F: Fn(DownloadRequest) -> Option<DownloadRequest> + Send + Sync,
{
    fn modify_request(&self, request: DownloadRequest) -> Option<DownloadRequest> {
        self(request)
    }
}

/// Rewrites a response head before it is validated
pub trait ResponseModifier: Send + Sync {
    fn modify_response(&self, head: ResponseHead) -> Option<ResponseHead>;
}

impl<F> ResponseModifier for F
where
    F: Fn(ResponseHead) -> Option<ResponseHead> + Send + Sync,
{
    fn modify_response(&self, head: ResponseHead) -> Option<ResponseHead> {
        self(head)
    }
}

/// Turns an obfuscated payload into image bytes
pub trait DataDecryptor: Send + Sync {
    fn decrypt(&self, data: Bytes, url: &Url) -> Option<Bytes>;
}

impl<F> DataDecryptor for F
where
    F: Fn(Bytes, &Url) -> Option<Bytes> + Send + Sync,
{
    fn decrypt(&self, data: Bytes, url: &Url) -> Option<Bytes> {
        self(data, url)
    }
}

/// Decryptor for payloads XOR-ed with a repeating key
#[derive(Debug, Clone)]
pub struct XorDecryptor {
    key: Vec<u8>,
}

impl XorDecryptor {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl DataDecryptor for XorDecryptor {
    fn decrypt(&self, data: Bytes, _url: &Url) -> Option<Bytes> {
        if self.key.is_empty() {
            return None;
        }
        let decoded: Vec<u8> = data
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect();
        Some(Bytes::from(decoded))
    }
}
