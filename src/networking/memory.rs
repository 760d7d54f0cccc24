use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;

use super::{ByteStream, FetchError, Fetcher};

enum Canned {
    Body(Vec<u8>),
    Status(u16),
    Unreachable,
}

/// In-memory fetcher for tests. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryFetcher {
    responses: Mutex<HashMap<String, Canned>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> &Self {
        self.put(url.into(), Canned::Body(body.into()))
    }

    pub fn fail(&self, url: impl Into<String>, status: u16) -> &Self {
        self.put(url.into(), Canned::Status(status))
    }

    pub fn unreachable(&self, url: impl Into<String>) -> &Self {
        self.put(url.into(), Canned::Unreachable)
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }

    fn put(&self, url: String, canned: Canned) -> &Self {
        self.responses.lock().unwrap().insert(url, canned);
        self
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        self.requests.lock().unwrap().push(url.to_owned());
        let responses = self.responses.lock().unwrap();
        match responses.get(url) {
            Some(Canned::Body(body)) => {
                // Two chunks so consumers exercise their streaming path.
                let mid = body.len() / 2;
                let chunks = vec![
                    Ok(Bytes::copy_from_slice(&body[..mid])),
                    Ok(Bytes::copy_from_slice(&body[mid..])),
                ];
                Ok(stream::iter(chunks).boxed())
            }
            Some(Canned::Status(status)) => Err(FetchError::Status {
                url: url.to_owned(),
                status: *status,
            }),
            Some(Canned::Unreachable) => Err(FetchError::Timeout {
                url: url.to_owned(),
            }),
            None => Err(FetchError::Status {
                url: url.to_owned(),
                status: 404,
            }),
        }
    }
}
