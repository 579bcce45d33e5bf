use crate::api::client::{ByteStream, MockStreamProducer, ModelRequest};
use anyhow::Result;
use bytes::Bytes;
use futures::stream;
use std::sync::{Arc, Mutex};

/// Canned SSE chunk scripts for tests. Each inner `Vec<String>` is one model
/// call; chunks missing the `\n\n` frame terminator get one appended.
#[derive(Clone)]
pub struct MockModelStream {
    responses: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockModelStream {
    pub fn new(responses: Vec<Vec<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
        }
    }
}

impl MockStreamProducer for MockModelStream {
    fn create_mock_stream(&self, _request: &ModelRequest) -> Result<ByteStream> {
        let mut responses_guard = self.responses.lock().unwrap();
        if responses_guard.is_empty() {
            return Err(anyhow::anyhow!(
                "MockModelStream: no more responses configured"
            ));
        }
        let current_sse_chunks = responses_guard.remove(0);

        let sse_byte_chunks: Vec<Result<Bytes>> = current_sse_chunks
            .into_iter()
            .map(|s| {
                let framed = if s.ends_with("\n\n") {
                    s
                } else {
                    format!("{s}\n\n")
                };
                Ok(Bytes::from(framed))
            })
            .collect();

        Ok(Box::pin(stream::iter(sse_byte_chunks)))
    }
}
