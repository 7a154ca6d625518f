//! Server-sent event streaming of completions
//!
//! The full answer is generated first and then replayed as
//! `chat.completion.chunk` events, so clients written against streaming
//! APIs work unchanged.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use sonar_core::{ChatCompletionResponse, Choice, Delta};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::SonarResult;

/// Pause between two chunks
pub const CHUNK_DELAY: Duration = Duration::from_millis(10);

/// Final event of every stream
pub const DONE_EVENT: &[u8] = b"data: [DONE]\n\n";

/// Builds the events of one streamed completion
#[derive(Debug, Clone)]
pub struct ChunkStreamer {
    id: String,
    model: String,
    created: i64,
    citations: Option<Vec<String>>,
}

impl ChunkStreamer {
    pub fn new<I: Into<String>, M: Into<String>>(
        id: I,
        model: M,
        citations: Option<Vec<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            citations: citations.filter(|c| !c.is_empty()),
        }
    }

    /// Chunk object: role on the first chunk, finish reason and citations
    /// on the last
    pub fn chunk(&self, content: &str, is_first: bool, is_last: bool) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.id.clone(),
            model: self.model.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            citations: if is_last { self.citations.clone() } else { None },
            choices: vec![Choice {
                index: 0,
                finish_reason: is_last.then(|| "stop".to_string()),
                message: None,
                delta: Some(Delta {
                    role: is_first.then(|| "assistant".to_string()),
                    content: Some(content.to_string()),
                }),
            }],
            usage: None,
        }
    }

    /// `data: <json>\n\n`
    pub fn event(&self, content: &str, is_first: bool, is_last: bool) -> SonarResult<Bytes> {
        let json = serde_json::to_string(&self.chunk(content, is_first, is_last))?;
        Ok(Bytes::from(format!("data: {}\n\n", json)))
    }

    /// Every event for `content`, ending with `[DONE]`
    pub fn events(&self, content: &str, chunk_size: usize) -> SonarResult<Vec<Bytes>> {
        let chunks = split_chunks(content, chunk_size);
        let last = chunks.len() - 1;
        let mut events = Vec::with_capacity(chunks.len() + 1);
        for (i, chunk) in chunks.iter().enumerate() {
            events.push(self.event(chunk, i == 0, i == last)?);
        }
        events.push(Bytes::from_static(DONE_EVENT));
        Ok(events)
    }
}

/// Split `content` into pieces of at most `chunk_size` characters. Empty
/// content still yields one (empty) chunk.
pub fn split_chunks(content: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = content.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect()
}

/// Paced event stream for `content`. Stops early when the client goes away.
pub fn stream_completion(
    streamer: ChunkStreamer,
    content: String,
    chunk_size: usize,
) -> SonarResult<BoxStream<'static, Bytes>> {
    let events = streamer.events(&content, chunk_size)?;
    let (tx, rx) = mpsc::channel::<Bytes>(4);

    tokio::spawn(async move {
        let total = events.len();
        for (i, event) in events.into_iter().enumerate() {
            if tx.send(event).await.is_err() {
                debug!("Stream receiver dropped after {} of {} events", i, total);
                return;
            }
            // no pause before [DONE]
            if i + 2 < total {
                tokio::time::sleep(CHUNK_DELAY).await;
            }
        }
    });

    Ok(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .boxed())
}

/// Parse the JSON chunks of an SSE body, stopping at `[DONE]`
pub fn parse_events(body: &str) -> Vec<ChatCompletionResponse> {
    body.split("\n\n")
        .filter_map(|event| event.strip_prefix("data: "))
        .take_while(|data| *data != "[DONE]")
        .filter_map(|data| match serde_json::from_str(data) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                error!("Malformed stream event: {}", e);
                None
            }
        })
        .collect()
}
