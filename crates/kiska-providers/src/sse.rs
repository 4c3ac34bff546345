//! Server-Sent Events decoding for streaming chat completions.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder: feed raw chunks, collect complete events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
    ready: VecDeque<SseEvent>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.line(line.trim_end_matches(['\n', '\r']));
        }
    }

    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.ready.pop_front()
    }

    /// Flush whatever is buffered once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.line(rest.trim_end_matches('\r'));
        }
        self.dispatch();
        self.ready.pop_front()
    }

    fn line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
        } else if line.starts_with(':') {
            // comment / keep-alive
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.trim_start().to_string());
        }
    }

    fn dispatch(&mut self) {
        if self.data.is_empty() {
            self.event = None;
            return;
        }
        self.ready.push_back(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        });
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Decode a response body as a stream of SSE events.
pub fn parse_sse_stream(response: reqwest::Response) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    let body: ByteStream = Box::pin(response.bytes_stream());
    futures::stream::unfold(
        (body, SseDecoder::new(), false),
        |(mut body, mut decoder, mut ended)| async move {
            loop {
                if let Some(event) = decoder.next_event() {
                    return Some((Ok(event), (body, decoder, ended)));
                }
                if ended {
                    return None;
                }
                match body.next().await {
                    Some(Ok(chunk)) => decoder.feed(&chunk),
                    Some(Err(e)) => {
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), (body, decoder, true)));
                    }
                    None => {
                        ended = true;
                        if let Some(event) = decoder.finish() {
                            return Some((Ok(event), (body, decoder, ended)));
                        }
                    }
                }
            }
        },
    )
}
