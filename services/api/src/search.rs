//! Search Stream Relay
//!
//! Turns the Responses API event stream of a hosted-tool search into the
//! frames the client consumes: one `status` frame up front, `content` frames
//! as text arrives, then `complete` with the full text or a single `error`.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use voicedesk_core::protocol::SearchFrame;
use voicedesk_core::stream::{Frame, FrameDecoder, TextAccumulator};

const FRAME_BUFFER: usize = 32;

/// Spawns the relay and returns the stream of encoded frames.
pub fn relay<S, E>(
    upstream: S,
    start_message: impl Into<String>,
) -> impl Stream<Item = serde_json::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let start_message = start_message.into();
    tokio::spawn(async move { pump(upstream, start_message, tx).await });
    ReceiverStream::new(rx).map(|frame: SearchFrame| frame.to_line().map(Bytes::from))
}

/// Drives `upstream` to the end, sending translated frames to `tx`. Stops
/// early when the receiver goes away.
pub async fn pump<S, E>(mut upstream: S, start_message: String, tx: mpsc::Sender<SearchFrame>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut relay = FrameRelay {
        tx,
        accumulator: TextAccumulator::new(),
    };
    if !relay
        .send(SearchFrame::Status {
            message: start_message,
        })
        .await
    {
        return;
    }

    let mut decoder = FrameDecoder::new();
    while let Some(chunk) = upstream.next().await {
        let frames = match chunk {
            Ok(chunk) => decoder.push(&chunk),
            Err(e) => {
                relay.fail(format!("Upstream stream failed: {}", e)).await;
                return;
            }
        };
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                relay.fail(e.to_string()).await;
                return;
            }
        };
        for frame in frames {
            match relay.forward(frame).await {
                Flow::Continue => {}
                Flow::Stop => return,
            }
        }
        if decoder.is_finished() {
            break;
        }
    }
    if let Some(frame) = decoder.finish() {
        if let Flow::Stop = relay.forward(frame).await {
            return;
        }
    }

    let text = relay.accumulator.into_text();
    debug!(result_len = text.len(), "Search stream finished");
    let content = (!text.is_empty()).then_some(text);
    let _ = relay.tx.send(SearchFrame::Complete { content }).await;
}

enum Flow {
    Continue,
    Stop,
}

struct FrameRelay {
    tx: mpsc::Sender<SearchFrame>,
    accumulator: TextAccumulator,
}

impl FrameRelay {
    async fn send(&self, frame: SearchFrame) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    async fn fail(&self, message: String) {
        warn!(%message, "Search failed");
        self.send(SearchFrame::Error { message }).await;
    }

    async fn forward(&mut self, frame: Frame) -> Flow {
        if let Frame::Json(value) = &frame {
            if let Some(message) = upstream_error(value) {
                self.fail(message).await;
                return Flow::Stop;
            }
            if let Some(message) = tool_status(value) {
                return self.keep_going(SearchFrame::Status { message }).await;
            }
        }
        match self.accumulator.ingest(&frame) {
            Some(content) => self.keep_going(SearchFrame::Content { content }).await,
            None => Flow::Continue,
        }
    }

    async fn keep_going(&self, frame: SearchFrame) -> Flow {
        if self.send(frame).await {
            Flow::Continue
        } else {
            debug!("Search client went away");
            Flow::Stop
        }
    }
}

fn event_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// The message of an `error` or `response.failed` event.
fn upstream_error(value: &Value) -> Option<String> {
    let message = match event_type(value)? {
        "error" => value
            .get("message")
            .or_else(|| value.pointer("/error/message")),
        "response.failed" => value.pointer("/response/error/message"),
        _ => return None,
    };
    Some(
        message
            .and_then(Value::as_str)
            .unwrap_or("Search request failed")
            .to_string(),
    )
}

/// Progress of the hosted search tool.
fn tool_status(value: &Value) -> Option<String> {
    let message = match event_type(value)? {
        "response.web_search_call.searching" => "Searching the web",
        "response.file_search_call.searching" => "Searching documents",
        _ => return None,
    };
    Some(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn upstream(chunks: Vec<&'static str>) -> impl Stream<Item = Result<Bytes, String>> + Unpin {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn frames<S>(source: S) -> Vec<SearchFrame>
    where
        S: Stream<Item = Result<Bytes, String>> + Unpin,
    {
        let (tx, mut rx) = mpsc::channel(64);
        pump(source, "Starting search".into(), tx).await;
        let mut out = Vec::new();
        while let Some(frame) = rx.recv().await {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn test_responses_stream_becomes_search_frames() {
        let out = frames(upstream(vec![
            "data: {\"type\":\"response.created\",\"response\":{\"output\":[]}}\n\n",
            "data: {\"type\":\"response.web_search_call.searching\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Sunny\"}\n\ndata: {\"type\":\"resp",
            "onse.output_text.delta\",\"delta\":\" today\"}\n\n",
            "data: {\"type\":\"response.output_text.done\",\"text\":\"Sunny today\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"output\":[]}}\n\n",
        ]))
        .await;

        assert_eq!(
            out,
            vec![
                SearchFrame::Status {
                    message: "Starting search".into()
                },
                SearchFrame::Status {
                    message: "Searching the web".into()
                },
                SearchFrame::Content {
                    content: "Sunny".into()
                },
                SearchFrame::Content {
                    content: " today".into()
                },
                SearchFrame::Complete {
                    content: Some("Sunny today".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_completed_envelope_used_when_nothing_streamed() {
        let out = frames(upstream(vec![
            "data: {\"type\":\"response.completed\",\"response\":{\"output\":[{\"type\":\"message\",\"content\":[{\"type\":\"output_text\",\"text\":\"Found it\"}]}]}}\n",
        ]))
        .await;
        assert_eq!(
            out.last(),
            Some(&SearchFrame::Complete {
                content: Some("Found it".into())
            })
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_ends_with_error() {
        let out = frames(upstream(vec![
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"part\"}\n",
            "data: {\"type\":\"response.failed\",\"response\":{\"error\":{\"message\":\"vector store not found\"}}}\n",
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"ignored\"}\n",
        ]))
        .await;
        assert_eq!(
            out.last(),
            Some(&SearchFrame::Error {
                message: "vector store not found".into()
            })
        );
        assert!(!out.iter().any(|f| matches!(f, SearchFrame::Complete { .. })));
    }

    #[tokio::test]
    async fn test_transport_error_ends_with_error() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"delta\":\"a\"}\n")),
            Err("connection reset".to_string()),
        ]);
        let out = frames(source).await;
        match out.last() {
            Some(SearchFrame::Error { message }) => assert!(message.contains("connection reset")),
            other => panic!("Expected an error frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_stream_completes_without_content() {
        let out = frames(upstream(vec!["data: [DONE]\n"])).await;
        assert_eq!(out.last(), Some(&SearchFrame::Complete { content: None }));
    }

    #[tokio::test]
    async fn test_relay_encodes_data_lines() {
        let lines: Vec<Bytes> = relay(upstream(vec!["data: {\"delta\":\"x\"}\n"]), "go")
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(
            lines[0],
            Bytes::from("data: {\"type\":\"status\",\"message\":\"go\"}\n\n")
        );
        assert_eq!(
            lines.last(),
            Some(&Bytes::from(
                "data: {\"type\":\"complete\",\"content\":\"x\"}\n\n"
            ))
        );
    }
}
