//! SSE wire plumbing for the provider adapter.
//!
//! The Anthropic stream tags every frame with an `event:` line and a
//! single-line `data:` payload, frames separated by a blank line. We buffer
//! response chunks, cut complete frames, and hand each to a parser closure
//! that turns it into zero or more [`StreamEvent`]s.

use dp_domain::stream::{BoxStream, StreamEvent};
use dp_domain::{Error, Result};

/// One complete SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    /// Value of the `event:` line, when present.
    pub event: Option<String>,
    /// Concatenated `data:` payload.
    pub data: String,
}

/// Cut complete frames (delimited by a blank line) out of `buffer`,
/// leaving any trailing partial frame in place.
pub(crate) fn drain_frames(buffer: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let mut event = None;
        let mut data_lines: Vec<&str> = Vec::new();
        for line in block.lines() {
            if let Some(name) = line.strip_prefix("event:") {
                event = Some(name.trim().to_string());
            } else if let Some(payload) = line.strip_prefix("data:") {
                data_lines.push(payload.trim());
            }
            // id:/retry:/comment lines are irrelevant here.
        }

        let data = data_lines.join("\n");
        if event.is_some() || !data.is_empty() {
            frames.push(SseFrame { event, data });
        }
    }

    frames
}

/// Turn an SSE `reqwest::Response` into a stream of [`StreamEvent`]s.
///
/// `parse` is `FnMut` because the Anthropic parser carries block-assembly
/// state across frames. If the parser never emits `Done`, a fallback `Done`
/// without usage is appended when the body closes.
pub(crate) fn frame_stream<F>(
    response: reqwest::Response,
    mut parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(SseFrame) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for frame in drain_frames(&mut buffer) {
                        for event in parse(frame) {
                            done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed; flush a trailing frame that never got its
                    // blank-line terminator.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for frame in drain_frames(&mut buffer) {
                            for event in parse(frame) {
                                done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done { usage: None, stop_reason: None });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_with_event_name() {
        let mut buf =
            String::from("event: content_block_delta\ndata: {\"type\":\"ping\"}\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(frames[0].data, "{\"type\":\"ping\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut buf = String::from("data: one\n\ndata: two\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "one");
        assert_eq!(frames[1].data, "two");
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut buf = String::from("data: whole\n\nevent: message_delta\ndata: {\"par");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(buf, "event: message_delta\ndata: {\"par");

        buf.push_str("t\":1}\n\n");
        let rest = drain_frames(&mut buf);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].data, "{\"part\":1}");
        assert!(buf.is_empty());
    }

    #[test]
    fn comment_only_frame_is_dropped() {
        let mut buf = String::from(": keepalive\n\n");
        assert!(drain_frames(&mut buf).is_empty());
    }

    #[test]
    fn multi_line_data_joined() {
        let mut buf = String::from("data: a\ndata: b\n\n");
        let frames = drain_frames(&mut buf);
        assert_eq!(frames[0].data, "a\nb");
    }
}
