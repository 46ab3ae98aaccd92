//! Server-sent event framing for chat events.

use super::events::ChatEvent;
use super::orchestrator::ChatEvents;
use async_stream::stream;
use futures_core::Stream;
use futures_util::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use thiserror::Error;

const UNTERMINATED_MESSAGE: &str = "The response ended unexpectedly.";
/// Idle time after which a keep-alive comment is sent so proxies keep the connection open.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Errors raised while framing events.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Event could not be serialized.
    #[error("failed to serialize chat event: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A `done` or `error` frame was already written.
    #[error("stream already terminated; refusing {0} event")]
    AfterTerminal(&'static str),
}

/// Frames chat events in emission order and refuses anything after a terminal event.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    pending: String,
    terminated: bool,
}

impl StreamEncoder {
    /// Fresh encoder for one response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal frame has been written.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Append the `data: <json>` frame for `event` to the pending buffer.
    pub fn encode(&mut self, event: &ChatEvent) -> Result<(), EncodeError> {
        if self.terminated {
            return Err(EncodeError::AfterTerminal(event.kind()));
        }
        let payload = serde_json::to_string(event)?;
        self.terminated = event.is_terminal();
        self.pending.push_str("data: ");
        self.pending.push_str(&payload);
        self.pending.push_str("\n\n");
        Ok(())
    }

    /// Append an SSE comment line; clients ignore it.
    pub fn keep_alive(&mut self) {
        self.pending.push_str(": keep-alive\n\n");
    }

    /// Take every frame encoded since the last flush.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

/// Relay `events` as `text/event-stream` body chunks, one flush per event, in order.
///
/// If the producer vanishes without a terminal event an `error` frame closes the stream, so
/// clients always see exactly one `done` or `error`. Dropping the returned stream drops
/// `events`, which cancels the producer.
pub fn sse_frames(
    mut events: ChatEvents,
    keep_alive: Duration,
) -> impl Stream<Item = Result<String, Infallible>> {
    stream! {
        let mut encoder = StreamEncoder::new();
        loop {
            let event = match tokio::time::timeout(keep_alive, events.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    encoder.keep_alive();
                    yield Ok(encoder.flush());
                    continue;
                }
            };
            if let Err(error) = encoder.encode(&event) {
                tracing::warn!(error = %error, "Dropping unframeable chat event");
            }
            let frames = encoder.flush();
            if !frames.is_empty() {
                yield Ok(frames);
            }
            if encoder.is_terminated() {
                break;
            }
        }
        if !encoder.is_terminated()
            && encoder.encode(&ChatEvent::Error(UNTERMINATED_MESSAGE.into())).is_ok()
        {
            yield Ok(encoder.flush());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::events::Stage;
    use tokio::sync::mpsc;

    fn relay(events: Vec<ChatEvent>) -> ChatEvents {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        ChatEvents::from_receiver(rx)
    }

    #[test]
    fn frames_preserve_order() {
        let mut encoder = StreamEncoder::new();
        encoder.encode(&ChatEvent::started(Stage::GeneratingResponse)).unwrap();
        encoder.encode(&ChatEvent::Text("Hello".into())).unwrap();
        encoder.encode(&ChatEvent::Done).unwrap();

        let frames = encoder.flush();
        assert_eq!(
            frames,
            concat!(
                "data: {\"type\":\"tool_call\",\"name\":\"generating_response\",\"status\":\"in_progress\"}\n\n",
                "data: {\"type\":\"text\",\"content\":\"Hello\"}\n\n",
                "data: {\"type\":\"done\"}\n\n",
            )
        );
        assert!(encoder.flush().is_empty());
    }

    #[test]
    fn refuses_events_after_terminal() {
        let mut encoder = StreamEncoder::new();
        encoder.encode(&ChatEvent::Error("boom".into())).unwrap();
        assert!(encoder.is_terminated());
        assert!(matches!(
            encoder.encode(&ChatEvent::Done),
            Err(EncodeError::AfterTerminal("done"))
        ));
    }

    #[test]
    fn multiline_text_stays_in_one_frame() {
        let mut encoder = StreamEncoder::new();
        encoder.encode(&ChatEvent::Text("line one\nline two".into())).unwrap();
        let frames = encoder.flush();
        assert_eq!(frames.matches("\n\n").count(), 1);
        assert!(frames.contains("line one\\nline two"));
    }

    #[tokio::test]
    async fn relay_stops_after_terminal_event() {
        let frames: Vec<String> = sse_frames(
            relay(vec![
                ChatEvent::Text("Hi".into()),
                ChatEvent::Done,
                ChatEvent::Text("late".into()),
            ]),
            KEEP_ALIVE_INTERVAL,
        )
        .map(|frame| frame.unwrap())
        .collect()
        .await;

        assert_eq!(
            frames,
            vec![
                "data: {\"type\":\"text\",\"content\":\"Hi\"}\n\n",
                "data: {\"type\":\"done\"}\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn relay_closes_unterminated_stream_with_error() {
        let frames: Vec<String> = sse_frames(
            relay(vec![ChatEvent::started(Stage::SearchingDocuments)]),
            KEEP_ALIVE_INTERVAL,
        )
        .map(|frame| frame.unwrap())
        .collect()
        .await;

        assert_eq!(frames.len(), 2);
        assert!(frames[1].starts_with("data: {\"type\":\"error\""));
    }

    #[tokio::test]
    async fn idle_relay_sends_keep_alive_comments() {
        let (tx, rx) = mpsc::channel(1);
        let mut frames = Box::pin(sse_frames(
            ChatEvents::from_receiver(rx),
            Duration::from_millis(10),
        ));

        assert_eq!(frames.next().await.unwrap().unwrap(), ": keep-alive\n\n");
        tx.send(ChatEvent::Done).await.unwrap();
        let mut next = frames.next().await.unwrap().unwrap();
        while next.starts_with(':') {
            next = frames.next().await.unwrap().unwrap();
        }
        assert_eq!(next, "data: {\"type\":\"done\"}\n\n");
        assert!(frames.next().await.is_none());
    }
}
