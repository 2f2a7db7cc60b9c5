//! Where received chat messages end up.

use chatwire_protocol::{Identity, NewMessageEvent};
use tokio::sync::mpsc;

/// A received message ready to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub message: String,
    pub from: Identity,
    /// Milliseconds since the Unix epoch, as stamped by the server.
    pub sent: u64,
    /// `sent` rendered as `YYYY-MM-DD HH:MM:SS UTC`.
    pub sent_text: String,
}

impl From<NewMessageEvent> for DisplayMessage {
    fn from(event: NewMessageEvent) -> Self {
        Self {
            sent_text: format_sent(event.sent),
            message: event.message,
            from: event.from,
            sent: event.sent,
        }
    }
}

/// Falls back to the raw number for timestamps chrono can't represent.
fn format_sent(sent: u64) -> String {
    i64::try_from(sent)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| sent.to_string())
}

/// Receives every `new_message` the client accepts, exactly once each.
///
/// Called with the client's session lock held, so implementations should
/// hand the message off rather than do slow work inline.
pub trait DisplaySink: Send + Sync + 'static {
    fn display(&self, message: &DisplayMessage);
}

/// Forwards messages into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DisplayMessage>,
}

impl ChannelSink {
    /// A sink and the receiver its messages arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DisplaySink for ChannelSink {
    fn display(&self, message: &DisplayMessage) {
        if self.tx.send(message.clone()).is_err() {
            tracing::debug!("display receiver dropped, message discarded");
        }
    }
}

/// Writes messages to the log at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn display(&self, message: &DisplayMessage) {
        tracing::info!(
            from = %message.from,
            sent = %message.sent_text,
            "{}",
            message.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(sent: u64) -> NewMessageEvent {
        NewMessageEvent {
            message: "hi".into(),
            from: Identity::from("bob"),
            sent,
        }
    }

    #[test]
    fn test_display_message_formats_sent_in_utc() {
        // 2023-11-14T22:13:20Z
        let shown = DisplayMessage::from(event(1_700_000_000_000));
        assert_eq!(shown.sent_text, "2023-11-14 22:13:20 UTC");
        assert_eq!(shown.from, Identity::from("bob"));
        assert_eq!(shown.message, "hi");
    }

    #[test]
    fn test_display_message_out_of_range_sent_is_raw_number() {
        let shown = DisplayMessage::from(event(u64::MAX));
        assert_eq!(shown.sent_text, u64::MAX.to_string());
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.display(&DisplayMessage::from(event(0)));

        let got = rx.try_recv().unwrap();
        assert_eq!(got.sent_text, "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_channel_sink_with_dropped_receiver_does_not_panic() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.display(&DisplayMessage::from(event(0)));
    }
}
