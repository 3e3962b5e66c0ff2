//! Routes bot output messages to the downstream sink.
//!
//! The router serializes each message envelope to CBOR and writes it
//! synchronously, preserving emission order. A sink rejection is logged and
//! the message dropped; the router never queues internally.

use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use vidbot_protocol::{encode_message, write_framed, BotMessage};

use crate::dispatcher::DispatcherMetrics;

/// Downstream consumer of encoded message records. May reject a write.
pub trait MessageSink {
    fn send(&mut self, record: &[u8]) -> anyhow::Result<()>;
}

/// Sink writing length-prefixed records (big-endian `u32` length + CBOR
/// body) to any byte-oriented writer.
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer }
    }
}

impl<W: Write> MessageSink for WriterSink<W> {
    fn send(&mut self, record: &[u8]) -> anyhow::Result<()> {
        write_framed(&mut self.writer, record).context("failed to write message record")?;
        self.writer.flush().context("failed to flush sink")?;
        Ok(())
    }
}

/// Serializes bot messages and forwards them to the sink in emission order.
pub struct MessageRouter {
    sink: Box<dyn MessageSink>,
    metrics: Arc<DispatcherMetrics>,
}

impl MessageRouter {
    pub fn new(sink: Box<dyn MessageSink>, metrics: Arc<DispatcherMetrics>) -> Self {
        MessageRouter { sink, metrics }
    }

    /// Serialize and forward one message. Failures are recorded and the
    /// message dropped; the stream continues.
    pub fn forward(&mut self, message: BotMessage) {
        let record = match encode_message(&message) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind.name(), "failed to encode message");
                self.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.sink.send(&record) {
            Ok(()) => {
                self.metrics.messages_routed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    kind = message.kind.name(),
                    i1 = message.frame_id.i1,
                    i2 = message.frame_id.i2,
                    bytes = record.len(),
                    "routed message"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = message.kind.name(), "sink rejected message");
                self.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use ciborium::value::Value;
    use vidbot_protocol::{decode_message, read_framed, FrameId, MessageKind};

    struct FailingSink;

    impl MessageSink for FailingSink {
        fn send(&mut self, _record: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("sink closed")
        }
    }

    /// Writer handle into a shared buffer, so the test can read back what
    /// the router wrote.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn message(n: u64) -> BotMessage {
        BotMessage {
            kind: MessageKind::Analysis,
            frame_id: FrameId::single(n),
            payload: Value::Integer(n.into()),
        }
    }

    #[test]
    fn writer_sink_frames_records() {
        let buffer = SharedBuffer::default();
        let metrics = Arc::new(DispatcherMetrics::new());
        let mut router = MessageRouter::new(
            Box::new(WriterSink::new(buffer.clone())),
            Arc::clone(&metrics),
        );
        router.forward(message(1));
        router.forward(message(2));
        assert_eq!(metrics.messages_routed.load(Ordering::Relaxed), 2);

        let written = buffer.0.lock().unwrap().clone();
        let mut reader = written.as_slice();
        let first = decode_message(&read_framed(&mut reader).unwrap()).unwrap();
        let second = decode_message(&read_framed(&mut reader).unwrap()).unwrap();
        assert_eq!(first.frame_id, FrameId::single(1));
        assert_eq!(second.frame_id, FrameId::single(2));
    }

    #[test]
    fn rejection_is_recorded_not_fatal() {
        let metrics = Arc::new(DispatcherMetrics::new());
        let mut router = MessageRouter::new(Box::new(FailingSink), Arc::clone(&metrics));
        router.forward(message(1));
        router.forward(message(2));
        assert_eq!(metrics.messages_routed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.messages_failed.load(Ordering::Relaxed), 2);
    }
}
