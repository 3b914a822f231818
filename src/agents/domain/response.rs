//! Streamed agent responses

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Single-pass, forward-only sequence of text fragments produced by an agent.
///
/// Backed by a channel fed from a producer task. Dropping the stream closes
/// the channel; producers observe the failed send and stop, releasing
/// whatever connection they hold.
pub struct TextStream {
    inner: ReceiverStream<String>,
}

impl TextStream {
    /// Create a channel pair for building a text stream
    pub fn channel(buffer: usize) -> (TextStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            TextStreamSender { sender: tx },
            Self {
                inner: ReceiverStream::new(rx),
            },
        )
    }

    /// A stream that yields exactly one chunk
    pub fn once(text: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity is one and the receiver is alive, so this cannot fail.
        let _ = tx.try_send(text.into());
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// Drain the stream and concatenate every chunk
    pub async fn collect_text(mut self) -> String {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk);
        }
        text
    }
}

impl Stream for TextStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Sender half for building a text stream
#[derive(Clone)]
pub struct TextStreamSender {
    sender: mpsc::Sender<String>,
}

impl TextStreamSender {
    /// Send a chunk; `false` means the consumer has gone away
    pub async fn send(&self, chunk: impl Into<String>) -> bool {
        self.sender.send(chunk.into()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_once_yields_single_chunk() {
        let chunks: Vec<String> = TextStream::once("hello").collect().await;
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_producer() {
        let (sender, stream) = TextStream::channel(1);
        let producer = tokio::spawn(async move {
            let mut sent = 0;
            while sender.send("x").await {
                sent += 1;
                if sent > 100 {
                    break;
                }
            }
            sent
        });

        let mut stream = stream;
        assert_eq!(stream.next().await.as_deref(), Some("x"));
        drop(stream);

        let sent = producer.await.unwrap();
        assert!(sent < 100);
    }

    #[tokio::test]
    async fn test_collect_text_concatenates() {
        let (sender, stream) = TextStream::channel(4);
        tokio::spawn(async move {
            sender.send("Hel").await;
            sender.send("lo").await;
        });
        assert_eq!(stream.collect_text().await, "Hello");
    }
}
