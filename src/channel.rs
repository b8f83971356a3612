//! Ordered single-producer, single-consumer event pipe
//!
//! Unbounded so the producer never waits on a slow consumer. The end of a run
//! is an explicit `StreamItem::End` value; a receiver that sees the channel
//! close without it knows the producer was abandoned mid-stream.

use crate::events::{StreamEvent, StreamItem};
use futures::Stream;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Stream of channel items, ending after `StreamItem::End`
pub type EventStream = Pin<Box<dyn Stream<Item = StreamItem> + Send>>;

/// Create a connected sender/receiver pair
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            tx,
            consumer_gone: false,
        },
        EventReceiver { rx, done: false },
    )
}

/// Producing half. Owned by exactly one run.
#[derive(Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<StreamItem>,
    consumer_gone: bool,
}

impl EventSender {
    /// Queue an event. A consumer that has gone away does not stop the run;
    /// the event is dropped and the first such drop is logged.
    pub fn send(&mut self, event: StreamEvent) {
        if self.tx.send(StreamItem::Event(event)).is_err() && !self.consumer_gone {
            self.consumer_gone = true;
            tracing::debug!("Event consumer disconnected; run continues without delivery");
        }
    }

    /// Emit the terminal sentinel. Consumes the sender so nothing can follow it.
    pub fn finish(self) {
        let _ = self.tx.send(StreamItem::End);
    }
}

/// How a `recv` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Event(StreamEvent),
    /// Terminal sentinel: the run ended and nothing else will arrive
    End,
    /// The producer went away without sending the sentinel
    Abandoned,
}

/// Consuming half
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<StreamItem>,
    done: bool,
}

impl EventReceiver {
    /// Wait for the next item
    pub async fn recv(&mut self) -> Received {
        if self.done {
            return Received::End;
        }
        match self.rx.recv().await {
            Some(StreamItem::Event(event)) => Received::Event(event),
            Some(StreamItem::End) => {
                self.done = true;
                Received::End
            }
            None => Received::Abandoned,
        }
    }

    /// Drain everything up to and including the sentinel
    pub async fn collect(mut self) -> (Vec<StreamEvent>, bool) {
        let mut events = Vec::new();
        loop {
            match self.recv().await {
                Received::Event(event) => events.push(event),
                Received::End => return (events, true),
                Received::Abandoned => return (events, false),
            }
        }
    }

    /// Adapt into a `Stream` that yields the sentinel as its last item
    pub fn into_stream(self) -> EventStream {
        Box::pin(futures::stream::unfold(self, |mut rx| async move {
            if rx.done {
                return None;
            }
            match rx.rx.recv().await {
                Some(item) => {
                    if item.is_end() {
                        rx.done = true;
                    }
                    Some((item, rx))
                }
                None => None,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_fifo_order_and_sentinel() {
        let (mut tx, mut rx) = event_channel();
        tokio::spawn(async move {
            for i in 0..50 {
                tx.send(StreamEvent::log(format!("event {}", i)));
                tokio::task::yield_now().await;
            }
            tx.finish();
        });

        for i in 0..50 {
            assert_eq!(rx.recv().await, Received::Event(StreamEvent::log(format!("event {}", i))));
        }
        assert_eq!(rx.recv().await, Received::End);
        assert_eq!(rx.recv().await, Received::End);
    }

    #[tokio::test]
    async fn test_dropped_producer_is_abandoned() {
        let (mut tx, rx) = event_channel();
        tx.send(StreamEvent::log("started"));
        drop(tx);

        let (events, finished) = rx.collect().await;
        assert_eq!(events.len(), 1);
        assert!(!finished);
    }

    #[tokio::test]
    async fn test_send_after_consumer_drop_does_not_panic() {
        let (mut tx, rx) = event_channel();
        drop(rx);
        tx.send(StreamEvent::log("nobody listening"));
        tx.send(StreamEvent::log("still nobody"));
        assert!(tx.consumer_gone);
        tx.finish();
    }

    #[tokio::test]
    async fn test_stream_ends_with_sentinel() {
        let (mut tx, rx) = event_channel();
        tx.send(StreamEvent::log("a"));
        tx.finish();

        let items: Vec<StreamItem> = rx.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items.last().unwrap().is_end());
    }
}
