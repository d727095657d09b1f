use super::Bar;
use crate::errors::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::Duration;

/// Shared cancellation flag for a running engine loop.
///
/// Clones observe the same flag. The engine checks it at the bar-wait
/// suspension point, so a cancelled run seals after the bar in flight,
/// never in the middle of a tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where bars come from.
///
/// `Ok(None)` means the stream is over, either genuinely exhausted or
/// because the feed observed the cancellation token while waiting. The
/// engine re-reads the token to tell the two apart when sealing.
pub trait BarFeed {
    /// Blocks until the next bar is available, the stream ends, or
    /// cancellation is observed.
    fn next_bar(&mut self, cancel: &CancelToken) -> Result<Option<Bar>>;
}

/// Finite, pre-fetched historical feed over a shared immutable slice.
///
/// Backtests and optimizer trials all read through this; the underlying
/// `Arc<[Bar]>` is fetched once and never mutated, so any number of runs
/// can share it.
#[derive(Debug, Clone)]
pub struct SliceFeed {
    bars: Arc<[Bar]>,
    cursor: usize,
}

impl SliceFeed {
    /// Creates a feed over the given bars, starting at the first.
    pub fn new(bars: impl Into<Arc<[Bar]>>) -> Self {
        Self {
            bars: bars.into(),
            cursor: 0,
        }
    }

    /// Number of bars not yet emitted.
    pub fn remaining(&self) -> usize {
        self.bars.len().saturating_sub(self.cursor)
    }
}

impl BarFeed for SliceFeed {
    fn next_bar(&mut self, cancel: &CancelToken) -> Result<Option<Bar>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let bar = self.bars.get(self.cursor).cloned();
        if bar.is_some() {
            self.cursor += 1;
        }
        Ok(bar)
    }
}

/// Live/simulated feed over a blocking channel.
///
/// `next_bar` parks on the receiver in short slices so the cancellation
/// token stays observable while waiting; a disconnected sender ends the
/// stream.
#[derive(Debug)]
pub struct ChannelFeed {
    rx: Receiver<Bar>,
    poll: Duration,
}

impl ChannelFeed {
    /// Wraps an existing receiver.
    pub fn new(rx: Receiver<Bar>) -> Self {
        Self {
            rx,
            poll: Duration::from_millis(50),
        }
    }

    /// How often the wait loop re-checks the cancellation token.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Creates a connected `(sender, feed)` pair.
    ///
    /// ### Example
    /// ```rust
    /// use barloop::prelude::*;
    ///
    /// let (tx, mut feed) = ChannelFeed::channel();
    /// drop(tx);
    /// assert!(feed.next_bar(&CancelToken::new()).unwrap().is_none());
    /// ```
    pub fn channel() -> (Sender<Bar>, Self) {
        let (tx, rx) = channel();
        (tx, Self::new(rx))
    }
}

impl BarFeed for ChannelFeed {
    fn next_bar(&mut self, cancel: &CancelToken) -> Result<Option<Bar>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match self.rx.recv_timeout(self.poll) {
                Ok(bar) => return Ok(Some(bar)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
use super::BarBuilder;
#[cfg(test)]
use chrono::DateTime;

#[cfg(test)]
fn bar(minute: i64) -> Bar {
    BarBuilder::new()
        .open(100.0)
        .high(101.0)
        .low(99.0)
        .close(100.5)
        .volume(1.0)
        .open_time(DateTime::from_timestamp(minute * 60, 0).unwrap())
        .close_time(DateTime::from_timestamp(minute * 60 + 59, 0).unwrap())
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn slice_feed_yields_in_order_then_ends() {
    let cancel = CancelToken::new();
    let mut feed = SliceFeed::new(vec![bar(0), bar(1), bar(2)]);
    assert_eq!(feed.remaining(), 3);
    for minute in 0..3 {
        let next = feed.next_bar(&cancel).unwrap().unwrap();
        assert_eq!(next.open_time(), bar(minute).open_time());
    }
    assert!(feed.next_bar(&cancel).unwrap().is_none());
    assert_eq!(feed.remaining(), 0);
}

#[cfg(test)]
#[test]
fn slice_feed_observes_cancellation() {
    let cancel = CancelToken::new();
    let mut feed = SliceFeed::new(vec![bar(0), bar(1)]);
    assert!(feed.next_bar(&cancel).unwrap().is_some());
    cancel.cancel();
    assert!(feed.next_bar(&cancel).unwrap().is_none());
    assert_eq!(feed.remaining(), 1);
}

#[cfg(test)]
#[test]
fn channel_feed_delivers_then_ends_on_disconnect() {
    let cancel = CancelToken::new();
    let (tx, mut feed) = ChannelFeed::channel();
    tx.send(bar(0)).unwrap();
    tx.send(bar(1)).unwrap();
    drop(tx);
    assert_eq!(
        feed.next_bar(&cancel).unwrap().unwrap().open_time(),
        bar(0).open_time()
    );
    assert_eq!(
        feed.next_bar(&cancel).unwrap().unwrap().open_time(),
        bar(1).open_time()
    );
    assert!(feed.next_bar(&cancel).unwrap().is_none());
}

#[cfg(test)]
#[test]
fn channel_feed_unblocks_on_cancellation() {
    let cancel = CancelToken::new();
    let (_tx, mut feed) = ChannelFeed::channel();
    cancel.cancel();
    // Sender still alive and silent: only the token can end this wait.
    assert!(feed.next_bar(&cancel).unwrap().is_none());
}
