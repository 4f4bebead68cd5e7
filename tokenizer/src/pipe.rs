//! A bounded, backpressured byte pipe.
//!
//! Hand-rolled because no off-the-shelf primitive has the right shape:
//! `tokio::sync::mpsc` backpressures on item count, not on buffered byte
//! volume, and `tokio::io::duplex` has no watermark hysteresis at all. So
//! this is a `tokio::sync::Mutex` guarding the buffer plus a
//! `tokio::sync::Notify` waking whichever side is waiting.
//!
//! Producer side fills `write()`; once buffered bytes reach `high_watermark`
//! the write future pends until the consumer drains below `low_watermark`.
//! The consumer side reads with `read()`, which pends until at least one
//! byte is available or the pipe is closed.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
    aborted: bool,
}

/// Shared handle; cloning gives another reference to the same underlying
/// buffer, mirroring how a channel's `Sender`/`Receiver` pair share one
/// queue. In practice one clone is kept by the producer task and one by the
/// consumer task.
#[derive(Clone)]
pub struct Pipe {
    state: Arc<Mutex<PipeState>>,
    not_empty: Arc<Notify>,
    not_full: Arc<Notify>,
    high_watermark: usize,
    low_watermark: usize,
}

impl Pipe {
    /// `low_watermark` must be `<= high_watermark`; callers that violate
    /// this get a pipe that never resumes a waiting writer.
    pub fn new(high_watermark: usize, low_watermark: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PipeState { buf: VecDeque::new(), closed: false, aborted: false })),
            not_empty: Arc::new(Notify::new()),
            not_full: Arc::new(Notify::new()),
            high_watermark,
            low_watermark,
        }
    }

    pub fn with_default_watermarks() -> Self {
        Self::new(256 * 1024, 64 * 1024)
    }

    /// Appends `bytes`, pausing (without blocking the executor thread)
    /// while the buffer is at or above `high_watermark`.
    pub async fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        loop {
            {
                let mut state = self.state.lock().await;
                if state.aborted {
                    // Consumer is gone; discard so the producer unwinds
                    // instead of waiting on backpressure forever.
                    return;
                }
                if state.buf.len() < self.high_watermark || state.closed {
                    state.buf.extend(bytes.iter().copied());
                    drop(state);
                    self.not_empty.notify_waiters();
                    return;
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Drains up to `max_len` bytes. Returns an empty vec only once the
    /// pipe has been closed and fully drained (end of stream); otherwise
    /// pends until at least one byte is available.
    pub async fn read(&self, max_len: usize) -> Vec<u8> {
        loop {
            {
                let mut state = self.state.lock().await;
                if !state.buf.is_empty() {
                    let take = max_len.min(state.buf.len());
                    let out: Vec<u8> = state.buf.drain(..take).collect();
                    let resume = state.buf.len() <= self.low_watermark;
                    drop(state);
                    if resume {
                        self.not_full.notify_waiters();
                    }
                    return out;
                }
                if state.closed {
                    return Vec::new();
                }
            }
            self.not_empty.notified().await;
        }
    }

    /// Signals end-of-stream; any reader blocked on an empty buffer wakes
    /// and subsequently drains whatever is left, then sees `closed`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Tears the pipe down from the consumer side after a failure:
    /// subsequent writes are discarded and any producer parked on
    /// backpressure wakes immediately instead of waiting on a reader that
    /// is gone.
    pub async fn abort(&self) {
        let mut state = self.state.lock().await;
        state.aborted = true;
        state.closed = true;
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub async fn is_aborted(&self) -> bool {
        self.state.lock().await.aborted
    }

    pub async fn buffered_len(&self) -> usize {
        self.state.lock().await.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let pipe = Pipe::new(16, 4);
        pipe.write(b"hello").await;
        let got = pipe.read(1024).await;
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn read_blocks_until_data_then_until_close() {
        let pipe = Pipe::new(16, 4);
        let reader = pipe.clone();
        let handle = tokio::spawn(async move { reader.read(1024).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipe.write(b"x").await;
        let got = handle.await.unwrap();
        assert_eq!(got, b"x");

        let reader = pipe.clone();
        let handle = tokio::spawn(async move { reader.read(1024).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipe.close().await;
        let got = handle.await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn abort_unblocks_a_backpressured_writer() {
        let pipe = Pipe::new(4, 1);
        pipe.write(b"abcd").await;
        let writer = pipe.clone();
        let blocked = tokio::spawn(async move {
            writer.write(b"e").await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        pipe.abort().await;
        tokio::time::timeout(Duration::from_millis(200), blocked)
            .await
            .expect("writer should unwind once the pipe is aborted")
            .unwrap();
        assert!(pipe.is_aborted().await);
    }

    #[tokio::test]
    async fn write_pauses_above_high_watermark_and_resumes_below_low() {
        let pipe = Pipe::new(4, 1);
        pipe.write(b"abcd").await; // fills to high watermark
        let writer = pipe.clone();
        let blocked = tokio::spawn(async move {
            writer.write(b"e").await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        // Draining down to the low watermark should wake the writer.
        let _ = pipe.read(3).await;
        tokio::time::timeout(Duration::from_millis(200), blocked)
            .await
            .expect("writer should resume once below the low watermark")
            .unwrap();
    }
}
