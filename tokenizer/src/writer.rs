//! A buffered character-level writer sitting over a [`Pipe`]. Every
//! dumper/importer cell encoder in `tablewire-pipeline` funnels its output
//! through one of these instead of writing to the pipe directly.

use chrono::NaiveDateTime;

use crate::pipe::Pipe;

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

pub struct PipeTextWriter {
    pipe: Pipe,
    buf: String,
    capacity: usize,
    /// The still-running task of the last soft flush, if any.
    in_flight: Option<tokio::task::JoinHandle<()>>,
}

impl PipeTextWriter {
    pub fn new(pipe: Pipe) -> Self {
        Self::with_capacity(pipe, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(pipe: Pipe, capacity: usize) -> Self {
        Self { pipe, buf: String::with_capacity(capacity), capacity: capacity.max(1), in_flight: None }
    }

    pub fn pipe(&self) -> &Pipe {
        &self.pipe
    }

    pub async fn write(&mut self, text: &str) {
        if text.len() > self.capacity {
            self.flush(false).await;
            self.pipe.write(text.as_bytes()).await;
            return;
        }
        if self.buf.len() + text.len() > self.capacity {
            self.flush(false).await;
        }
        self.buf.push_str(text);
    }

    pub async fn write_integer(&mut self, value: i64) {
        self.write(&value.to_string()).await;
    }

    pub async fn write_float(&mut self, value: f64) {
        self.write(&value.to_string()).await;
    }

    pub async fn write_datetime(&mut self, value: &NaiveDateTime, format: &str) {
        self.write(&value.format(format).to_string()).await;
    }

    pub async fn write_hex(&mut self, bytes: &[u8]) {
        // hex::encode allocates the whole string up front; fine here since
        // callers stream one cell's worth of bytes at a time, not a table.
        self.write(&hex::encode(bytes)).await;
    }

    pub async fn write_base64(&mut self, bytes: &[u8]) {
        use base64::Engine;
        self.write(&base64::engine::general_purpose::STANDARD.encode(bytes)).await;
    }

    /// Renders one CSV cell's contents with MySQL's `LOAD DATA`-compatible
    /// escaping when `mysql_mode` is set (`\`-escapes control characters and
    /// the field/line delimiters instead of doubling quotes), or RFC 4180
    /// quote-doubling otherwise.
    pub async fn write_csv_cell(&mut self, text: &str, mysql_mode: bool) {
        if mysql_mode {
            let mut escaped = String::with_capacity(text.len());
            for c in text.chars() {
                match c {
                    '\\' => escaped.push_str("\\\\"),
                    // A bare quote would read as a field enclosure to the
                    // bulk loader, swallowing terminators as data.
                    '"' => escaped.push_str("\\\""),
                    ',' => escaped.push_str("\\,"),
                    '\n' => escaped.push_str("\\n"),
                    '\r' => escaped.push_str("\\r"),
                    '\t' => escaped.push_str("\\t"),
                    '\0' => escaped.push_str("\\0"),
                    other => escaped.push(other),
                }
            }
            self.write(&escaped).await;
        } else {
            let needs_quoting = text.contains(['"', ',', '\n', '\r']);
            if !needs_quoting {
                self.write(text).await;
                return;
            }
            let mut quoted = String::with_capacity(text.len() + 2);
            quoted.push('"');
            for c in text.chars() {
                if c == '"' {
                    quoted.push('"');
                }
                quoted.push(c);
            }
            quoted.push('"');
            self.write(&quoted).await;
        }
    }

    /// `soft` returns as soon as the buffered bytes are handed to a
    /// background task, without waiting for the pipe's backpressure to
    /// clear; callers that pass `soft=true` must eventually call
    /// `flush(false)`, which drains any in-flight soft flush first so
    /// bytes always land on the pipe in write order.
    pub async fn flush(&mut self, soft: bool) {
        if !soft {
            if let Some(prior) = self.in_flight.take() {
                let _ = prior.await;
            }
        }
        if self.buf.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.buf).into_bytes();
        self.buf = String::with_capacity(self.capacity);
        if soft {
            let pipe = self.pipe.clone();
            let prior = self.in_flight.take();
            self.in_flight = Some(tokio::spawn(async move {
                if let Some(prior) = prior {
                    let _ = prior.await;
                }
                pipe.write(&bytes).await;
            }));
        } else {
            self.pipe.write(&bytes).await;
        }
    }

    /// Whether the last soft flush has fully drained onto the pipe. The
    /// bulk-load producer only hands a pipe another batch once this
    /// reports true.
    pub fn flush_completed(&self) -> bool {
        self.in_flight.as_ref().map_or(true, |task| task.is_finished())
    }

    pub async fn close(mut self) {
        self.flush(false).await;
        self.pipe.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_writes_are_buffered_until_flush() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::with_capacity(pipe.clone(), 64);
        w.write("hello ").await;
        w.write("world").await;
        assert_eq!(pipe.buffered_len().await, 0);
        w.flush(false).await;
        let got = pipe.read(1024).await;
        assert_eq!(got, b"hello world");
    }

    #[tokio::test]
    async fn oversized_write_flushes_then_bypasses_buffer() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::with_capacity(pipe.clone(), 8);
        w.write("abc").await;
        w.write("this single write is longer than the buffer capacity").await;
        w.flush(false).await;
        let got = pipe.read(4096).await;
        assert_eq!(
            String::from_utf8(got).unwrap(),
            "abcthis single write is longer than the buffer capacity"
        );
    }

    #[tokio::test]
    async fn hex_and_base64_primitives() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::new(pipe.clone());
        w.write_hex(&[0xDE, 0xAD, 0xBE, 0xEF]).await;
        w.flush(false).await;
        assert_eq!(pipe.read(1024).await, b"deadbeef");

        let mut w = PipeTextWriter::new(pipe.clone());
        w.write_base64(b"hello").await;
        w.flush(false).await;
        assert_eq!(pipe.read(1024).await, b"aGVsbG8=");
    }

    #[tokio::test]
    async fn csv_cell_mysql_mode_escapes_control_characters() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::new(pipe.clone());
        w.write_csv_cell("a,b\nc", true).await;
        w.flush(false).await;
        assert_eq!(pipe.read(1024).await, b"a\\,b\\nc");
    }

    #[tokio::test]
    async fn csv_cell_mysql_mode_escapes_embedded_quotes() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::new(pipe.clone());
        w.write_csv_cell("\"quoted\" start", true).await;
        w.flush(false).await;
        assert_eq!(pipe.read(1024).await, b"\\\"quoted\\\" start");
    }

    #[tokio::test]
    async fn csv_cell_rfc4180_mode_quotes_and_doubles() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::new(pipe.clone());
        w.write_csv_cell("a,\"b\"", false).await;
        w.flush(false).await;
        assert_eq!(pipe.read(1024).await, b"\"a,\"\"b\"\"\"");
    }

    #[tokio::test]
    async fn soft_flush_lands_before_a_later_hard_flush() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::with_capacity(pipe.clone(), 64);
        w.write("first ").await;
        w.flush(true).await;
        w.write("second").await;
        w.flush(false).await;
        assert!(w.flush_completed());
        assert_eq!(pipe.read(1024).await, b"first second");
    }

    #[tokio::test]
    async fn flush_preserves_write_order_across_calls() {
        let pipe = Pipe::new(4096, 1024);
        let mut w = PipeTextWriter::with_capacity(pipe.clone(), 4);
        for word in ["one ", "two ", "three"] {
            w.write(word).await;
        }
        w.flush(false).await;
        assert_eq!(pipe.read(1024).await, b"one two three");
    }
}
