//! Shared refill buffer for the SQL and JSON tokenizers.
//!
//! Owns the fixed-size character buffer, the read cursor, and the
//! borrow-vs-scratch bookkeeping: a token that fits the resident window is
//! served as a borrowed slice, and one that straddles a refill is promoted
//! silently into an owned scratch string. Both tokenizers drive it through
//! the same small set of primitives (`peek`, `bump`, `start_token`,
//! `finalize_raw_token`, `raw_str`) and layer their own grammar on top.

use std::io::Read;

pub struct RefillBuffer<R> {
    reader: R,
    buf: Vec<u8>,
    len: usize,
    pos: usize,
    token_start: usize,
    eof: bool,
    straddled: bool,
    scratch: String,
    consumed_before_buf: usize,
}

impl<R: Read> RefillBuffer<R> {
    pub fn new(reader: R, buffer_size: usize) -> Self {
        Self {
            reader,
            buf: vec![0u8; buffer_size.max(1)],
            len: 0,
            pos: 0,
            token_start: 0,
            eof: false,
            straddled: false,
            scratch: String::new(),
            consumed_before_buf: 0,
        }
    }

    pub fn error_position(&self) -> usize {
        self.consumed_before_buf + self.pos
    }

    pub fn peek(&mut self) -> Option<u8> {
        if self.pos >= self.len {
            self.refill();
        }
        self.buf.get(self.pos).copied()
    }

    pub fn peek_at(&mut self, offset: usize) -> Option<u8> {
        while self.pos + offset >= self.len && !self.eof {
            if self.len - self.pos >= self.buf.len() {
                // The unread window already fills the buffer; no refill
                // can bring the requested offset into view.
                return None;
            }
            self.refill();
        }
        self.buf.get(self.pos + offset).copied()
    }

    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    pub fn start_token(&mut self) {
        self.token_start = self.pos;
        self.straddled = false;
        self.scratch.clear();
    }

    /// Call once raw scanning for the current token is done. If a refill
    /// discarded part of the token along the way, folds the still-resident
    /// suffix into `scratch` so `raw_str()` always returns the complete
    /// token text afterwards.
    pub fn finalize_raw_token(&mut self) {
        if self.straddled {
            self.scratch.push_str(
                std::str::from_utf8(&self.buf[self.token_start..self.pos])
                    .expect("token bytes are valid utf8 by construction"),
            );
            self.token_start = self.pos;
        }
    }

    pub fn is_straddled(&self) -> bool {
        self.straddled
    }

    /// The complete raw text of the token since `start_token()`. Only
    /// accurate once `finalize_raw_token()` has been called for this token.
    pub fn raw_str(&self) -> &str {
        if self.straddled {
            &self.scratch
        } else {
            std::str::from_utf8(&self.buf[self.token_start..self.pos])
                .expect("token bytes are valid utf8 by construction")
        }
    }

    /// Replace the finalized value with a derived one (e.g. an unescaped
    /// string), forcing subsequent `raw_str()` calls to read from scratch.
    /// Re-anchors the token start so a refill triggered by lookahead (the
    /// JSON property-name peek) cannot fold raw token bytes back into the
    /// derived value.
    pub fn set_value(&mut self, value: String) {
        self.scratch = value;
        self.straddled = true;
        self.token_start = self.pos;
    }

    /// Moves the token anchor to the cursor without touching the scratch
    /// value. Lookahead that consumes trivia after `set_value` calls this
    /// per consumed byte, keeping refills from folding those bytes into
    /// the value.
    pub fn anchor(&mut self) {
        self.token_start = self.pos;
    }

    fn refill(&mut self) {
        if self.token_start < self.pos {
            self.scratch.push_str(
                std::str::from_utf8(&self.buf[self.token_start..self.pos])
                    .expect("token bytes are valid utf8 by construction"),
            );
            self.straddled = true;
        }
        self.consumed_before_buf += self.pos;
        let keep_len = self.len - self.pos;
        self.buf.copy_within(self.pos..self.len, 0);
        self.len = keep_len;
        self.pos = 0;
        self.token_start = 0;

        if self.eof {
            return;
        }
        let cap = self.buf.len();
        if self.len >= cap {
            return;
        }
        match self.reader.read(&mut self.buf[self.len..cap]) {
            Ok(0) => self.eof = true,
            Ok(n) => self.len += n,
            Err(_) => self.eof = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn peek_does_not_consume() {
        let mut b = RefillBuffer::new(Cursor::new(b"ab".to_vec()), 4);
        assert_eq!(b.peek(), Some(b'a'));
        assert_eq!(b.peek(), Some(b'a'));
        assert_eq!(b.bump(), Some(b'a'));
        assert_eq!(b.peek(), Some(b'b'));
    }

    #[test]
    fn straddle_is_transparent_through_tiny_buffer() {
        let mut b = RefillBuffer::new(Cursor::new(b"abcdefgh".to_vec()), 2);
        b.start_token();
        for _ in 0..8 {
            b.bump();
        }
        b.finalize_raw_token();
        assert_eq!(b.raw_str(), "abcdefgh");
        assert!(b.is_straddled());
    }

    #[test]
    fn no_straddle_when_token_fits() {
        let mut b = RefillBuffer::new(Cursor::new(b"ab".to_vec()), 16);
        b.start_token();
        b.bump();
        b.bump();
        b.finalize_raw_token();
        assert_eq!(b.raw_str(), "ab");
        assert!(!b.is_straddled());
    }
}
