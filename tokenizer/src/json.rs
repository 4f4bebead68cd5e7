//! Incremental JSON tokenizer, layered on the same
//! [`RefillBuffer`](crate::buffer::RefillBuffer) the SQL tokenizer uses.
//!
//! The one irregular rule is property-name detection: a closing `"` is
//! followed by a peek at the next non-whitespace character, and if it is
//! `:` the token is reclassified as `PropertyName` and the colon is
//! consumed along with it. Commas are likewise consumed as framing and
//! never surfaced, so callers see a clean sequence of values without a
//! lookahead token of their own.

use std::io::Read;

use tablewire_common::error::{Result, TableWireError};

use crate::buffer::RefillBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    PropertyName,
    String,
    NumberLong,
    NumberDouble,
    Boolean,
    Null,
    Eof,
}

pub struct JsonTokenizer<R> {
    buf: RefillBuffer<R>,
    kind: TokenKind,
    int_value: i64,
    double_value: f64,
    bool_value: bool,
}

impl<R: Read> JsonTokenizer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer_size(reader, crate::sql::DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(reader: R, buffer_size: usize) -> Self {
        Self {
            buf: RefillBuffer::new(reader, buffer_size),
            kind: TokenKind::Eof,
            int_value: 0,
            double_value: 0.0,
            bool_value: false,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn str_value(&self) -> &str {
        self.buf.raw_str()
    }

    pub fn int_value(&self) -> i64 {
        self.int_value
    }

    pub fn double_value(&self) -> f64 {
        self.double_value
    }

    pub fn bool_value(&self) -> bool {
        self.bool_value
    }

    fn err(&self, message: impl Into<String>) -> TableWireError {
        TableWireError::lex(self.buf.error_position(), message.into())
    }

    pub fn read(&mut self) -> Result<TokenKind> {
        self.skip_whitespace_and_commas();
        self.buf.start_token();

        let Some(b) = self.buf.peek() else {
            self.kind = TokenKind::Eof;
            return Ok(self.kind);
        };

        self.kind = match b {
            b'{' => { self.buf.bump(); TokenKind::StartObject }
            b'}' => { self.buf.bump(); TokenKind::EndObject }
            b'[' => { self.buf.bump(); TokenKind::StartArray }
            b']' => { self.buf.bump(); TokenKind::EndArray }
            b'"' => self.read_string()?,
            b't' | b'f' => self.read_boolean()?,
            b'n' => self.read_null()?,
            b'-' | b'0'..=b'9' => self.read_number()?,
            _ => return Err(self.err(format!("unexpected character {:?}", b as char))),
        };
        Ok(self.kind)
    }

    fn skip_whitespace_and_commas(&mut self) {
        loop {
            match self.buf.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b',') => {
                    self.buf.bump();
                }
                _ => break,
            }
        }
    }

    fn read_string(&mut self) -> Result<TokenKind> {
        self.buf.bump(); // opening quote
        let mut out = String::new();
        let mut raw = Vec::new();
        loop {
            match self.buf.bump() {
                None => return Err(self.err("unterminated string literal")),
                Some(b'"') => break,
                Some(b'\\') => {
                    if !raw.is_empty() {
                        out.push_str(
                            std::str::from_utf8(&raw)
                                .map_err(|_| self.err("invalid utf-8 in string literal"))?,
                        );
                        raw.clear();
                    }
                    let escaped = self.buf.bump().ok_or_else(|| self.err("unterminated escape"))?;
                    match escaped {
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'/' => out.push('/'),
                        b'b' => out.push('\u{8}'),
                        b'f' => out.push('\u{c}'),
                        b'n' => out.push('\n'),
                        b'r' => out.push('\r'),
                        b't' => out.push('\t'),
                        b'u' => {
                            let mut code = 0u32;
                            for _ in 0..4 {
                                let d = self.buf.bump().ok_or_else(|| self.err("unterminated \\u escape"))?;
                                let v = (d as char)
                                    .to_digit(16)
                                    .ok_or_else(|| self.err("invalid \\u escape digit"))?;
                                code = code * 16 + v;
                            }
                            out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                        }
                        other => return Err(self.err(format!("invalid escape `\\{}`", other as char))),
                    }
                }
                Some(byte) => raw.push(byte),
            }
        }
        if !raw.is_empty() {
            out.push_str(
                std::str::from_utf8(&raw).map_err(|_| self.err("invalid utf-8 in string literal"))?,
            );
        }
        self.buf.set_value(out);

        // Property-name lookahead: bump past trailing whitespace to the
        // `:`. Consumed whitespace is trivia either way; the anchor moves
        // with every bump so a refill here can't fold lookahead bytes into
        // the just-built value.
        loop {
            match self.buf.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
                    self.buf.bump();
                    self.buf.anchor();
                }
                Some(b':') => {
                    self.buf.bump();
                    self.buf.anchor();
                    return Ok(TokenKind::PropertyName);
                }
                _ => return Ok(TokenKind::String),
            }
        }
    }

    fn read_boolean(&mut self) -> Result<TokenKind> {
        let word = if self.buf.peek() == Some(b't') { "true" } else { "false" };
        for expected in word.bytes() {
            match self.buf.bump() {
                Some(b) if b == expected => {}
                _ => return Err(self.err(format!("invalid literal, expected `{word}`"))),
            }
        }
        self.bool_value = word == "true";
        Ok(TokenKind::Boolean)
    }

    fn read_null(&mut self) -> Result<TokenKind> {
        for expected in b"null" {
            match self.buf.bump() {
                Some(b) if b == *expected => {}
                _ => return Err(self.err("invalid literal, expected `null`")),
            }
        }
        Ok(TokenKind::Null)
    }

    fn read_number(&mut self) -> Result<TokenKind> {
        let mut is_float = false;
        if self.buf.peek() == Some(b'-') {
            self.buf.bump();
        }
        match self.buf.peek() {
            Some(b'0') => {
                self.buf.bump();
            }
            Some(b'1'..=b'9') => {
                while matches!(self.buf.peek(), Some(b'0'..=b'9')) {
                    self.buf.bump();
                }
            }
            _ => return Err(self.err("invalid number literal")),
        }
        if self.buf.peek() == Some(b'.') {
            is_float = true;
            self.buf.bump();
            if !matches!(self.buf.peek(), Some(b'0'..=b'9')) {
                return Err(self.err("expected digit after decimal point"));
            }
            while matches!(self.buf.peek(), Some(b'0'..=b'9')) {
                self.buf.bump();
            }
        }
        if matches!(self.buf.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.buf.bump();
            if matches!(self.buf.peek(), Some(b'+') | Some(b'-')) {
                self.buf.bump();
            }
            if !matches!(self.buf.peek(), Some(b'0'..=b'9')) {
                return Err(self.err("expected digit in exponent"));
            }
            while matches!(self.buf.peek(), Some(b'0'..=b'9')) {
                self.buf.bump();
            }
        }
        self.buf.finalize_raw_token();
        let text = self.buf.raw_str();
        if is_float {
            self.double_value = text
                .parse()
                .map_err(|_| self.err(format!("invalid number literal `{text}`")))?;
            Ok(TokenKind::NumberDouble)
        } else {
            self.int_value = text
                .parse()
                .map_err(|_| self.err(format!("invalid number literal `{text}`")))?;
            Ok(TokenKind::NumberLong)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tok(input: &str) -> JsonTokenizer<Cursor<Vec<u8>>> {
        JsonTokenizer::new(Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn structural_tokens() {
        let mut t = tok("{}[]");
        assert_eq!(t.read().unwrap(), TokenKind::StartObject);
        assert_eq!(t.read().unwrap(), TokenKind::EndObject);
        assert_eq!(t.read().unwrap(), TokenKind::StartArray);
        assert_eq!(t.read().unwrap(), TokenKind::EndArray);
        assert_eq!(t.read().unwrap(), TokenKind::Eof);
    }

    #[test]
    fn property_name_vs_plain_string() {
        let mut t = tok(r#"{"name" : "value"}"#);
        assert_eq!(t.read().unwrap(), TokenKind::StartObject);
        assert_eq!(t.read().unwrap(), TokenKind::PropertyName);
        assert_eq!(t.str_value(), "name");
        assert_eq!(t.read().unwrap(), TokenKind::String);
        assert_eq!(t.str_value(), "value");
        assert_eq!(t.read().unwrap(), TokenKind::EndObject);
    }

    #[test]
    fn commas_are_transparent() {
        let mut t = tok(r#"["a","b", "c"]"#);
        assert_eq!(t.read().unwrap(), TokenKind::StartArray);
        assert_eq!(t.read().unwrap(), TokenKind::String);
        assert_eq!(t.str_value(), "a");
        assert_eq!(t.read().unwrap(), TokenKind::String);
        assert_eq!(t.str_value(), "b");
        assert_eq!(t.read().unwrap(), TokenKind::String);
        assert_eq!(t.str_value(), "c");
        assert_eq!(t.read().unwrap(), TokenKind::EndArray);
    }

    #[test]
    fn number_long_vs_double() {
        let mut t = tok("42 -7 3.14 2e10 -1.5e-3");
        assert_eq!(t.read().unwrap(), TokenKind::NumberLong);
        assert_eq!(t.int_value(), 42);
        assert_eq!(t.read().unwrap(), TokenKind::NumberLong);
        assert_eq!(t.int_value(), -7);
        assert_eq!(t.read().unwrap(), TokenKind::NumberDouble);
        assert_eq!(t.double_value(), 3.14);
        assert_eq!(t.read().unwrap(), TokenKind::NumberDouble);
        assert_eq!(t.double_value(), 2e10);
        assert_eq!(t.read().unwrap(), TokenKind::NumberDouble);
        assert_eq!(t.double_value(), -1.5e-3);
    }

    #[test]
    fn boolean_and_null_literals() {
        let mut t = tok("true false null");
        assert_eq!(t.read().unwrap(), TokenKind::Boolean);
        assert!(t.bool_value());
        assert_eq!(t.read().unwrap(), TokenKind::Boolean);
        assert!(!t.bool_value());
        assert_eq!(t.read().unwrap(), TokenKind::Null);
    }

    #[test]
    fn standard_escapes_and_unicode_escape() {
        let mut t = tok(r#""line\nbreak\tandé""#);
        assert_eq!(t.read().unwrap(), TokenKind::String);
        assert_eq!(t.str_value(), "line\nbreak\tand\u{e9}");
    }

    #[test]
    fn invalid_escape_is_an_error() {
        let mut t = tok(r#""bad\qescape""#);
        assert!(t.read().is_err());
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut t = tok(r#""abc"#);
        assert!(t.read().is_err());
    }

    #[test]
    fn property_name_lookahead_survives_a_refill_at_the_quote() {
        // Buffer sized so the refill lands between the closing quote and
        // the colon; the property name must come through untouched.
        for buffer_size in 2..12 {
            let mut t = JsonTokenizer::with_buffer_size(
                Cursor::new(br#"{"name" : "value"}"#.to_vec()),
                buffer_size,
            );
            assert_eq!(t.read().unwrap(), TokenKind::StartObject);
            assert_eq!(t.read().unwrap(), TokenKind::PropertyName);
            assert_eq!(t.str_value(), "name", "buffer size {buffer_size}");
            assert_eq!(t.read().unwrap(), TokenKind::String);
            assert_eq!(t.str_value(), "value");
        }
    }

    #[test]
    fn tiny_buffer_straddles_a_long_string() {
        let mut t = JsonTokenizer::with_buffer_size(
            Cursor::new(br#""this json string value is longer than the buffer""#.to_vec()),
            6,
        );
        assert_eq!(t.read().unwrap(), TokenKind::String);
        assert_eq!(t.str_value(), "this json string value is longer than the buffer");
    }
}
