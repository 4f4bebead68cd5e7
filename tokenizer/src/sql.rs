//! Incremental SQL tokenizer.
//!
//! Reads from any `std::io::Read` rather than `tokio::io::AsyncRead` even
//! though the surrounding workspace is tokio-based: the importer that owns
//! one of these per table is the only reader, and keeping the hot loop
//! synchronous keeps the executor out of per-character work.

use std::io::{self, Read};

use tablewire_common::error::{Result, TableWireError};

use crate::buffer::RefillBuffer;

pub const DEFAULT_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Comma,
    Semicolon,
    LeftParen,
    RightParen,
    Equals,
    Str,
    Integer,
    Double,
    Null,
    BinaryBlob,
    Identifier,
    Eof,
}

/// Incremental lexer over a fixed-size character buffer. Value accessors
/// (`str_value`, `int_value`, `double_value`) borrow from the buffer when
/// the token didn't straddle a refill, and fall back to an owned scratch
/// string when it did; either way a value stays valid only until the next
/// `read()`.
pub struct SqlTokenizer<R> {
    buf: RefillBuffer<R>,
    kind: TokenKind,
    identifier_escaped: bool,
    int_value: i64,
    double_value: f64,
}

impl<R: Read> SqlTokenizer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer_size(reader, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(reader: R, buffer_size: usize) -> Self {
        Self {
            buf: RefillBuffer::new(reader, buffer_size),
            kind: TokenKind::Eof,
            identifier_escaped: false,
            int_value: 0,
            double_value: 0.0,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn identifier_was_escaped(&self) -> bool {
        self.identifier_escaped
    }

    pub fn int_value(&self) -> i64 {
        self.int_value
    }

    pub fn double_value(&self) -> f64 {
        self.double_value
    }

    /// Valid after `Str`, `Identifier`, or `BinaryBlob` tokens. For
    /// `BinaryBlob` this returns the raw hex digits, without prefix/quotes.
    pub fn str_value(&self) -> &str {
        self.buf.raw_str()
    }

    fn err(&self, message: impl Into<String>) -> TableWireError {
        TableWireError::lex(self.buf.error_position(), message.into())
    }

    pub fn read(&mut self) -> Result<TokenKind> {
        self.skip_trivia()?;
        self.buf.start_token();

        let Some(b) = self.buf.peek() else {
            self.kind = TokenKind::Eof;
            return Ok(self.kind);
        };

        self.kind = match b {
            b',' => { self.buf.bump(); TokenKind::Comma }
            b';' => { self.buf.bump(); TokenKind::Semicolon }
            b'(' => { self.buf.bump(); TokenKind::LeftParen }
            b')' => { self.buf.bump(); TokenKind::RightParen }
            b'=' => { self.buf.bump(); TokenKind::Equals }
            b'\'' => { self.read_string()?; TokenKind::Str }
            b'`' => { self.read_backtick_identifier()?; TokenKind::Identifier }
            b'X' | b'x' if self.buf.peek_at(1) == Some(b'\'') => { self.read_hex_blob()?; TokenKind::BinaryBlob }
            b'0'..=b'9' => self.read_number()?,
            b'-' if matches!(self.buf.peek_at(1), Some(b'0'..=b'9')) => self.read_number()?,
            b'_' if self.looks_like_binary_literal() => self.read_underscore_binary()?,
            c if is_ident_start(c) => self.read_unquoted_identifier()?,
            _ => return Err(self.err(format!("unexpected character {:?}", b as char))),
        };
        Ok(self.kind)
    }

    fn looks_like_binary_literal(&mut self) -> bool {
        // `_binary` is always followed by whitespace then `0x...` or `''`.
        for (i, expect) in b"_binary".iter().enumerate() {
            match self.buf.peek_at(i) {
                Some(c) if c.eq_ignore_ascii_case(expect) => continue,
                _ => return false,
            }
        }
        true
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.buf.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
                    self.buf.bump();
                }
                // Single-character operators only ever occur inside skipped
                // routine bodies, never in a parsed position. `$` rides
                // along for the `$$` DELIMITER markers those bodies use.
                Some(b'+') | Some(b'*') | Some(b'<') | Some(b'>') | Some(b'$') => {
                    self.buf.bump();
                }
                Some(b'/') if self.buf.peek_at(1) == Some(b'*') => {
                    self.buf.bump();
                    self.buf.bump();
                    loop {
                        match self.buf.bump() {
                            None => return Err(self.err("unterminated block comment")),
                            Some(b'*') if self.buf.peek() == Some(b'/') => {
                                self.buf.bump();
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                Some(b'-') if self.buf.peek_at(1) == Some(b'-') => {
                    self.buf.bump();
                    self.buf.bump();
                    while !matches!(self.buf.peek(), None | Some(b'\n')) {
                        self.buf.bump();
                    }
                }
                // A bare minus is an operator too; one glued to a digit is
                // the sign of a number literal and stays for `read()`.
                Some(b'-') if !matches!(self.buf.peek_at(1), Some(b'0'..=b'9')) => {
                    self.buf.bump();
                }
                Some(b'/') if self.buf.peek_at(1) != Some(b'*') => {
                    self.buf.bump();
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_string(&mut self) -> Result<()> {
        self.buf.bump(); // opening '
        loop {
            match self.buf.bump() {
                None => return Err(self.err("unterminated string literal")),
                Some(b'\'') => {
                    if self.buf.peek() == Some(b'\'') {
                        self.buf.bump();
                        continue;
                    }
                    break;
                }
                Some(b'\\') => {
                    self.buf.bump();
                }
                _ => {}
            }
        }
        self.buf.finalize_raw_token();
        let raw = self.buf.raw_str();
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' && chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
            } else if c == '\\' {
                match chars.next() {
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('0') => out.push('\0'),
                    Some(other) => out.push(other),
                    None => {}
                }
            } else {
                out.push(c);
            }
        }
        self.buf.set_value(out);
        Ok(())
    }

    fn read_backtick_identifier(&mut self) -> Result<()> {
        self.buf.bump(); // opening `
        loop {
            match self.buf.bump() {
                None => return Err(self.err("unterminated identifier")),
                Some(b'`') => break,
                _ => {}
            }
        }
        self.identifier_escaped = true;
        self.buf.finalize_raw_token();
        let raw = self.buf.raw_str();
        let stripped = raw[1..raw.len() - 1].to_string();
        self.buf.set_value(stripped);
        Ok(())
    }

    fn read_unquoted_identifier(&mut self) -> Result<TokenKind> {
        self.identifier_escaped = false;
        self.buf.bump();
        while matches!(self.buf.peek(), Some(c) if is_ident_continue(c)) {
            self.buf.bump();
        }
        self.buf.finalize_raw_token();
        if self.buf.raw_str().eq_ignore_ascii_case("NULL") {
            Ok(TokenKind::Null)
        } else {
            Ok(TokenKind::Identifier)
        }
    }

    fn read_number(&mut self) -> Result<TokenKind> {
        let mut is_float = false;
        if self.buf.peek() == Some(b'-') {
            self.buf.bump();
        }
        while matches!(self.buf.peek(), Some(b'0'..=b'9')) {
            self.buf.bump();
        }
        if self.buf.peek() == Some(b'.') && matches!(self.buf.peek_at(1), Some(b'0'..=b'9')) {
            is_float = true;
            self.buf.bump();
            while matches!(self.buf.peek(), Some(b'0'..=b'9')) {
                self.buf.bump();
            }
        }
        if matches!(self.buf.peek(), Some(b'e') | Some(b'E')) {
            let mut lookahead = 1;
            if matches!(self.buf.peek_at(lookahead), Some(b'+') | Some(b'-')) {
                lookahead += 1;
            }
            if matches!(self.buf.peek_at(lookahead), Some(b'0'..=b'9')) {
                is_float = true;
                self.buf.bump();
                if matches!(self.buf.peek(), Some(b'+') | Some(b'-')) {
                    self.buf.bump();
                }
                while matches!(self.buf.peek(), Some(b'0'..=b'9')) {
                    self.buf.bump();
                }
            }
        }
        self.buf.finalize_raw_token();
        let text = self.buf.raw_str();
        if is_float {
            self.double_value = text
                .parse()
                .map_err(|_| self.err(format!("invalid number literal `{text}`")))?;
            Ok(TokenKind::Double)
        } else {
            self.int_value = text
                .parse()
                .map_err(|_| self.err(format!("invalid integer literal `{text}`")))?;
            Ok(TokenKind::Integer)
        }
    }

    /// `X'HEX'` / `x'HEX'`.
    fn read_hex_blob(&mut self) -> Result<()> {
        self.buf.bump(); // X/x
        self.buf.bump(); // '
        let mut hex_len = 0usize;
        loop {
            match self.buf.peek() {
                Some(b'\'') => break,
                Some(c) if c.is_ascii_hexdigit() => {
                    self.buf.bump();
                    hex_len += 1;
                }
                _ => return Err(self.err("invalid hex digit in X'...' literal")),
            }
        }
        if hex_len % 2 != 0 {
            return Err(self.err("odd number of hex digits in X'...' literal"));
        }
        self.buf.bump(); // closing '
        self.buf.finalize_raw_token();
        let raw = self.buf.raw_str();
        let inner_start = raw.find('\'').map(|i| i + 1).unwrap_or(0);
        let inner_end = raw.rfind('\'').unwrap_or(raw.len());
        let hex = raw[inner_start..inner_end].to_string();
        self.buf.set_value(hex);
        Ok(())
    }

    /// `_binary 0xHEX` or `_binary ''`.
    fn read_underscore_binary(&mut self) -> Result<TokenKind> {
        for _ in 0.."_binary".len() {
            self.buf.bump();
        }
        while matches!(self.buf.peek(), Some(b' ') | Some(b'\t')) {
            self.buf.bump();
        }
        match self.buf.peek() {
            Some(b'\'') => {
                self.buf.bump();
                if self.buf.peek() != Some(b'\'') {
                    return Err(self.err("expected empty string after _binary"));
                }
                self.buf.bump();
                self.buf.finalize_raw_token();
                self.buf.set_value(String::new());
                Ok(TokenKind::BinaryBlob)
            }
            Some(b'0') if matches!(self.buf.peek_at(1), Some(b'x') | Some(b'X')) => {
                self.buf.bump();
                self.buf.bump();
                while matches!(self.buf.peek(), Some(c) if c.is_ascii_hexdigit()) {
                    self.buf.bump();
                }
                self.buf.finalize_raw_token();
                let raw = self.buf.raw_str();
                let after_x = raw.rfind('x').or_else(|| raw.rfind('X')).map(|i| i + 1).unwrap_or(0);
                let hex = raw[after_x..].to_string();
                if hex.len() % 2 != 0 {
                    return Err(self.err("odd number of hex digits after _binary 0x"));
                }
                self.buf.set_value(hex);
                Ok(TokenKind::BinaryBlob)
            }
            _ => Err(self.err("expected 0x or '' after _binary")),
        }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'@'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'.' | b'"' | b'@')
}

/// Decode the hex digits produced by a `BinaryBlob` token's `str_value()`
/// into the raw bytes they represent.
pub fn decode_hex_blob(hex: &str) -> Result<Vec<u8>> {
    hex::decode(hex).map_err(|e| TableWireError::lex(0, format!("invalid binary blob hex: {e}")))
}

pub fn tokenizer_from_bytes(bytes: Vec<u8>) -> SqlTokenizer<io::Cursor<Vec<u8>>> {
    SqlTokenizer::new(io::Cursor::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(input: &str) -> SqlTokenizer<io::Cursor<Vec<u8>>> {
        SqlTokenizer::new(io::Cursor::new(input.as_bytes().to_vec()))
    }

    fn tok_with_buffer(input: &str, buffer_size: usize) -> SqlTokenizer<io::Cursor<Vec<u8>>> {
        SqlTokenizer::with_buffer_size(io::Cursor::new(input.as_bytes().to_vec()), buffer_size)
    }

    #[test]
    fn punctuation_tokens() {
        let mut t = tok(",;()=");
        assert_eq!(t.read().unwrap(), TokenKind::Comma);
        assert_eq!(t.read().unwrap(), TokenKind::Semicolon);
        assert_eq!(t.read().unwrap(), TokenKind::LeftParen);
        assert_eq!(t.read().unwrap(), TokenKind::RightParen);
        assert_eq!(t.read().unwrap(), TokenKind::Equals);
        assert_eq!(t.read().unwrap(), TokenKind::Eof);
    }

    #[test]
    fn string_with_doubled_quote_escape() {
        let mut t = tok("'it''s'");
        assert_eq!(t.read().unwrap(), TokenKind::Str);
        assert_eq!(t.str_value(), "it's");
    }

    #[test]
    fn string_with_backslash_escapes() {
        let mut t = tok(r"'a\nb\tc\\d'");
        assert_eq!(t.read().unwrap(), TokenKind::Str);
        assert_eq!(t.str_value(), "a\nb\tc\\d");
    }

    #[test]
    fn backtick_identifier_sets_escaped_flag() {
        let mut t = tok("`order`");
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.str_value(), "order");
        assert!(t.identifier_was_escaped());
    }

    #[test]
    fn unquoted_identifier_not_escaped() {
        let mut t = tok("orders");
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.str_value(), "orders");
        assert!(!t.identifier_was_escaped());
    }

    #[test]
    fn null_literal_only_when_unquoted() {
        let mut t = tok("null `null`");
        assert_eq!(t.read().unwrap(), TokenKind::Null);
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.str_value(), "null");
    }

    #[test]
    fn integer_and_double_literals() {
        let mut t = tok("-42 3.14 2e10 -1.5e-3");
        assert_eq!(t.read().unwrap(), TokenKind::Integer);
        assert_eq!(t.int_value(), -42);
        assert_eq!(t.read().unwrap(), TokenKind::Double);
        assert_eq!(t.double_value(), 3.14);
        assert_eq!(t.read().unwrap(), TokenKind::Double);
        assert_eq!(t.double_value(), 2e10);
        assert_eq!(t.read().unwrap(), TokenKind::Double);
        assert_eq!(t.double_value(), -1.5e-3);
    }

    #[test]
    fn hex_blob_forms_decode_to_same_bytes() {
        for literal in ["X'DEADBEEF'", "x'deadbeef'"] {
            let mut t = tok(literal);
            assert_eq!(t.read().unwrap(), TokenKind::BinaryBlob);
            let bytes = decode_hex_blob(t.str_value()).unwrap();
            assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        }
    }

    #[test]
    fn underscore_binary_hex_form() {
        let mut t = tok("_binary 0xdeadBEEF");
        assert_eq!(t.read().unwrap(), TokenKind::BinaryBlob);
        let bytes = decode_hex_blob(t.str_value()).unwrap();
        assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn underscore_binary_empty_form() {
        let mut t = tok("_binary ''");
        assert_eq!(t.read().unwrap(), TokenKind::BinaryBlob);
        assert_eq!(t.str_value(), "");
    }

    #[test]
    fn comments_are_skipped_as_whitespace() {
        let mut t = tok("-- a comment\n/* block */ `x`");
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.str_value(), "x");
    }

    #[test]
    fn single_character_operators_are_trivia() {
        let mut t = tok("+ - * / < > `x`");
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.str_value(), "x");
    }

    #[test]
    fn bare_minus_is_trivia_but_a_signed_literal_is_not() {
        let mut t = tok("a - b");
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.str_value(), "b");

        let mut t = tok("- -42");
        assert_eq!(t.read().unwrap(), TokenKind::Integer);
        assert_eq!(t.int_value(), -42);
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let mut t = tok("'abc");
        assert!(t.read().is_err());
    }

    #[test]
    fn tiny_buffer_straddles_long_identifier() {
        let mut t = tok_with_buffer("`a_very_long_backtick_quoted_identifier_name`", 8);
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        assert_eq!(t.str_value(), "a_very_long_backtick_quoted_identifier_name");
    }

    #[test]
    fn tiny_buffer_straddles_long_string_literal() {
        let mut t = tok_with_buffer("'this string is definitely longer than the buffer'", 6);
        assert_eq!(t.read().unwrap(), TokenKind::Str);
        assert_eq!(t.str_value(), "this string is definitely longer than the buffer");
    }

    #[test]
    fn every_byte_value_round_trips_through_the_binary_encoder() {
        let all_bytes: Vec<u8> = (0u8..=255).collect();
        let literal = format!("_binary 0x{}", hex::encode(&all_bytes));
        let mut t = tok(&literal);
        assert_eq!(t.read().unwrap(), TokenKind::BinaryBlob);
        assert_eq!(decode_hex_blob(t.str_value()).unwrap(), all_bytes);
    }

    #[test]
    fn reads_at_most_one_buffer_ahead_of_the_current_token() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct CountingReader {
            inner: io::Cursor<Vec<u8>>,
            served: Arc<AtomicUsize>,
        }
        impl Read for CountingReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = self.inner.read(buf)?;
                self.served.fetch_add(n, Ordering::SeqCst);
                Ok(n)
            }
        }

        let input = "SELECT 'a long tail that must not be prefetched eagerly at all'";
        let served = Arc::new(AtomicUsize::new(0));
        let buffer_size = 8;
        let mut t = SqlTokenizer::with_buffer_size(
            CountingReader { inner: io::Cursor::new(input.as_bytes().to_vec()), served: served.clone() },
            buffer_size,
        );
        assert_eq!(t.read().unwrap(), TokenKind::Identifier);
        // The first token is 6 chars; the tokenizer may hold one full
        // buffer beyond the token start plus the single peeked character.
        assert!(served.load(Ordering::SeqCst) <= 6 + buffer_size + 1);
    }

    #[test]
    fn byte_at_a_time_reader_matches_whole_input() {
        struct OneByteAtATime(std::io::Cursor<Vec<u8>>);
        impl Read for OneByteAtATime {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = buf.len().min(1);
                self.0.read(&mut buf[..n])
            }
        }

        let input = "CREATE TABLE `t` (`a` INT, `b` VARCHAR(10) DEFAULT 'x');";
        let whole: Vec<TokenKind> = {
            let mut t = tok(input);
            let mut kinds = vec![];
            loop {
                let k = t.read().unwrap();
                kinds.push(k);
                if k == TokenKind::Eof {
                    break;
                }
            }
            kinds
        };
        let piecemeal: Vec<TokenKind> = {
            let mut t = SqlTokenizer::new(OneByteAtATime(io::Cursor::new(input.as_bytes().to_vec())));
            let mut kinds = vec![];
            loop {
                let k = t.read().unwrap();
                kinds.push(k);
                if k == TokenKind::Eof {
                    break;
                }
            }
            kinds
        };
        assert_eq!(whole, piecemeal);
    }
}
