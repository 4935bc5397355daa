// Streaming code-point lexer shared by every RDF text grammar.
//
// The input byte buffer is rented from the buffer pool and refilled when
// consumption crosses a low-watermark, copying the unread remainder to
// the front. Term text accumulates in a growing output buffer; grammars
// receive back spans whose lifetime ends at the next reset.

use std::io::Read;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::memory::{shared_pool, BufferManager, PooledBuf};

const BUF_CAPACITY: usize = 8192;
const LOW_WATERMARK: usize = 64;

pub struct Lexer<R: Read> {
    input: R,
    buf: PooledBuf,
    pos: usize,
    eof: bool,
    line: u32,
    column: u32,
    out: String,
}

impl<R: Read> Lexer<R> {
    pub fn new(input: R) -> Self {
        Self::with_pool(input, shared_pool())
    }

    pub fn with_pool(input: R, pool: Arc<dyn BufferManager>) -> Self {
        Self {
            input,
            buf: pool.rent(BUF_CAPACITY),
            pos: 0,
            eof: false,
            line: 1,
            column: 1,
            out: String::new(),
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn error(&self, message: impl Into<String>) -> StoreError {
        StoreError::syntax(self.line, self.column, message)
    }

    /// Refill when the unread window shrinks below the low-watermark.
    fn fill(&mut self) -> Result<()> {
        if self.eof || self.buf.len() - self.pos >= LOW_WATERMARK {
            return Ok(());
        }
        let remainder = self.buf.len() - self.pos;
        self.buf.copy_within(self.pos.., 0);
        self.buf.truncate(remainder);
        self.pos = 0;

        let capacity = self.buf.capacity().max(BUF_CAPACITY);
        self.buf.resize(capacity, 0);
        let mut filled = remainder;
        while filled < capacity {
            let n = self.input.read(&mut self.buf[filled..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }
        self.buf.truncate(filled);
        Ok(())
    }

    fn decode_at(&self, offset: usize) -> Result<Option<(char, usize)>> {
        let bytes = &self.buf[offset.min(self.buf.len())..];
        if bytes.is_empty() {
            return Ok(None);
        }
        let first = bytes[0];
        let len = match first {
            0x00..=0x7f => 1,
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => return Err(self.error("invalid UTF-8 byte")),
        };
        if bytes.len() < len {
            return Err(self.error("truncated UTF-8 sequence"));
        }
        match std::str::from_utf8(&bytes[..len]) {
            Ok(s) => Ok(s.chars().next().map(|c| (c, len))),
            Err(_) => Err(self.error("invalid UTF-8 sequence")),
        }
    }

    pub fn peek(&mut self) -> Result<Option<char>> {
        self.fill()?;
        Ok(self.decode_at(self.pos)?.map(|(c, _)| c))
    }

    /// Peek `n` code points past the current position. Bounded by the
    /// refill watermark; callers look ahead a handful of characters only.
    pub fn peek_ahead(&mut self, n: usize) -> Result<Option<char>> {
        self.fill()?;
        let mut offset = self.pos;
        for _ in 0..n {
            match self.decode_at(offset)? {
                Some((_, len)) => offset += len,
                None => return Ok(None),
            }
        }
        Ok(self.decode_at(offset)?.map(|(c, _)| c))
    }

    pub fn consume(&mut self) -> Result<Option<char>> {
        self.fill()?;
        match self.decode_at(self.pos)? {
            Some((c, len)) => {
                self.pos += len;
                if c == '\n' {
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    pub fn try_consume(&mut self, expected: char) -> Result<bool> {
        if self.peek()? == Some(expected) {
            self.consume()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn expect(&mut self, expected: char) -> Result<()> {
        match self.consume()? {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected {expected:?}, found {c:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of input"))),
        }
    }

    /// Match an ASCII keyword at the current position; consumes only on a
    /// full match. The caller is responsible for boundary checks.
    pub fn match_keyword(&mut self, keyword: &str, case_sensitive: bool) -> Result<bool> {
        for (i, expected) in keyword.chars().enumerate() {
            let found = match self.peek_ahead(i)? {
                Some(c) => c,
                None => return Ok(false),
            };
            let matches = if case_sensitive {
                found == expected
            } else {
                found.eq_ignore_ascii_case(&expected)
            };
            if !matches {
                return Ok(false);
            }
        }
        for _ in 0..keyword.chars().count() {
            self.consume()?;
        }
        Ok(true)
    }

    pub fn at_eof(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_none())
    }

    // --- output buffer ---

    pub fn out_mark(&self) -> usize {
        self.out.len()
    }

    pub fn out_push(&mut self, c: char) {
        self.out.push(c);
    }

    pub fn out_push_str(&mut self, s: &str) {
        self.out.push_str(s);
    }

    pub fn out_range(&self, start: usize) -> Range<usize> {
        start..self.out.len()
    }

    pub fn out_str(&self, range: &Range<usize>) -> &str {
        &self.out[range.clone()]
    }

    /// Invalidates every span handed out since the last reset.
    pub fn out_reset(&mut self) {
        self.out.clear();
    }
}

/// Decode a `\uXXXX` or `\UXXXXXXXX` escape body (the backslash and the
/// marker are already consumed). Surrogate code points are rejected.
pub(crate) fn decode_unicode_escape<R: Read>(lex: &mut Lexer<R>, digits: usize) -> Result<char> {
    let mut value: u32 = 0;
    for _ in 0..digits {
        let c = lex
            .consume()?
            .ok_or_else(|| lex.error("unterminated unicode escape"))?;
        let digit = c
            .to_digit(16)
            .ok_or_else(|| lex.error(format!("invalid hex digit {c:?} in unicode escape")))?;
        value = value * 16 + digit;
    }
    if (0xd800..=0xdfff).contains(&value) {
        return Err(lex.error("surrogate code point in unicode escape"));
    }
    char::from_u32(value).ok_or_else(|| lex.error("unicode escape out of range"))
}

/// Scan a `<…>` IRI reference: `\u`/`\U` escapes allowed, raw whitespace
/// and the RFC-excluded characters rejected. Returns the unbracketed
/// text; resolution policy is the grammar's business.
pub(crate) fn scan_iriref<R: Read>(lex: &mut Lexer<R>) -> Result<String> {
    lex.expect('<')?;
    let mut iri = String::new();
    loop {
        let c = lex
            .consume()?
            .ok_or_else(|| lex.error("unterminated IRI"))?;
        match c {
            '>' => return Ok(iri),
            '\\' => match lex.consume()? {
                Some('u') => iri.push(decode_unicode_escape(lex, 4)?),
                Some('U') => iri.push(decode_unicode_escape(lex, 8)?),
                _ => return Err(lex.error("invalid escape in IRI")),
            },
            c if (c as u32) <= 0x20 => {
                return Err(lex.error("whitespace or control character in IRI"))
            }
            '<' | '"' | '{' | '}' | '|' | '^' | '`' => {
                return Err(lex.error(format!("character {c:?} not allowed in IRI")))
            }
            c => iri.push(c),
        }
    }
}

// Character classes shared by the Turtle-family grammars (PN_CHARS_BASE
// and friends).

pub(crate) fn is_pn_chars_base(c: char) -> bool {
    c.is_ascii_alphabetic()
        || ('\u{c0}'..='\u{d6}').contains(&c)
        || ('\u{d8}'..='\u{f6}').contains(&c)
        || ('\u{f8}'..='\u{2ff}').contains(&c)
        || ('\u{370}'..='\u{37d}').contains(&c)
        || ('\u{37f}'..='\u{1fff}').contains(&c)
        || ('\u{200c}'..='\u{200d}').contains(&c)
        || ('\u{2070}'..='\u{218f}').contains(&c)
        || ('\u{2c00}'..='\u{2fef}').contains(&c)
        || ('\u{3001}'..='\u{d7ff}').contains(&c)
        || ('\u{f900}'..='\u{fdcf}').contains(&c)
        || ('\u{fdf0}'..='\u{fffd}').contains(&c)
        || ('\u{10000}'..='\u{effff}').contains(&c)
}

pub(crate) fn is_pn_chars_u(c: char) -> bool {
    is_pn_chars_base(c) || c == '_'
}

pub(crate) fn is_pn_chars(c: char) -> bool {
    is_pn_chars_u(c)
        || c == '-'
        || c.is_ascii_digit()
        || c == '\u{b7}'
        || ('\u{300}'..='\u{36f}').contains(&c)
        || ('\u{203f}'..='\u{2040}').contains(&c)
}

pub(crate) fn is_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}
