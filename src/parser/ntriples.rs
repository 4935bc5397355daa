// N-Triples and N-Quads: the line-oriented grammars. Quads mode accepts
// an optional graph term before the terminating dot. IRIs must be
// absolute; there are no prefixes and no base.

use std::io::Read;
use std::ops::Range;

use crate::atoms::escape_literal_into;
use crate::common::CancelToken;
use crate::error::Result;
use crate::parser::iri::is_absolute_iri;
use crate::parser::lexer::{
    decode_unicode_escape, is_pn_chars, is_pn_chars_u, is_ws, scan_iriref, Lexer,
};
use crate::parser::QuadSink;

pub struct NTriplesParser<R: Read> {
    lex: Lexer<R>,
    quads: bool,
    cancel: CancelToken,
}

impl<R: Read> NTriplesParser<R> {
    pub fn new(input: R, quads: bool) -> Self {
        Self {
            lex: Lexer::new(input),
            quads,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn parse(&mut self, sink: &mut dyn QuadSink) -> Result<()> {
        loop {
            self.skip_ws()?;
            if self.lex.at_eof()? {
                return Ok(());
            }
            self.cancel.check()?;
            self.statement(sink)?;
            self.lex.out_reset();
        }
    }

    fn skip_ws(&mut self) -> Result<()> {
        loop {
            match self.lex.peek()? {
                Some(c) if is_ws(c) => {
                    if c == '\n' {
                        self.cancel.check()?;
                    }
                    self.lex.consume()?;
                }
                Some('#') => {
                    while let Some(c) = self.lex.consume()? {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn statement(&mut self, sink: &mut dyn QuadSink) -> Result<()> {
        let subject = match self.lex.peek()? {
            Some('<') => self.iri_term()?,
            Some('_') => self.bnode_term()?,
            _ => return Err(self.lex.error("expected IRI or blank node subject")),
        };
        self.skip_ws()?;
        let predicate = self.iri_term()?;
        self.skip_ws()?;
        let object = match self.lex.peek()? {
            Some('<') => self.iri_term()?,
            Some('_') => self.bnode_term()?,
            Some('"') => self.literal_term()?,
            _ => return Err(self.lex.error("expected IRI, blank node, or literal object")),
        };

        let mut graph = None;
        if self.quads {
            self.skip_ws()?;
            match self.lex.peek()? {
                Some('<') => graph = Some(self.iri_term()?),
                Some('_') => graph = Some(self.bnode_term()?),
                _ => {}
            }
        }

        self.skip_ws()?;
        self.lex.expect('.')?;

        let graph_str = graph
            .as_ref()
            .map(|g| self.lex.out_str(g))
            .unwrap_or("");
        sink.quad(
            self.lex.out_str(&subject),
            self.lex.out_str(&predicate),
            self.lex.out_str(&object),
            graph_str,
        )
    }

    fn iri_term(&mut self) -> Result<Range<usize>> {
        let line = self.lex.line();
        let column = self.lex.column();
        let iri = scan_iriref(&mut self.lex)?;
        if !is_absolute_iri(&iri) {
            return Err(crate::error::StoreError::syntax(
                line,
                column,
                format!("relative IRI <{iri}> is not allowed here"),
            ));
        }
        let start = self.lex.out_mark();
        self.lex.out_push('<');
        self.lex.out_push_str(&iri);
        self.lex.out_push('>');
        Ok(self.lex.out_range(start))
    }

    fn bnode_term(&mut self) -> Result<Range<usize>> {
        self.lex.expect('_')?;
        self.lex.expect(':')?;
        let mut label = String::new();
        match self.lex.consume()? {
            Some(c) if is_pn_chars_u(c) || c.is_ascii_digit() => label.push(c),
            _ => return Err(self.lex.error("invalid blank node label")),
        }
        loop {
            match self.lex.peek()? {
                Some(c) if is_pn_chars(c) => {
                    label.push(c);
                    self.lex.consume()?;
                }
                Some('.') => match self.lex.peek_ahead(1)? {
                    Some(n) if is_pn_chars(n) || n == '.' => {
                        label.push('.');
                        self.lex.consume()?;
                    }
                    _ => break,
                },
                _ => break,
            }
        }

        let start = self.lex.out_mark();
        self.lex.out_push_str("_:");
        self.lex.out_push_str(&label);
        Ok(self.lex.out_range(start))
    }

    fn literal_term(&mut self) -> Result<Range<usize>> {
        self.lex.expect('"')?;
        let mut value = String::new();
        loop {
            let c = self
                .lex
                .consume()?
                .ok_or_else(|| self.lex.error("unterminated string literal"))?;
            match c {
                '"' => break,
                '\n' | '\r' => return Err(self.lex.error("newline in string literal")),
                '\\' => match self.lex.consume()? {
                    Some('t') => value.push('\t'),
                    Some('b') => value.push('\u{8}'),
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('f') => value.push('\u{c}'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some('\\') => value.push('\\'),
                    Some('u') => value.push(decode_unicode_escape(&mut self.lex, 4)?),
                    Some('U') => value.push(decode_unicode_escape(&mut self.lex, 8)?),
                    _ => return Err(self.lex.error("invalid string escape")),
                },
                c => value.push(c),
            }
        }

        let mut lang = None;
        let mut datatype = None;
        if self.lex.try_consume('@')? {
            let mut tag = String::new();
            while let Some(c) = self.lex.peek()? {
                if c.is_ascii_alphabetic() || (!tag.is_empty() && (c == '-' || c.is_ascii_digit()))
                {
                    tag.push(c);
                    self.lex.consume()?;
                } else {
                    break;
                }
            }
            if tag.is_empty() || tag.ends_with('-') {
                return Err(self.lex.error("malformed language tag"));
            }
            lang = Some(tag);
        } else if self.lex.peek()? == Some('^') {
            self.lex.expect('^')?;
            self.lex.expect('^')?;
            let line = self.lex.line();
            let column = self.lex.column();
            let dt = scan_iriref(&mut self.lex)?;
            if !is_absolute_iri(&dt) {
                return Err(crate::error::StoreError::syntax(
                    line,
                    column,
                    "datatype IRI must be absolute",
                ));
            }
            datatype = Some(dt);
        }

        let start = self.lex.out_mark();
        let mut canonical = String::with_capacity(value.len() + 2);
        canonical.push('"');
        escape_literal_into(&value, &mut canonical);
        canonical.push('"');
        if let Some(lang) = lang {
            canonical.push('@');
            canonical.push_str(&lang);
        } else if let Some(dt) = datatype {
            canonical.push_str("^^<");
            canonical.push_str(&dt);
            canonical.push('>');
        }
        self.lex.out_push_str(&canonical);
        Ok(self.lex.out_range(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    type Emitted = Vec<(String, String, String, String)>;

    fn parse(text: &str, quads: bool) -> Result<Emitted> {
        let mut parser = NTriplesParser::new(text.as_bytes(), quads);
        let mut out = Vec::new();
        let mut sink = |s: &str, p: &str, o: &str, g: &str| -> Result<()> {
            out.push((s.to_string(), p.to_string(), o.to_string(), g.to_string()));
            Ok(())
        };
        parser.parse(&mut sink)?;
        Ok(out)
    }

    #[test]
    fn test_triples() {
        let quads = parse(
            "<http://ex/s> <http://ex/p> \"v\" .\n\
             <http://ex/s> <http://ex/p> <http://ex/o> . # comment\n\
             _:b <http://ex/p> \"x\"@en .\n",
            false,
        )
        .unwrap();
        assert_eq!(quads.len(), 3);
        assert_eq!(quads[0].2, "\"v\"");
        assert_eq!(quads[1].2, "<http://ex/o>");
        assert_eq!(quads[2].0, "_:b");
        assert_eq!(quads[2].2, "\"x\"@en");
        assert!(quads.iter().all(|q| q.3.is_empty()));
    }

    #[test]
    fn test_quads_with_and_without_graph() {
        let quads = parse(
            "<http://ex/s> <http://ex/p> \"v\" <http://ex/g> .\n\
             <http://ex/s> <http://ex/p> \"w\" .\n",
            true,
        )
        .unwrap();
        assert_eq!(quads[0].3, "<http://ex/g>");
        assert_eq!(quads[1].3, "");
    }

    #[test]
    fn test_typed_and_escaped_literals() {
        let quads = parse(
            "<http://ex/s> <http://ex/p> \"5\"^^<http://www.w3.org/2001/XMLSchema#integer> .\n\
             <http://ex/s> <http://ex/p> \"a\\tb\\nc\\\"d\" .\n",
            false,
        )
        .unwrap();
        assert_eq!(
            quads[0].2,
            "\"5\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
        assert_eq!(quads[1].2, "\"a\\tb\\nc\\\"d\"");
    }

    #[test]
    fn test_relative_iri_rejected() {
        assert!(parse("<rel> <http://ex/p> \"v\" .\n", false).is_err());
    }

    #[test]
    fn test_graph_term_rejected_in_triples_mode() {
        let result = parse(
            "<http://ex/s> <http://ex/p> \"v\" <http://ex/g> .\n",
            false,
        );
        assert!(matches!(result, Err(StoreError::Syntax { .. })));
    }

    #[test]
    fn test_syntax_error_carries_position() {
        let result = parse("<http://ex/s> <http://ex/p> .\n", false);
        match result {
            Err(StoreError::Syntax { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }
}
