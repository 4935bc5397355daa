// Turtle and TriG grammar over the streaming lexer. TriG mode adds the
// three graph-block forms; everything else is shared.
//
// Emitted terms are canonical: IRIs resolved and wrapped in `<>`, blank
// nodes prefixed `_:`, literals quoted with their language tag or
// datatype. Spans passed to the sink die at the end of each statement.

use std::collections::HashMap;
use std::io::Read;
use std::ops::Range;

use crate::atoms::escape_literal_into;
use crate::atoms::vocab;
use crate::common::CancelToken;
use crate::error::{Result, StoreError};
use crate::parser::iri::{is_absolute_iri, resolve_iri};
use crate::parser::lexer::{
    decode_unicode_escape, is_pn_chars, is_pn_chars_base, is_pn_chars_u, is_ws, scan_iriref, Lexer,
};
use crate::parser::QuadSink;

pub struct TurtleParser<R: Read> {
    lex: Lexer<R>,
    prefixes: HashMap<String, String>,
    base: Option<String>,
    bnode_counter: u64,
    trig: bool,
    graph: Option<String>,
    cancel: CancelToken,
}

impl<R: Read> TurtleParser<R> {
    pub fn new(input: R, trig: bool) -> Self {
        Self {
            lex: Lexer::new(input),
            prefixes: HashMap::new(),
            base: None,
            bnode_counter: 0,
            trig,
            graph: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_base(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
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
            self.statement(sink)?;
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
                            self.cancel.check()?;
                            break;
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Case-insensitive keyword match with an identifier-boundary check.
    fn at_keyword(&mut self, keyword: &str, case_sensitive: bool) -> Result<bool> {
        for (i, expected) in keyword.chars().enumerate() {
            let matches = match self.lex.peek_ahead(i)? {
                Some(c) if case_sensitive => c == expected,
                Some(c) => c.eq_ignore_ascii_case(&expected),
                None => false,
            };
            if !matches {
                return Ok(false);
            }
        }
        if let Some(next) = self.lex.peek_ahead(keyword.len())? {
            if is_pn_chars(next) || next == ':' {
                return Ok(false);
            }
        }
        for _ in 0..keyword.len() {
            self.lex.consume()?;
        }
        Ok(true)
    }

    fn statement(&mut self, sink: &mut dyn QuadSink) -> Result<()> {
        if self.lex.peek()? == Some('@') {
            self.at_directive()?;
        } else if self.at_keyword("PREFIX", false)? {
            self.prefix_directive(false)?;
        } else if self.at_keyword("BASE", false)? {
            self.base_directive(false)?;
        } else if self.trig {
            self.trig_statement(sink)?;
        } else {
            self.triples(sink)?;
            self.skip_ws()?;
            self.lex.expect('.')?;
        }
        self.lex.out_reset();
        Ok(())
    }

    fn trig_statement(&mut self, sink: &mut dyn QuadSink) -> Result<()> {
        match self.lex.peek()? {
            Some('{') => return self.graph_block(sink, None),
            Some('[') | Some('(') => {
                self.triples(sink)?;
                self.skip_ws()?;
                return self.lex.expect('.');
            }
            _ => {}
        }
        if self.at_keyword("GRAPH", false)? {
            self.skip_ws()?;
            let label = self.graph_label()?;
            self.skip_ws()?;
            return self.graph_block(sink, Some(label));
        }

        // `label { … }` shorthand or ordinary default-graph triples
        let subject = self.simple_subject()?;
        self.skip_ws()?;
        if self.lex.peek()? == Some('{') {
            let label = self.lex.out_str(&subject).to_string();
            self.graph_block(sink, Some(label))
        } else {
            self.predicate_object_list(sink, subject)?;
            self.skip_ws()?;
            self.lex.expect('.')
        }
    }

    fn graph_label(&mut self) -> Result<String> {
        let range = self.simple_subject()?;
        Ok(self.lex.out_str(&range).to_string())
    }

    fn graph_block(&mut self, sink: &mut dyn QuadSink, label: Option<String>) -> Result<()> {
        self.graph = label;
        self.lex.expect('{')?;
        loop {
            self.skip_ws()?;
            if self.lex.try_consume('}')? {
                break;
            }
            self.triples(sink)?;
            self.skip_ws()?;
            if self.lex.try_consume('.')? {
                continue;
            }
            self.skip_ws()?;
            self.lex.expect('}')?;
            break;
        }
        self.graph = None;
        Ok(())
    }

    // --- directives ---

    fn at_directive(&mut self) -> Result<()> {
        if self.lex.match_keyword("@prefix", true)? {
            self.prefix_directive(true)
        } else if self.lex.match_keyword("@base", true)? {
            self.base_directive(true)
        } else {
            Err(self.lex.error("unknown directive"))
        }
    }

    /// `@prefix` is dot-terminated; SPARQL-style `PREFIX` must not be.
    fn prefix_directive(&mut self, dot_terminated: bool) -> Result<()> {
        self.skip_ws()?;
        let prefix = self.pname_prefix()?;
        self.lex.expect(':')?;
        self.skip_ws()?;
        let iri = self.iriref()?;
        if dot_terminated {
            self.skip_ws()?;
            self.lex.expect('.')?;
        }
        self.prefixes.insert(prefix, iri);
        Ok(())
    }

    fn base_directive(&mut self, dot_terminated: bool) -> Result<()> {
        self.skip_ws()?;
        let iri = self.iriref()?;
        if dot_terminated {
            self.skip_ws()?;
            self.lex.expect('.')?;
        }
        self.base = Some(iri);
        Ok(())
    }

    // --- triples ---

    fn triples(&mut self, sink: &mut dyn QuadSink) -> Result<()> {
        self.skip_ws()?;
        match self.lex.peek()? {
            Some('[') => {
                let subject = self.blank_node_property_list(sink)?;
                self.skip_ws()?;
                match self.lex.peek()? {
                    Some('.') | Some('}') | None => Ok(()),
                    _ => self.predicate_object_list(sink, subject),
                }
            }
            Some('(') => {
                let subject = self.collection(sink)?;
                self.skip_ws()?;
                self.predicate_object_list(sink, subject)
            }
            _ => {
                let subject = self.simple_subject()?;
                self.skip_ws()?;
                self.predicate_object_list(sink, subject)
            }
        }
    }

    fn simple_subject(&mut self) -> Result<Range<usize>> {
        match self.lex.peek()? {
            Some('<') => self.iri_term(),
            Some('_') => self.bnode_label_term(),
            Some(_) => self.pname_term(),
            None => Err(self.lex.error("expected subject, found end of input")),
        }
    }

    fn predicate_object_list(
        &mut self,
        sink: &mut dyn QuadSink,
        subject: Range<usize>,
    ) -> Result<()> {
        loop {
            self.skip_ws()?;
            let predicate = self.predicate_term()?;
            loop {
                self.skip_ws()?;
                let object = self.object_term(sink)?;
                self.emit(sink, &subject, &predicate, &object)?;
                self.skip_ws()?;
                if !self.lex.try_consume(',')? {
                    break;
                }
            }

            let mut saw_semicolon = false;
            while self.lex.try_consume(';')? {
                saw_semicolon = true;
                self.skip_ws()?;
            }
            if !saw_semicolon {
                return Ok(());
            }
            // Trailing `;` before the statement terminator is permitted
            match self.lex.peek()? {
                Some('.') | Some(']') | Some('}') | None => return Ok(()),
                _ => {}
            }
        }
    }

    fn predicate_term(&mut self) -> Result<Range<usize>> {
        match self.lex.peek()? {
            Some('<') => self.iri_term(),
            Some('a') => {
                // `a` is rdf:type only when not followed by identifier
                // characters
                match self.lex.peek_ahead(1)? {
                    Some(c) if is_pn_chars(c) || c == ':' => self.pname_term(),
                    _ => {
                        self.lex.consume()?;
                        Ok(self.push_iri_const(vocab::RDF_TYPE))
                    }
                }
            }
            Some(_) => self.pname_term(),
            None => Err(self.lex.error("expected predicate, found end of input")),
        }
    }

    fn object_term(&mut self, sink: &mut dyn QuadSink) -> Result<Range<usize>> {
        match self.lex.peek()? {
            Some('<') => self.iri_term(),
            Some('_') => self.bnode_label_term(),
            Some('[') => self.blank_node_property_list(sink),
            Some('(') => self.collection(sink),
            Some('"') | Some('\'') => self.string_literal(),
            Some(c) if c.is_ascii_digit() || c == '+' || c == '-' => self.numeric_literal(),
            Some('.') => {
                // `.` before a decimal digit starts a numeric literal;
                // otherwise it is the statement terminator
                match self.lex.peek_ahead(1)? {
                    Some(d) if d.is_ascii_digit() => self.numeric_literal(),
                    _ => Err(self.lex.error("expected object, found '.'")),
                }
            }
            Some('t') | Some('f') => {
                if self.at_keyword("true", true)? {
                    Ok(self.push_typed_const("true", vocab::XSD_BOOLEAN))
                } else if self.at_keyword("false", true)? {
                    Ok(self.push_typed_const("false", vocab::XSD_BOOLEAN))
                } else {
                    self.pname_term()
                }
            }
            Some(_) => self.pname_term(),
            None => Err(self.lex.error("expected object, found end of input")),
        }
    }

    fn emit(
        &mut self,
        sink: &mut dyn QuadSink,
        s: &Range<usize>,
        p: &Range<usize>,
        o: &Range<usize>,
    ) -> Result<()> {
        let graph = self.graph.as_deref().unwrap_or("");
        sink.quad(
            self.lex.out_str(s),
            self.lex.out_str(p),
            self.lex.out_str(o),
            graph,
        )
    }

    // --- terms ---

    fn push_iri_const(&mut self, iri: &str) -> Range<usize> {
        let start = self.lex.out_mark();
        self.lex.out_push('<');
        self.lex.out_push_str(iri);
        self.lex.out_push('>');
        self.lex.out_range(start)
    }

    fn push_typed_const(&mut self, value: &str, datatype: &str) -> Range<usize> {
        let start = self.lex.out_mark();
        self.lex.out_push('"');
        self.lex.out_push_str(value);
        self.lex.out_push_str("\"^^<");
        self.lex.out_push_str(datatype);
        self.lex.out_push('>');
        self.lex.out_range(start)
    }

    fn fresh_bnode(&mut self) -> Range<usize> {
        let start = self.lex.out_mark();
        self.lex.out_push_str("_:b");
        self.lex.out_push_str(&self.bnode_counter.to_string());
        self.bnode_counter += 1;
        self.lex.out_range(start)
    }

    /// Raw `<…>` reference, unescaped and resolved against the base.
    fn iriref(&mut self) -> Result<String> {
        let iri = scan_iriref(&mut self.lex)?;

        if is_absolute_iri(&iri) {
            Ok(iri)
        } else if let Some(base) = &self.base {
            Ok(resolve_iri(base, &iri))
        } else {
            Err(self
                .lex
                .error(format!("relative IRI <{iri}> without a base")))
        }
    }

    fn iri_term(&mut self) -> Result<Range<usize>> {
        let iri = self.iriref()?;
        Ok(self.push_iri_const(&iri))
    }

    /// PN_PREFIX without the trailing colon; empty for the default prefix.
    fn pname_prefix(&mut self) -> Result<String> {
        let mut name = String::new();
        match self.lex.peek()? {
            Some(':') => return Ok(name),
            Some(c) if is_pn_chars_base(c) => {
                name.push(c);
                self.lex.consume()?;
            }
            _ => return Err(self.lex.error("expected prefix name")),
        }
        loop {
            match self.lex.peek()? {
                Some(c) if is_pn_chars(c) => {
                    name.push(c);
                    self.lex.consume()?;
                }
                Some('.') => match self.lex.peek_ahead(1)? {
                    Some(n) if is_pn_chars(n) || n == '.' => {
                        name.push('.');
                        self.lex.consume()?;
                    }
                    _ => break,
                },
                _ => break,
            }
        }
        Ok(name)
    }

    fn pname_term(&mut self) -> Result<Range<usize>> {
        let prefix = self.pname_prefix()?;
        self.lex.expect(':')?;
        let local = self.pn_local()?;
        let namespace = self
            .prefixes
            .get(&prefix)
            .ok_or_else(|| StoreError::UnknownPrefix(prefix.clone()))?
            .clone();

        let start = self.lex.out_mark();
        self.lex.out_push('<');
        self.lex.out_push_str(&namespace);
        self.lex.out_push_str(&local);
        self.lex.out_push('>');
        Ok(self.lex.out_range(start))
    }

    fn pn_local(&mut self) -> Result<String> {
        let mut local = String::new();
        loop {
            let Some(c) = self.lex.peek()? else { break };
            let first = local.is_empty();
            if (first && (is_pn_chars_u(c) || c == ':' || c.is_ascii_digit()))
                || (!first && (is_pn_chars(c) || c == ':'))
            {
                local.push(c);
                self.lex.consume()?;
            } else if c == '%' {
                self.lex.consume()?;
                local.push('%');
                for _ in 0..2 {
                    match self.lex.consume()? {
                        Some(h) if h.is_ascii_hexdigit() => local.push(h),
                        _ => return Err(self.lex.error("invalid percent escape in local name")),
                    }
                }
            } else if c == '\\' {
                self.lex.consume()?;
                match self.lex.consume()? {
                    Some(e) if "_~.-!$&'()*+,;=/?#@%".contains(e) => local.push(e),
                    _ => return Err(self.lex.error("invalid escape in local name")),
                }
            } else if c == '.' && !first {
                // Dots are local-name characters only when another one
                // follows; a trailing dot terminates the statement
                match self.lex.peek_ahead(1)? {
                    Some(n)
                        if is_pn_chars(n)
                            || n == ':'
                            || n == '.'
                            || n == '%'
                            || n == '\\' =>
                    {
                        local.push('.');
                        self.lex.consume()?;
                    }
                    _ => break,
                }
            } else {
                break;
            }
        }
        Ok(local)
    }

    fn bnode_label_term(&mut self) -> Result<Range<usize>> {
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

    fn blank_node_property_list(&mut self, sink: &mut dyn QuadSink) -> Result<Range<usize>> {
        self.lex.expect('[')?;
        self.skip_ws()?;
        let subject = self.fresh_bnode();
        if self.lex.try_consume(']')? {
            return Ok(subject);
        }
        self.predicate_object_list(sink, subject.clone())?;
        self.skip_ws()?;
        self.lex.expect(']')?;
        Ok(subject)
    }

    fn collection(&mut self, sink: &mut dyn QuadSink) -> Result<Range<usize>> {
        self.lex.expect('(')?;
        self.skip_ws()?;
        if self.lex.try_consume(')')? {
            return Ok(self.push_iri_const(vocab::RDF_NIL));
        }

        let head = self.fresh_bnode();
        let mut cell = head.clone();
        let first_pred = self.push_iri_const(vocab::RDF_FIRST);
        let rest_pred = self.push_iri_const(vocab::RDF_REST);

        let object = self.object_term(sink)?;
        self.emit(sink, &cell, &first_pred, &object)?;
        loop {
            self.skip_ws()?;
            if self.lex.try_consume(')')? {
                let nil = self.push_iri_const(vocab::RDF_NIL);
                self.emit(sink, &cell, &rest_pred, &nil)?;
                return Ok(head);
            }
            let next = self.fresh_bnode();
            self.emit(sink, &cell, &rest_pred, &next)?;
            cell = next;
            let object = self.object_term(sink)?;
            self.emit(sink, &cell, &first_pred, &object)?;
        }
    }

    fn string_literal(&mut self) -> Result<Range<usize>> {
        let quote = self
            .lex
            .consume()?
            .ok_or_else(|| self.lex.error("expected string literal"))?;
        let long = self.lex.peek()? == Some(quote) && self.lex.peek_ahead(1)? == Some(quote);
        if long {
            self.lex.consume()?;
            self.lex.consume()?;
        }

        let mut value = String::new();
        loop {
            let c = self
                .lex
                .consume()?
                .ok_or_else(|| self.lex.error("unterminated string literal"))?;
            if c == quote {
                if !long {
                    break;
                }
                if self.lex.peek()? == Some(quote) && self.lex.peek_ahead(1)? == Some(quote) {
                    self.lex.consume()?;
                    self.lex.consume()?;
                    break;
                }
                value.push(c);
                continue;
            }
            match c {
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
                '\n' | '\r' if !long => {
                    return Err(self.lex.error("newline in single-line string literal"))
                }
                c => value.push(c),
            }
        }

        // Optional language tag or datatype, attached without whitespace
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
            if tag.is_empty() || tag.starts_with('-') || tag.ends_with('-') {
                return Err(self.lex.error("malformed language tag"));
            }
            lang = Some(tag);
        } else if self.lex.peek()? == Some('^') {
            self.lex.expect('^')?;
            self.lex.expect('^')?;
            let dt = match self.lex.peek()? {
                Some('<') => self.iriref()?,
                _ => {
                    let range = self.pname_term()?;
                    let text = self.lex.out_str(&range);
                    text[1..text.len() - 1].to_string()
                }
            };
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

    fn numeric_literal(&mut self) -> Result<Range<usize>> {
        let mut lexical = String::new();
        if let Some(c) = self.lex.peek()? {
            if c == '+' || c == '-' {
                lexical.push(c);
                self.lex.consume()?;
            }
        }

        let mut int_digits = 0;
        while let Some(c) = self.lex.peek()? {
            if c.is_ascii_digit() {
                lexical.push(c);
                int_digits += 1;
                self.lex.consume()?;
            } else {
                break;
            }
        }

        let mut decimal = false;
        if self.lex.peek()? == Some('.') {
            if let Some(d) = self.lex.peek_ahead(1)? {
                if d.is_ascii_digit() {
                    decimal = true;
                    lexical.push('.');
                    self.lex.consume()?;
                    while let Some(c) = self.lex.peek()? {
                        if c.is_ascii_digit() {
                            lexical.push(c);
                            self.lex.consume()?;
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        if int_digits == 0 && !decimal {
            return Err(self.lex.error("malformed numeric literal"));
        }

        let mut double = false;
        if matches!(self.lex.peek()?, Some('e') | Some('E')) {
            double = true;
            lexical.push('e');
            self.lex.consume()?;
            if let Some(c) = self.lex.peek()? {
                if c == '+' || c == '-' {
                    lexical.push(c);
                    self.lex.consume()?;
                }
            }
            // A numeric exponent requires at least one digit
            let mut exp_digits = 0;
            while let Some(c) = self.lex.peek()? {
                if c.is_ascii_digit() {
                    lexical.push(c);
                    exp_digits += 1;
                    self.lex.consume()?;
                } else {
                    break;
                }
            }
            if exp_digits == 0 {
                return Err(self.lex.error("exponent requires at least one digit"));
            }
        }

        let datatype = if double {
            vocab::XSD_DOUBLE
        } else if decimal {
            vocab::XSD_DECIMAL
        } else {
            vocab::XSD_INTEGER
        };
        Ok(self.push_typed_const(&lexical, datatype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Emitted = Vec<(String, String, String, String)>;

    fn parse_turtle(text: &str) -> Result<Emitted> {
        parse_with(text, false, None)
    }

    fn parse_trig(text: &str) -> Result<Emitted> {
        parse_with(text, true, None)
    }

    fn parse_with(text: &str, trig: bool, base: Option<&str>) -> Result<Emitted> {
        let mut parser = TurtleParser::new(text.as_bytes(), trig);
        if let Some(base) = base {
            parser = parser.with_base(base);
        }
        let mut quads = Vec::new();
        let mut sink = |s: &str, p: &str, o: &str, g: &str| -> Result<()> {
            quads.push((s.to_string(), p.to_string(), o.to_string(), g.to_string()));
            Ok(())
        };
        parser.parse(&mut sink)?;
        Ok(quads)
    }

    #[test]
    fn test_basic_triple() {
        let quads = parse_turtle("<http://ex/s> <http://ex/p> \"v\" .").unwrap();
        assert_eq!(
            quads,
            vec![(
                "<http://ex/s>".to_string(),
                "<http://ex/p>".to_string(),
                "\"v\"".to_string(),
                String::new()
            )]
        );
    }

    #[test]
    fn test_prefixed_names_and_a_keyword() {
        let quads = parse_turtle(
            "@prefix ex: <http://ex/> .\n\
             ex:s a ex:Type ; ex:p ex:o , \"x\" .",
        )
        .unwrap();
        assert_eq!(quads.len(), 3);
        assert_eq!(quads[0].1, "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>");
        assert_eq!(quads[0].2, "<http://ex/Type>");
        assert_eq!(quads[1].2, "<http://ex/o>");
        assert_eq!(quads[2].2, "\"x\"");
    }

    #[test]
    fn test_sparql_style_directives_not_dot_terminated() {
        let quads = parse_turtle(
            "PREFIX ex: <http://ex/>\n\
             BASE <http://base/>\n\
             ex:s ex:p <rel> .",
        )
        .unwrap();
        assert_eq!(quads[0].2, "<http://base/rel>");

        // A dot after SPARQL-style PREFIX is a syntax error (parsed as a
        // statement starting with '.')
        assert!(parse_turtle("PREFIX ex: <http://ex/> .\n").is_err());
    }

    #[test]
    fn test_at_directives_require_dot() {
        assert!(parse_turtle("@prefix ex: <http://ex/>\nex:s ex:p ex:o .").is_err());
        // @prefix is case-sensitive
        assert!(parse_turtle("@PREFIX ex: <http://ex/> .").is_err());
    }

    #[test]
    fn test_base_resolution() {
        let quads = parse_with("</a> <p> <../q> .", false, Some("http://host/x/y")).unwrap();
        assert_eq!(quads[0].0, "<http://host/a>");
        assert_eq!(quads[0].1, "<http://host/x/p>");
        assert_eq!(quads[0].2, "<http://host/q>");
    }

    #[test]
    fn test_relative_iri_without_base_fails() {
        assert!(parse_turtle("<rel> <http://ex/p> <http://ex/o> .").is_err());
    }

    #[test]
    fn test_literals() {
        let quads = parse_turtle(
            "@prefix ex: <http://ex/> .\n\
             ex:s ex:p \"plain\", \"tagged\"@en-GB, \"typed\"^^ex:dt, 'single' .",
        )
        .unwrap();
        assert_eq!(quads[0].2, "\"plain\"");
        assert_eq!(quads[1].2, "\"tagged\"@en-GB");
        assert_eq!(quads[2].2, "\"typed\"^^<http://ex/dt>");
        assert_eq!(quads[3].2, "\"single\"");
    }

    #[test]
    fn test_long_strings_allow_newlines_and_quotes() {
        let quads = parse_turtle(
            "@prefix ex: <http://ex/> .\nex:s ex:p \"\"\"line1\nline\"2\"\"\" .",
        )
        .unwrap();
        assert_eq!(quads[0].2, "\"line1\\nline\\\"2\"");
    }

    #[test]
    fn test_numeric_literals() {
        let quads = parse_turtle(
            "@prefix ex: <http://ex/> .\nex:s ex:p 42, -7, 3.14, .5, 1e1, 2.0E-3 .",
        )
        .unwrap();
        let objects: Vec<&str> = quads.iter().map(|q| q.2.as_str()).collect();
        assert_eq!(
            objects,
            vec![
                "\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>",
                "\"-7\"^^<http://www.w3.org/2001/XMLSchema#integer>",
                "\"3.14\"^^<http://www.w3.org/2001/XMLSchema#decimal>",
                "\".5\"^^<http://www.w3.org/2001/XMLSchema#decimal>",
                "\"1e1\"^^<http://www.w3.org/2001/XMLSchema#double>",
                "\"2.0e-3\"^^<http://www.w3.org/2001/XMLSchema#double>",
            ]
        );
    }

    #[test]
    fn test_exponent_requires_digit() {
        assert!(parse_turtle("@prefix ex: <http://ex/> .\nex:s ex:p 1e .").is_err());
    }

    #[test]
    fn test_booleans() {
        let quads =
            parse_turtle("@prefix ex: <http://ex/> .\nex:s ex:p true, false .").unwrap();
        assert_eq!(
            quads[0].2,
            "\"true\"^^<http://www.w3.org/2001/XMLSchema#boolean>"
        );
        assert_eq!(
            quads[1].2,
            "\"false\"^^<http://www.w3.org/2001/XMLSchema#boolean>"
        );
    }

    #[test]
    fn test_dots_in_local_names() {
        let quads = parse_turtle(
            "@prefix ex: <http://ex/> .\nex:a.b ex:p ex:q.r.s .",
        )
        .unwrap();
        assert_eq!(quads[0].0, "<http://ex/a.b>");
        assert_eq!(quads[0].2, "<http://ex/q.r.s>");
    }

    #[test]
    fn test_bnode_labels_with_dots() {
        let quads = parse_turtle("_:a.b <http://ex/p> _:c .").unwrap();
        assert_eq!(quads[0].0, "_:a.b");
        assert_eq!(quads[0].2, "_:c");
    }

    #[test]
    fn test_anonymous_and_nested_property_lists() {
        let quads = parse_turtle(
            "@prefix ex: <http://ex/> .\n\
             [] ex:p ex:o .\n\
             ex:s ex:q [ ex:r [ ex:t \"deep\" ] ] .",
        )
        .unwrap();
        assert_eq!(quads.len(), 4);
        assert_eq!(quads[0].0, "_:b0");
        // Inner list emits first, with fresh distinct labels
        assert_eq!(quads[1], (
            "_:b2".to_string(),
            "<http://ex/t>".to_string(),
            "\"deep\"".to_string(),
            String::new()
        ));
        assert_eq!(quads[2].0, "_:b1");
        assert_eq!(quads[2].2, "_:b2");
        assert_eq!(quads[3].0, "<http://ex/s>");
        assert_eq!(quads[3].2, "_:b1");
    }

    #[test]
    fn test_empty_collection_is_nil() {
        let quads = parse_turtle("@prefix ex: <http://ex/> .\nex:s ex:p () .").unwrap();
        assert_eq!(quads.len(), 1);
        assert_eq!(
            quads[0].2,
            "<http://www.w3.org/1999/02/22-rdf-syntax-ns#nil>"
        );
    }

    #[test]
    fn test_collection_chain() {
        let quads = parse_turtle("@prefix ex: <http://ex/> .\nex:s ex:p (1 2) .").unwrap();
        // b0 first 1; b0 rest b1; b1 first 2; b1 rest nil; s p b0
        assert_eq!(quads.len(), 5);
        let rdf = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
        assert_eq!(quads[0].0, "_:b0");
        assert_eq!(quads[0].1, format!("<{rdf}first>"));
        assert_eq!(quads[1].1, format!("<{rdf}rest>"));
        assert_eq!(quads[1].2, "_:b1");
        assert_eq!(quads[3].2, format!("<{rdf}nil>"));
        assert_eq!(quads[4].2, "_:b0");
    }

    #[test]
    fn test_unknown_prefix_fails() {
        let result = parse_turtle("nope:s <http://ex/p> <http://ex/o> .");
        assert!(matches!(result, Err(StoreError::UnknownPrefix(p)) if p == "nope"));
    }

    #[test]
    fn test_whitespace_in_iri_rejected() {
        assert!(parse_turtle("<http://ex/a b> <http://ex/p> <http://ex/o> .").is_err());
    }

    #[test]
    fn test_iri_unicode_escapes() {
        let quads =
            parse_turtle("<http://ex/\\u0041> <http://ex/p> <http://ex/o> .").unwrap();
        assert_eq!(quads[0].0, "<http://ex/A>");
        assert!(parse_turtle("<http://ex/\\uD800> <http://ex/p> <http://ex/o> .").is_err());
    }

    #[test]
    fn test_trig_graph_forms() {
        let quads = parse_trig(
            "@prefix ex: <http://ex/> .\n\
             { ex:a ex:p ex:o . }\n\
             GRAPH ex:g1 { ex:b ex:p ex:o }\n\
             ex:g2 { ex:c ex:p ex:o . ex:d ex:p ex:o }\n\
             ex:e ex:p ex:o .",
        )
        .unwrap();
        let graphs: Vec<&str> = quads.iter().map(|q| q.3.as_str()).collect();
        assert_eq!(
            graphs,
            vec!["", "<http://ex/g1>", "<http://ex/g2>", "<http://ex/g2>", ""]
        );
    }

    #[test]
    fn test_trig_blocks_rejected_in_turtle_mode() {
        assert!(parse_turtle("{ <http://ex/s> <http://ex/p> <http://ex/o> . }").is_err());
    }

    #[test]
    fn test_cancellation_stops_parse() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut parser =
            TurtleParser::new("<http://ex/s> <http://ex/p> \"v\" .\n".as_bytes(), false)
                .with_cancel(cancel);
        let mut sink = |_: &str, _: &str, _: &str, _: &str| -> Result<()> { Ok(()) };
        assert!(matches!(parser.parse(&mut sink), Err(StoreError::Canceled)));
    }

    #[test]
    fn test_comments_ignored() {
        let quads = parse_turtle(
            "# leading comment\n<http://ex/s> <http://ex/p> \"v\" . # trailing\n",
        )
        .unwrap();
        assert_eq!(quads.len(), 1);
    }
}
