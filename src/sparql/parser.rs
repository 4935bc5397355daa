// Single-pass SPARQL parser: source text in, pattern-slot buffer out.
//
// Slots are written left-to-right; nested sections (GRAPH, OPTIONAL,
// EXISTS, UNION branches) parse their children into the following slots
// and back-patch `(child_start, child_count)` on the header. Expression
// text is captured as source spans and re-parsed during execution.

use crate::error::{Result, StoreError};
use crate::parser::lexer::{is_pn_chars, is_pn_chars_u};
use crate::sparql::buffer::*;

struct Cursor<'s> {
    src: &'s str,
    pos: usize,
    line: u32,
    col: u32,
}

impl<'s> Cursor<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> StoreError {
        StoreError::syntax(self.line, self.col, message)
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn at_eof(&self) -> bool {
        // callers skip whitespace and comments first
        self.src[self.pos..].chars().all(|c| c.is_whitespace())
    }

    /// Case-insensitive keyword check with an identifier boundary.
    fn at_keyword(&self, keyword: &str) -> bool {
        let rest = &self.src[self.pos..];
        if rest.len() < keyword.len() {
            return false;
        }
        let (head, tail) = rest.split_at(keyword.len());
        if !head.eq_ignore_ascii_case(keyword) {
            return false;
        }
        match tail.chars().next() {
            Some(c) => !(c.is_alphanumeric() || c == '_'),
            None => true,
        }
    }

    fn take_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            for _ in 0..keyword.len() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.take_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    fn try_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected {expected:?}, found {c:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of input"))),
        }
    }

    fn span(&self, start: usize) -> SourceSpan {
        SourceSpan {
            start: start as u32,
            len: (self.pos - start) as u32,
        }
    }
}

pub struct SparqlParser<'s> {
    cur: Cursor<'s>,
    q: ParsedQuery,
}

/// Parse a query or update request into its pattern buffer.
pub fn parse(source: &str) -> Result<ParsedQuery> {
    let mut parser = SparqlParser {
        cur: Cursor::new(source),
        q: ParsedQuery::new(QueryKind::Select),
    };
    parser.run()?;
    debug_assert!(parser.q.validate_children());
    Ok(parser.q)
}

const UPDATE_KEYWORDS: [&str; 8] = [
    "INSERT", "DELETE", "CLEAR", "DROP", "COPY", "MOVE", "ADD", "WITH",
];

impl<'s> SparqlParser<'s> {
    fn run(&mut self) -> Result<()> {
        self.prologue()?;
        self.cur.skip_ws();

        if self.cur.take_keyword("SELECT") {
            self.q.kind = QueryKind::Select;
            self.select_rest()?;
        } else if self.cur.take_keyword("ASK") {
            self.q.kind = QueryKind::Ask;
            self.ask_rest()?;
        } else if self.cur.take_keyword("CONSTRUCT") {
            self.q.kind = QueryKind::Construct;
            self.construct_rest()?;
        } else if self.cur.take_keyword("DESCRIBE") {
            self.q.kind = QueryKind::Describe;
            self.describe_rest()?;
        } else if UPDATE_KEYWORDS.iter().any(|kw| self.cur.at_keyword(kw)) {
            self.q.kind = QueryKind::Update;
            self.update_sequence()?;
        } else {
            return Err(self.cur.error("expected a query form or update operation"));
        }

        self.cur.skip_ws();
        if !self.cur.at_eof() {
            return Err(self.cur.error("unexpected content after query"));
        }
        Ok(())
    }

    fn prologue(&mut self) -> Result<()> {
        loop {
            self.cur.skip_ws();
            if self.cur.take_keyword("BASE") {
                self.cur.skip_ws();
                let iri = self.iri_ref()?;
                self.q.prologue.base = Some(SourceSpan {
                    start: iri.start,
                    len: iri.len,
                });
            } else if self.cur.take_keyword("PREFIX") {
                self.cur.skip_ws();
                let pstart = self.cur.pos;
                while let Some(c) = self.cur.peek() {
                    if is_pn_chars(c) || c == '.' {
                        self.cur.bump();
                    } else {
                        break;
                    }
                }
                let plen = self.cur.pos - pstart;
                self.cur.expect_char(':')?;
                self.cur.skip_ws();
                let iri = self.iri_ref()?;
                self.q.prologue.prefixes.push(PrefixBinding {
                    prefix_start: pstart as u32,
                    prefix_len: plen as u32,
                    iri_start: iri.start,
                    iri_len: iri.len,
                });
            } else {
                return Ok(());
            }
        }
    }

    // --- query forms ---

    fn select_rest(&mut self) -> Result<()> {
        self.cur.skip_ws();
        if self.cur.take_keyword("DISTINCT") {
            self.q.projection.distinct = true;
        } else if self.cur.take_keyword("REDUCED") {
            self.q.projection.reduced = true;
        }

        self.cur.skip_ws();
        if self.cur.try_char('*') {
            self.q.projection.wildcard = true;
        } else {
            loop {
                self.cur.skip_ws();
                match self.cur.peek() {
                    Some('?') | Some('$') => {
                        let var = self.variable()?;
                        self.q.projection.items.push(SelectItem {
                            var,
                            expr: None,
                            aggregate: None,
                        });
                    }
                    Some('(') => {
                        let item = self.projected_expression()?;
                        self.q.projection.items.push(item);
                    }
                    _ => break,
                }
            }
            if self.q.projection.items.is_empty() {
                return Err(self.cur.error("SELECT requires a projection"));
            }
        }

        self.dataset_clauses()?;
        self.cur.skip_ws();
        let _ = self.cur.take_keyword("WHERE");
        self.cur.skip_ws();
        self.q.root = self.group_graph_pattern()?;
        self.solution_modifiers()
    }

    fn ask_rest(&mut self) -> Result<()> {
        self.dataset_clauses()?;
        self.cur.skip_ws();
        let _ = self.cur.take_keyword("WHERE");
        self.cur.skip_ws();
        self.q.root = self.group_graph_pattern()?;
        self.solution_modifiers()
    }

    fn construct_rest(&mut self) -> Result<()> {
        self.cur.skip_ws();
        let template = self.quad_block(false)?;
        self.q.template = Some(template);
        self.dataset_clauses()?;
        self.cur.skip_ws();
        self.cur.expect_keyword("WHERE")?;
        self.cur.skip_ws();
        self.q.root = self.group_graph_pattern()?;
        self.solution_modifiers()
    }

    fn describe_rest(&mut self) -> Result<()> {
        self.cur.skip_ws();
        if !self.cur.try_char('*') {
            loop {
                self.cur.skip_ws();
                match self.cur.peek() {
                    Some('?') | Some('$') => {
                        let var = self.variable()?;
                        self.q.describe_terms.push(var);
                    }
                    Some('<') => {
                        let iri = self.iri_ref()?;
                        self.q.describe_terms.push(iri);
                    }
                    Some(c) if is_pn_chars_u(c) || c == ':' => {
                        let name = self.prefixed_name()?;
                        self.q.describe_terms.push(name);
                    }
                    _ => break,
                }
            }
            if self.q.describe_terms.is_empty() {
                return Err(self.cur.error("DESCRIBE requires a term or *"));
            }
        }

        self.dataset_clauses()?;
        self.cur.skip_ws();
        if self.cur.take_keyword("WHERE") || self.cur.peek() == Some('{') {
            self.cur.skip_ws();
            self.q.root = self.group_graph_pattern()?;
        }
        self.solution_modifiers()
    }

    fn dataset_clauses(&mut self) -> Result<()> {
        loop {
            self.cur.skip_ws();
            if !self.cur.take_keyword("FROM") {
                return Ok(());
            }
            self.cur.skip_ws();
            let named = self.cur.take_keyword("NAMED");
            self.cur.skip_ws();
            let iri = match self.cur.peek() {
                Some('<') => self.iri_ref()?,
                _ => self.prefixed_name()?,
            };
            self.q.dataset.push(DatasetClause { iri, named });
        }
    }

    // --- group graph patterns ---

    fn push_slot(&mut self, slot: PatternSlot) -> Result<usize> {
        if self.q.slots.len() >= u16::MAX as usize {
            return Err(self.cur.error("query pattern too large"));
        }
        self.q.slots.push(slot);
        Ok(self.q.slots.len() - 1)
    }

    fn group_graph_pattern(&mut self) -> Result<SlotRange> {
        self.cur.expect_char('{')?;
        let start = self.q.slots.len();
        loop {
            self.cur.skip_ws();
            if self.cur.try_char('}') {
                break;
            }
            if self.cur.peek().is_none() {
                return Err(self.cur.error("unterminated group pattern"));
            }
            self.group_element()?;
        }
        Ok((start as u16, (self.q.slots.len() - start) as u16))
    }

    fn group_element(&mut self) -> Result<()> {
        if self.cur.at_keyword("FILTER") {
            self.filter_element()
        } else if self.cur.take_keyword("BIND") {
            self.bind_element()
        } else if self.cur.take_keyword("VALUES") {
            self.values_element()
        } else if self.cur.take_keyword("GRAPH") {
            self.graph_element()
        } else if self.cur.take_keyword("OPTIONAL") {
            self.cur.skip_ws();
            let header = self.push_slot(PatternSlot::new(SlotKind::OptionalHeader))?;
            let (cs, cc) = self.group_graph_pattern()?;
            self.q.slots[header].child_start = cs;
            self.q.slots[header].child_count = cc;
            Ok(())
        } else if self.cur.take_keyword("MINUS") {
            self.minus_element()
        } else if self.cur.peek() == Some('{') {
            self.union_chain()
        } else {
            self.triples_block()
        }
    }

    /// `{ A } UNION { B }` with an explicit split point on the header.
    /// A lone `{ … }` group keeps its placeholder as `Unused` and its
    /// slots are evaluated inline.
    fn union_chain(&mut self) -> Result<()> {
        let header = self.push_slot(PatternSlot::new(SlotKind::Unused))?;
        let body_start = self.q.slots.len();
        self.group_graph_pattern()?;
        self.cur.skip_ws();

        if self.cur.take_keyword("UNION") {
            let left_count = self.q.slots.len() - body_start;
            self.cur.skip_ws();
            if self.cur.peek() != Some('{') {
                return Err(self.cur.error("expected group after UNION"));
            }
            self.union_chain()?;
            let child_count = (self.q.slots.len() - body_start) as u16;
            let slot = &mut self.q.slots[header];
            slot.kind = SlotKind::UnionHeader;
            slot.child_start = body_start as u16;
            slot.child_count = child_count;
            slot.extra = left_count as u16;
        }
        Ok(())
    }

    fn filter_element(&mut self) -> Result<()> {
        self.cur.expect_keyword("FILTER")?;
        self.cur.skip_ws();

        if self.cur.take_keyword("EXISTS") {
            self.cur.skip_ws();
            let header = self.push_slot(PatternSlot::new(SlotKind::ExistsHeader))?;
            let (cs, cc) = self.group_graph_pattern()?;
            self.q.slots[header].child_start = cs;
            self.q.slots[header].child_count = cc;
            return Ok(());
        }
        if self.cur.at_keyword("NOT") {
            self.cur.expect_keyword("NOT")?;
            self.cur.skip_ws();
            self.cur.expect_keyword("EXISTS")?;
            self.cur.skip_ws();
            let header = self.push_slot(PatternSlot::new(SlotKind::NotExistsHeader))?;
            let (cs, cc) = self.group_graph_pattern()?;
            self.q.slots[header].child_start = cs;
            self.q.slots[header].child_count = cc;
            return Ok(());
        }

        let expr = self.constraint_span()?;
        let mut slot = PatternSlot::new(SlotKind::Filter);
        slot.terms[0] = TermRef::new(TermRefKind::Expr, expr.start, expr.len);
        self.push_slot(slot)?;
        Ok(())
    }

    fn bind_element(&mut self) -> Result<()> {
        self.cur.skip_ws();
        self.cur.expect_char('(')?;
        self.cur.skip_ws();
        let expr = self.expression_span_until_as()?;
        self.cur.expect_keyword("AS")?;
        self.cur.skip_ws();
        let var = self.variable()?;
        self.cur.skip_ws();
        self.cur.expect_char(')')?;

        let mut slot = PatternSlot::new(SlotKind::Bind);
        slot.terms[0] = TermRef::new(TermRefKind::Expr, expr.start, expr.len);
        slot.terms[1] = var;
        self.push_slot(slot)?;
        Ok(())
    }

    fn values_element(&mut self) -> Result<()> {
        self.cur.skip_ws();
        let mut vars = Vec::new();
        let single = matches!(self.cur.peek(), Some('?') | Some('$'));
        if single {
            vars.push(self.variable()?);
        } else {
            self.cur.expect_char('(')?;
            loop {
                self.cur.skip_ws();
                if self.cur.try_char(')') {
                    break;
                }
                vars.push(self.variable()?);
            }
        }
        if vars.is_empty() {
            return Err(self.cur.error("VALUES requires at least one variable"));
        }
        if vars.len() > 4 {
            return Err(self
                .cur
                .error("VALUES with more than 4 variables is not supported"));
        }

        let mut header = PatternSlot::new(SlotKind::ValuesHeader);
        header.extra = vars.len() as u16;
        for (i, var) in vars.iter().enumerate() {
            header.terms[i] = *var;
        }
        let header_idx = self.push_slot(header)?;
        let child_start = self.q.slots.len();

        self.cur.skip_ws();
        self.cur.expect_char('{')?;
        loop {
            self.cur.skip_ws();
            if self.cur.try_char('}') {
                break;
            }
            let mut entry = PatternSlot::new(SlotKind::ValuesEntry);
            if single {
                entry.terms[0] = self.data_value()?;
            } else {
                self.cur.expect_char('(')?;
                for i in 0..vars.len() {
                    self.cur.skip_ws();
                    entry.terms[i] = self.data_value()?;
                }
                self.cur.skip_ws();
                self.cur.expect_char(')')?;
            }
            self.push_slot(entry)?;
        }

        let count = self.q.slots.len() - child_start;
        self.q.slots[header_idx].child_start = child_start as u16;
        self.q.slots[header_idx].child_count = count as u16;
        Ok(())
    }

    fn data_value(&mut self) -> Result<TermRef> {
        self.cur.skip_ws();
        if self.cur.take_keyword("UNDEF") {
            return Ok(TermRef::UNUSED);
        }
        match self.cur.peek() {
            Some('<') => self.iri_ref(),
            Some('"') | Some('\'') => self.literal_span(),
            Some(c) if c.is_ascii_digit() || c == '+' || c == '-' => self.numeric_span(),
            Some(_) if self.cur.at_keyword("true") || self.cur.at_keyword("false") => {
                self.boolean_span()
            }
            Some(_) => self.prefixed_name(),
            None => Err(self.cur.error("expected VALUES entry")),
        }
    }

    fn graph_element(&mut self) -> Result<()> {
        self.cur.skip_ws();
        let term = match self.cur.peek() {
            Some('?') | Some('$') => self.variable()?,
            Some('<') => self.iri_ref()?,
            _ => self.prefixed_name()?,
        };
        self.cur.skip_ws();
        let mut header = PatternSlot::new(SlotKind::GraphHeader);
        header.terms[0] = term;
        let header_idx = self.push_slot(header)?;
        let (cs, cc) = self.group_graph_pattern()?;
        self.q.slots[header_idx].child_start = cs;
        self.q.slots[header_idx].child_count = cc;
        Ok(())
    }

    fn minus_element(&mut self) -> Result<()> {
        self.cur.skip_ws();
        let (start, count) = self.group_graph_pattern()?;
        for idx in start as usize..(start + count) as usize {
            match self.q.slots[idx].kind {
                SlotKind::Triple => self.q.slots[idx].kind = SlotKind::MinusTriple,
                SlotKind::Unused => {}
                _ => {
                    return Err(self
                        .cur
                        .error("MINUS supports basic graph patterns only"))
                }
            }
        }
        Ok(())
    }

    // --- triples ---

    fn triples_block(&mut self) -> Result<()> {
        let subject = self.pattern_term(false)?;
        self.property_list(subject)?;
        self.cur.skip_ws();
        let _ = self.cur.try_char('.');
        Ok(())
    }

    fn property_list(&mut self, subject: TermRef) -> Result<()> {
        loop {
            self.cur.skip_ws();
            let predicate = self.verb()?;
            loop {
                self.cur.skip_ws();
                let object = self.pattern_term(true)?;
                let mut slot = PatternSlot::new(SlotKind::Triple);
                slot.terms[0] = subject;
                slot.terms[1] = predicate;
                slot.terms[2] = object;
                self.push_slot(slot)?;
                self.cur.skip_ws();
                if !self.cur.try_char(',') {
                    break;
                }
            }
            if !self.cur.try_char(';') {
                return Ok(());
            }
            self.cur.skip_ws();
            // trailing ';' permitted
            match self.cur.peek() {
                Some('.') | Some('}') | Some(']') | None => return Ok(()),
                Some(';') => {
                    while self.cur.try_char(';') {
                        self.cur.skip_ws();
                    }
                    match self.cur.peek() {
                        Some('.') | Some('}') | Some(']') | None => return Ok(()),
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    fn verb(&mut self) -> Result<TermRef> {
        match self.cur.peek() {
            Some('?') | Some('$') => self.variable(),
            Some('<') => self.iri_ref(),
            Some('a')
                if !matches!(self.cur.peek_second(), Some(c) if is_pn_chars(c) || c == ':') =>
            {
                let start = self.cur.pos;
                self.cur.bump();
                Ok(TermRef::new(TermRefKind::RdfType, start as u32, 0))
            }
            Some(_) => self.prefixed_name(),
            None => Err(self.cur.error("expected predicate")),
        }
    }

    fn pattern_term(&mut self, object_position: bool) -> Result<TermRef> {
        self.cur.skip_ws();
        match self.cur.peek() {
            Some('?') | Some('$') => self.variable(),
            Some('<') => self.iri_ref(),
            Some('_') => self.bnode_label(),
            Some('[') => self.anon_or_property_list(),
            Some('"') | Some('\'') if object_position => self.literal_span(),
            Some(c) if object_position && (c.is_ascii_digit() || c == '+' || c == '-') => {
                self.numeric_span()
            }
            Some(_)
                if object_position
                    && (self.cur.at_keyword("true") || self.cur.at_keyword("false")) =>
            {
                self.boolean_span()
            }
            Some(_) => self.prefixed_name(),
            None => Err(self.cur.error("expected term")),
        }
    }

    fn anon_or_property_list(&mut self) -> Result<TermRef> {
        let start = self.cur.pos;
        self.cur.expect_char('[')?;
        self.cur.skip_ws();
        let anon = TermRef::new(TermRefKind::Anon, start as u32, 0);
        if self.cur.try_char(']') {
            return Ok(anon);
        }
        self.property_list(anon)?;
        self.cur.skip_ws();
        self.cur.expect_char(']')?;
        Ok(anon)
    }

    fn variable(&mut self) -> Result<TermRef> {
        match self.cur.bump() {
            Some('?') | Some('$') => {}
            _ => return Err(self.cur.error("expected variable")),
        }
        let start = self.cur.pos;
        while let Some(c) = self.cur.peek() {
            if is_pn_chars_u(c) || c.is_ascii_digit() {
                self.cur.bump();
            } else {
                break;
            }
        }
        if self.cur.pos == start {
            return Err(self.cur.error("empty variable name"));
        }
        let span = self.cur.span(start);
        Ok(TermRef::new(TermRefKind::Variable, span.start, span.len))
    }

    fn iri_ref(&mut self) -> Result<TermRef> {
        self.cur.expect_char('<')?;
        let start = self.cur.pos;
        loop {
            match self.cur.peek() {
                Some('>') => break,
                Some(c) if (c as u32) <= 0x20 => {
                    return Err(self.cur.error("whitespace or control character in IRI"))
                }
                Some('<') | Some('"') | Some('{') | Some('}') | Some('|') | Some('^')
                | Some('`') | Some('\\') => {
                    return Err(self.cur.error("character not allowed in IRI"))
                }
                Some(_) => {
                    self.cur.bump();
                }
                None => return Err(self.cur.error("unterminated IRI")),
            }
        }
        let span = self.cur.span(start);
        self.cur.expect_char('>')?;
        Ok(TermRef::new(TermRefKind::Iri, span.start, span.len))
    }

    fn prefixed_name(&mut self) -> Result<TermRef> {
        let start = self.cur.pos;
        while let Some(c) = self.cur.peek() {
            if is_pn_chars(c) || c == '.' {
                self.cur.bump();
            } else {
                break;
            }
        }
        if !self.cur.try_char(':') {
            return Err(self.cur.error("expected prefixed name"));
        }
        // local part, with the Turtle dot rules
        loop {
            match self.cur.peek() {
                Some(c) if is_pn_chars(c) || c == ':' || c == '%' => {
                    self.cur.bump();
                }
                Some('\\') => {
                    self.cur.bump();
                    self.cur.bump();
                }
                Some('.') => match self.cur.peek_second() {
                    Some(n) if is_pn_chars(n) || n == ':' || n == '.' => {
                        self.cur.bump();
                    }
                    _ => break,
                },
                _ => break,
            }
        }
        let span = self.cur.span(start);
        if span.len == 0 {
            return Err(self.cur.error("expected prefixed name"));
        }
        Ok(TermRef::new(TermRefKind::PrefixedName, span.start, span.len))
    }

    fn bnode_label(&mut self) -> Result<TermRef> {
        self.cur.expect_char('_')?;
        self.cur.expect_char(':')?;
        let start = self.cur.pos;
        match self.cur.bump() {
            Some(c) if is_pn_chars_u(c) || c.is_ascii_digit() => {}
            _ => return Err(self.cur.error("invalid blank node label")),
        }
        loop {
            match self.cur.peek() {
                Some(c) if is_pn_chars(c) => {
                    self.cur.bump();
                }
                Some('.') => match self.cur.peek_second() {
                    Some(n) if is_pn_chars(n) => {
                        self.cur.bump();
                    }
                    _ => break,
                },
                _ => break,
            }
        }
        let span = self.cur.span(start);
        Ok(TermRef::new(TermRefKind::BlankNode, span.start, span.len))
    }

    fn literal_span(&mut self) -> Result<TermRef> {
        let start = self.cur.pos;
        self.skip_string()?;
        // optional language tag or datatype
        if self.cur.try_char('@') {
            while let Some(c) = self.cur.peek() {
                if c.is_ascii_alphanumeric() || c == '-' {
                    self.cur.bump();
                } else {
                    break;
                }
            }
        } else if self.cur.peek() == Some('^') && self.cur.peek_second() == Some('^') {
            self.cur.bump();
            self.cur.bump();
            match self.cur.peek() {
                Some('<') => {
                    self.iri_ref()?;
                }
                _ => {
                    self.prefixed_name()?;
                }
            }
        }
        let span = self.cur.span(start);
        Ok(TermRef::new(TermRefKind::Literal, span.start, span.len))
    }

    fn numeric_span(&mut self) -> Result<TermRef> {
        let start = self.cur.pos;
        if matches!(self.cur.peek(), Some('+') | Some('-')) {
            self.cur.bump();
        }
        let mut digits = 0;
        while let Some(c) = self.cur.peek() {
            if c.is_ascii_digit() {
                digits += 1;
                self.cur.bump();
            } else {
                break;
            }
        }
        if self.cur.peek() == Some('.')
            && matches!(self.cur.peek_second(), Some(c) if c.is_ascii_digit())
        {
            self.cur.bump();
            while let Some(c) = self.cur.peek() {
                if c.is_ascii_digit() {
                    digits += 1;
                    self.cur.bump();
                } else {
                    break;
                }
            }
        }
        if digits == 0 {
            return Err(self.cur.error("malformed numeric literal"));
        }
        if matches!(self.cur.peek(), Some('e') | Some('E')) {
            self.cur.bump();
            if matches!(self.cur.peek(), Some('+') | Some('-')) {
                self.cur.bump();
            }
            let mut exp = 0;
            while let Some(c) = self.cur.peek() {
                if c.is_ascii_digit() {
                    exp += 1;
                    self.cur.bump();
                } else {
                    break;
                }
            }
            if exp == 0 {
                return Err(self.cur.error("exponent requires at least one digit"));
            }
        }
        let span = self.cur.span(start);
        Ok(TermRef::new(TermRefKind::Literal, span.start, span.len))
    }

    fn boolean_span(&mut self) -> Result<TermRef> {
        let start = self.cur.pos;
        if !(self.cur.take_keyword("true") || self.cur.take_keyword("false")) {
            return Err(self.cur.error("expected boolean"));
        }
        let span = self.cur.span(start);
        Ok(TermRef::new(TermRefKind::Literal, span.start, span.len))
    }

    // --- expressions as source spans ---

    fn skip_string(&mut self) -> Result<()> {
        let quote = match self.cur.bump() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Err(self.cur.error("expected string literal")),
        };
        let long = self.cur.peek() == Some(quote) && self.cur.peek_second() == Some(quote);
        if long {
            self.cur.bump();
            self.cur.bump();
        }
        loop {
            match self.cur.bump() {
                Some(c) if c == quote => {
                    if !long {
                        return Ok(());
                    }
                    if self.cur.peek() == Some(quote) && self.cur.peek_second() == Some(quote) {
                        self.cur.bump();
                        self.cur.bump();
                        return Ok(());
                    }
                }
                Some('\\') => {
                    self.cur.bump();
                }
                Some(_) => {}
                None => return Err(self.cur.error("unterminated string literal")),
            }
        }
    }

    /// Bracketed constraint `( … )` or a bare function call; the span
    /// covers the whole constraint.
    fn constraint_span(&mut self) -> Result<SourceSpan> {
        let start = self.cur.pos;
        if self.cur.peek() == Some('(') {
            self.cur.bump();
            self.scan_to_matching_paren()?;
        } else {
            // function-call form: name then balanced parens
            while let Some(c) = self.cur.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    self.cur.bump();
                } else {
                    break;
                }
            }
            self.cur.skip_ws();
            self.cur.expect_char('(')?;
            self.scan_to_matching_paren()?;
        }
        Ok(self.cur.span(start))
    }

    fn scan_to_matching_paren(&mut self) -> Result<()> {
        let mut depth = 1usize;
        loop {
            match self.cur.peek() {
                Some('"') | Some('\'') => self.skip_string()?,
                Some('(') => {
                    depth += 1;
                    self.cur.bump();
                }
                Some(')') => {
                    depth -= 1;
                    self.cur.bump();
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some('#') => {
                    while let Some(c) = self.cur.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some(_) => {
                    self.cur.bump();
                }
                None => return Err(self.cur.error("unbalanced parentheses")),
            }
        }
    }

    /// Expression text up to a top-level `AS` keyword, exclusive.
    fn expression_span_until_as(&mut self) -> Result<SourceSpan> {
        let start = self.cur.pos;
        let mut depth = 0usize;
        let mut end = self.cur.pos;
        loop {
            if depth == 0 && self.cur.at_keyword("AS") {
                break;
            }
            match self.cur.peek() {
                Some('"') | Some('\'') => {
                    self.skip_string()?;
                    end = self.cur.pos;
                }
                Some('(') => {
                    depth += 1;
                    self.cur.bump();
                    end = self.cur.pos;
                }
                Some(')') => {
                    if depth == 0 {
                        return Err(self.cur.error("expected AS in expression"));
                    }
                    depth -= 1;
                    self.cur.bump();
                    end = self.cur.pos;
                }
                Some(c) => {
                    self.cur.bump();
                    if !c.is_whitespace() {
                        end = self.cur.pos;
                    }
                }
                None => return Err(self.cur.error("unexpected end of expression")),
            }
        }
        Ok(SourceSpan {
            start: start as u32,
            len: (end - start) as u32,
        })
    }

    fn projected_expression(&mut self) -> Result<SelectItem> {
        self.cur.expect_char('(')?;
        self.cur.skip_ws();

        let aggregate = self.try_aggregate()?;
        if let Some(aggregate) = aggregate {
            self.cur.skip_ws();
            self.cur.expect_keyword("AS")?;
            self.cur.skip_ws();
            let var = self.variable()?;
            self.cur.skip_ws();
            self.cur.expect_char(')')?;
            return Ok(SelectItem {
                var,
                expr: None,
                aggregate: Some(aggregate),
            });
        }

        let expr = self.expression_span_until_as()?;
        self.cur.expect_keyword("AS")?;
        self.cur.skip_ws();
        let var = self.variable()?;
        self.cur.skip_ws();
        self.cur.expect_char(')')?;
        Ok(SelectItem {
            var,
            expr: Some(expr),
            aggregate: None,
        })
    }

    fn try_aggregate(&mut self) -> Result<Option<AggregateSpec>> {
        let function = if self.cur.at_keyword("COUNT") {
            AggregateFunction::Count
        } else if self.cur.at_keyword("SUM") {
            AggregateFunction::Sum
        } else if self.cur.at_keyword("AVG") {
            AggregateFunction::Avg
        } else if self.cur.at_keyword("MIN") {
            AggregateFunction::Min
        } else if self.cur.at_keyword("MAX") {
            AggregateFunction::Max
        } else if self.cur.at_keyword("SAMPLE") {
            AggregateFunction::Sample
        } else if self.cur.at_keyword("GROUP_CONCAT") {
            AggregateFunction::GroupConcat
        } else {
            return Ok(None);
        };

        // consume the keyword we matched
        for kw in [
            "GROUP_CONCAT",
            "COUNT",
            "SAMPLE",
            "SUM",
            "AVG",
            "MIN",
            "MAX",
        ] {
            if self.cur.take_keyword(kw) {
                break;
            }
        }
        self.cur.skip_ws();
        self.cur.expect_char('(')?;
        self.cur.skip_ws();
        let distinct = self.cur.take_keyword("DISTINCT");
        self.cur.skip_ws();

        let mut arg = None;
        if self.cur.try_char('*') {
            if function != AggregateFunction::Count {
                return Err(self.cur.error("only COUNT accepts *"));
            }
        } else {
            let start = self.cur.pos;
            let mut depth = 0usize;
            let mut end = self.cur.pos;
            loop {
                match self.cur.peek() {
                    Some('"') | Some('\'') => {
                        self.skip_string()?;
                        end = self.cur.pos;
                    }
                    Some('(') => {
                        depth += 1;
                        self.cur.bump();
                        end = self.cur.pos;
                    }
                    Some(')') if depth == 0 => break,
                    Some(';') if depth == 0 => break,
                    Some(')') => {
                        depth -= 1;
                        self.cur.bump();
                        end = self.cur.pos;
                    }
                    Some(c) => {
                        self.cur.bump();
                        if !c.is_whitespace() {
                            end = self.cur.pos;
                        }
                    }
                    None => return Err(self.cur.error("unterminated aggregate")),
                }
            }
            arg = Some(SourceSpan {
                start: start as u32,
                len: (end - start) as u32,
            });
        }

        let mut separator = None;
        self.cur.skip_ws();
        if self.cur.try_char(';') {
            self.cur.skip_ws();
            self.cur.expect_keyword("SEPARATOR")?;
            self.cur.skip_ws();
            self.cur.expect_char('=')?;
            self.cur.skip_ws();
            separator = Some(self.quoted_string_value()?);
            self.cur.skip_ws();
        }
        self.cur.expect_char(')')?;

        Ok(Some(AggregateSpec {
            function,
            distinct,
            arg,
            separator,
        }))
    }

    fn quoted_string_value(&mut self) -> Result<String> {
        let quote = match self.cur.bump() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Err(self.cur.error("expected string")),
        };
        let mut value = String::new();
        loop {
            match self.cur.bump() {
                Some(c) if c == quote => return Ok(value),
                Some('\\') => match self.cur.bump() {
                    Some('t') => value.push('\t'),
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some('\\') => value.push('\\'),
                    _ => return Err(self.cur.error("invalid escape in string")),
                },
                Some(c) => value.push(c),
                None => return Err(self.cur.error("unterminated string")),
            }
        }
    }

    // --- solution modifiers & temporal clause ---

    fn solution_modifiers(&mut self) -> Result<()> {
        loop {
            self.cur.skip_ws();
            if self.cur.take_keyword("GROUP") {
                self.cur.skip_ws();
                self.cur.expect_keyword("BY")?;
                loop {
                    self.cur.skip_ws();
                    match self.cur.peek() {
                        Some('?') | Some('$') => {
                            let start = self.cur.pos;
                            self.variable()?;
                            self.q.group_by.push(self.cur.span(start));
                        }
                        Some('(') => {
                            let start = self.cur.pos;
                            self.cur.bump();
                            self.scan_to_matching_paren()?;
                            self.q.group_by.push(self.cur.span(start));
                        }
                        _ => break,
                    }
                }
                if self.q.group_by.is_empty() {
                    return Err(self.cur.error("GROUP BY requires a grouping expression"));
                }
            } else if self.cur.take_keyword("HAVING") {
                self.cur.skip_ws();
                self.q.having = Some(self.constraint_span()?);
            } else if self.cur.take_keyword("ORDER") {
                self.cur.skip_ws();
                self.cur.expect_keyword("BY")?;
                loop {
                    self.cur.skip_ws();
                    let descending = if self.cur.take_keyword("DESC") {
                        true
                    } else {
                        let _ = self.cur.take_keyword("ASC");
                        false
                    };
                    self.cur.skip_ws();
                    match self.cur.peek() {
                        Some('(') => {
                            self.cur.bump();
                            self.cur.skip_ws();
                            let start = self.cur.pos;
                            let mut depth = 0usize;
                            let mut end = start;
                            loop {
                                match self.cur.peek() {
                                    Some('"') | Some('\'') => {
                                        self.skip_string()?;
                                        end = self.cur.pos;
                                    }
                                    Some('(') => {
                                        depth += 1;
                                        self.cur.bump();
                                        end = self.cur.pos;
                                    }
                                    Some(')') if depth == 0 => {
                                        self.cur.bump();
                                        break;
                                    }
                                    Some(')') => {
                                        depth -= 1;
                                        self.cur.bump();
                                        end = self.cur.pos;
                                    }
                                    Some(c) => {
                                        self.cur.bump();
                                        if !c.is_whitespace() {
                                            end = self.cur.pos;
                                        }
                                    }
                                    None => {
                                        return Err(self.cur.error("unterminated ORDER BY"))
                                    }
                                }
                            }
                            self.q.order_by.push(OrderCondition {
                                expr: SourceSpan {
                                    start: start as u32,
                                    len: (end - start) as u32,
                                },
                                descending,
                            });
                        }
                        Some('?') | Some('$') => {
                            let start = self.cur.pos;
                            self.variable()?;
                            self.q.order_by.push(OrderCondition {
                                expr: self.cur.span(start),
                                descending,
                            });
                        }
                        _ if descending => {
                            return Err(self.cur.error("expected ORDER BY expression"))
                        }
                        _ => break,
                    }
                }
                if self.q.order_by.is_empty() {
                    return Err(self.cur.error("ORDER BY requires a condition"));
                }
            } else if self.cur.take_keyword("LIMIT") {
                self.cur.skip_ws();
                self.q.limit = Some(self.integer()?);
            } else if self.cur.take_keyword("OFFSET") {
                self.cur.skip_ws();
                self.q.offset = Some(self.integer()?);
            } else if self.cur.at_keyword("AS") {
                self.cur.expect_keyword("AS")?;
                self.cur.skip_ws();
                self.cur.expect_keyword("OF")?;
                self.cur.skip_ws();
                let t = self.integer()?;
                self.q.temporal = Some(TemporalClause::AsOf(t));
            } else if self.cur.take_keyword("BETWEEN") {
                self.cur.skip_ws();
                let t1 = self.integer()?;
                self.cur.skip_ws();
                self.cur.expect_keyword("AND")?;
                self.cur.skip_ws();
                let t2 = self.integer()?;
                self.q.temporal = Some(TemporalClause::Between(t1, t2));
            } else {
                return Ok(());
            }
        }
    }

    fn integer(&mut self) -> Result<u64> {
        let start = self.cur.pos;
        while matches!(self.cur.peek(), Some(c) if c.is_ascii_digit()) {
            self.cur.bump();
        }
        if self.cur.pos == start {
            return Err(self.cur.error("expected integer"));
        }
        self.cur.src[start..self.cur.pos]
            .parse()
            .map_err(|_| self.cur.error("integer out of range"))
    }

    // --- updates ---

    fn update_sequence(&mut self) -> Result<()> {
        loop {
            self.prologue()?;
            self.cur.skip_ws();
            if self.cur.at_eof() {
                return Ok(());
            }

            if self.cur.take_keyword("INSERT") {
                self.cur.skip_ws();
                if self.cur.take_keyword("DATA") {
                    self.cur.skip_ws();
                    let quads = self.quad_block(true)?;
                    self.forbid_variables(quads)?;
                    self.q.updates.push(UpdateOp::InsertData { quads });
                } else {
                    let insert = self.quad_block(true)?;
                    self.cur.skip_ws();
                    self.cur.expect_keyword("WHERE")?;
                    self.cur.skip_ws();
                    let pattern = self.group_graph_pattern()?;
                    self.q.updates.push(UpdateOp::Modify {
                        delete: None,
                        insert: Some(insert),
                        pattern,
                    });
                }
            } else if self.cur.take_keyword("DELETE") {
                self.cur.skip_ws();
                if self.cur.take_keyword("DATA") {
                    self.cur.skip_ws();
                    let quads = self.quad_block(true)?;
                    self.forbid_variables(quads)?;
                    self.q.updates.push(UpdateOp::DeleteData { quads });
                } else if self.cur.take_keyword("WHERE") {
                    self.cur.skip_ws();
                    let pattern = self.group_graph_pattern()?;
                    self.q.updates.push(UpdateOp::Modify {
                        delete: Some(pattern),
                        insert: None,
                        pattern,
                    });
                } else {
                    let delete = self.quad_block(true)?;
                    self.cur.skip_ws();
                    let insert = if self.cur.take_keyword("INSERT") {
                        self.cur.skip_ws();
                        Some(self.quad_block(true)?)
                    } else {
                        None
                    };
                    self.cur.skip_ws();
                    self.cur.expect_keyword("WHERE")?;
                    self.cur.skip_ws();
                    let pattern = self.group_graph_pattern()?;
                    self.q.updates.push(UpdateOp::Modify {
                        delete: Some(delete),
                        insert,
                        pattern,
                    });
                }
            } else if self.cur.take_keyword("CLEAR") {
                let (silent, target) = self.graph_target()?;
                self.q.updates.push(UpdateOp::Clear { target, silent });
            } else if self.cur.take_keyword("DROP") {
                let (silent, target) = self.graph_target()?;
                self.q.updates.push(UpdateOp::Drop { target, silent });
            } else if self.cur.take_keyword("COPY") {
                let (silent, from, to) = self.from_to()?;
                self.q.updates.push(UpdateOp::Copy { from, to, silent });
            } else if self.cur.take_keyword("MOVE") {
                let (silent, from, to) = self.from_to()?;
                self.q.updates.push(UpdateOp::Move { from, to, silent });
            } else if self.cur.take_keyword("ADD") {
                let (silent, from, to) = self.from_to()?;
                self.q.updates.push(UpdateOp::Add { from, to, silent });
            } else {
                return Err(self.cur.error("expected update operation"));
            }

            self.cur.skip_ws();
            if !self.cur.try_char(';') {
                return Ok(());
            }
        }
    }

    fn forbid_variables(&self, range: SlotRange) -> Result<()> {
        for idx in range.0 as usize..(range.0 + range.1) as usize {
            let slot = &self.q.slots[idx];
            if slot.terms.iter().any(TermRef::is_variable) {
                return Err(StoreError::syntax(
                    self.cur.line,
                    self.cur.col,
                    "variables are not allowed in DATA blocks",
                ));
            }
        }
        Ok(())
    }

    fn graph_target(&mut self) -> Result<(bool, GraphTarget)> {
        self.cur.skip_ws();
        let silent = self.cur.take_keyword("SILENT");
        self.cur.skip_ws();
        let target = if self.cur.take_keyword("DEFAULT") {
            GraphTarget::Default
        } else if self.cur.take_keyword("NAMED") {
            GraphTarget::Named
        } else if self.cur.take_keyword("ALL") {
            GraphTarget::All
        } else if self.cur.take_keyword("GRAPH") {
            self.cur.skip_ws();
            let term = match self.cur.peek() {
                Some('<') => self.iri_ref()?,
                _ => self.prefixed_name()?,
            };
            GraphTarget::Graph(term)
        } else {
            return Err(self.cur.error("expected graph target"));
        };
        Ok((silent, target))
    }

    fn graph_or_default(&mut self) -> Result<GraphTarget> {
        self.cur.skip_ws();
        if self.cur.take_keyword("DEFAULT") {
            return Ok(GraphTarget::Default);
        }
        let _ = self.cur.take_keyword("GRAPH");
        self.cur.skip_ws();
        let term = match self.cur.peek() {
            Some('<') => self.iri_ref()?,
            _ => self.prefixed_name()?,
        };
        Ok(GraphTarget::Graph(term))
    }

    fn from_to(&mut self) -> Result<(bool, GraphTarget, GraphTarget)> {
        self.cur.skip_ws();
        let silent = self.cur.take_keyword("SILENT");
        let from = self.graph_or_default()?;
        self.cur.skip_ws();
        self.cur.expect_keyword("TO")?;
        let to = self.graph_or_default()?;
        Ok((silent, from, to))
    }

    /// `{ … }` of triples, optionally with `GRAPH g { … }` sections when
    /// `allow_graph` is set. Used by CONSTRUCT templates and updates.
    fn quad_block(&mut self, allow_graph: bool) -> Result<SlotRange> {
        self.cur.expect_char('{')?;
        let start = self.q.slots.len();
        loop {
            self.cur.skip_ws();
            if self.cur.try_char('}') {
                break;
            }
            if self.cur.peek().is_none() {
                return Err(self.cur.error("unterminated block"));
            }
            if allow_graph && self.cur.take_keyword("GRAPH") {
                self.cur.skip_ws();
                let term = match self.cur.peek() {
                    Some('?') | Some('$') => self.variable()?,
                    Some('<') => self.iri_ref()?,
                    _ => self.prefixed_name()?,
                };
                let mut header = PatternSlot::new(SlotKind::GraphHeader);
                header.terms[0] = term;
                let header_idx = self.push_slot(header)?;
                let inner_start = self.q.slots.len();
                self.cur.skip_ws();
                self.cur.expect_char('{')?;
                loop {
                    self.cur.skip_ws();
                    if self.cur.try_char('}') {
                        break;
                    }
                    self.triples_block()?;
                }
                self.q.slots[header_idx].child_start = inner_start as u16;
                self.q.slots[header_idx].child_count =
                    (self.q.slots.len() - inner_start) as u16;
                self.cur.skip_ws();
                let _ = self.cur.try_char('.');
            } else {
                self.triples_block()?;
            }
        }
        Ok((start as u16, (self.q.slots.len() - start) as u16))
    }
}
