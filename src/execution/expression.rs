// SPARQL expression evaluation. Filter and BIND expressions live as
// source spans in the pattern buffer and are parsed here on demand;
// evaluation errors inside FILTER drop the row rather than the query.

use regex::RegexBuilder;
use std::collections::HashMap;

use crate::atoms::{vocab, AtomDictionary, Term};
use crate::error::{Result, StoreError};
use crate::execution::aggregate::Accumulator;
use crate::execution::solution::{format_double, Binding, Row};
use crate::parser::lexer::{is_pn_chars, is_pn_chars_u};
use crate::parser::resolve_iri;
use crate::sparql::{AggregateFunction, AggregateSpec};

/// A computed value during expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Iri(String),
    Blank(String),
    Literal {
        value: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

impl Value {
    pub fn simple(value: impl Into<String>) -> Value {
        Value::Literal {
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn from_term(term: &Term) -> Value {
        match term {
            Term::Iri(iri) => Value::Iri(iri.clone()),
            Term::BlankNode(label) => Value::Blank(label.clone()),
            Term::Literal {
                value,
                lang,
                datatype,
            } => Value::Literal {
                value: value.clone(),
                lang: lang.clone(),
                datatype: datatype.clone(),
            },
        }
    }

    pub fn to_term(&self) -> Term {
        match self {
            Value::Iri(iri) => Term::iri(iri.clone()),
            Value::Blank(label) => Term::blank(label.clone()),
            Value::Literal {
                value,
                lang,
                datatype,
            } => Term::Literal {
                value: value.clone(),
                lang: lang.clone(),
                datatype: datatype.clone(),
            },
            Value::Integer(i) => Term::typed_literal(i.to_string(), vocab::XSD_INTEGER),
            Value::Double(d) => Term::typed_literal(format_double(*d), vocab::XSD_DOUBLE),
            Value::Boolean(b) => Term::typed_literal(b.to_string(), vocab::XSD_BOOLEAN),
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Value::Integer(i) => Some(Numeric::Int(*i)),
            Value::Double(d) => Some(Numeric::Dbl(*d)),
            Value::Literal {
                value,
                lang: None,
                datatype: Some(dt),
            } => match dt.as_str() {
                vocab::XSD_INTEGER => value.parse().ok().map(Numeric::Int),
                vocab::XSD_DECIMAL | vocab::XSD_DOUBLE => value.parse().ok().map(Numeric::Dbl),
                "http://www.w3.org/2001/XMLSchema#float"
                | "http://www.w3.org/2001/XMLSchema#long"
                | "http://www.w3.org/2001/XMLSchema#int" => value.parse().ok().map(Numeric::Dbl),
                _ => None,
            },
            _ => None,
        }
    }

    fn string_content(&self) -> Option<&str> {
        match self {
            Value::Literal {
                value,
                lang: _,
                datatype,
            } if datatype.is_none() || datatype.as_deref() == Some(vocab::XSD_STRING) => {
                Some(value)
            }
            Value::Literal { value, lang: Some(_), .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Int(i64),
    Dbl(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Dbl(d) => d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Bound,
    Str,
    Lang,
    Datatype,
    Iri,
    StrLen,
    UCase,
    LCase,
    Concat,
    Contains,
    StrStarts,
    StrEnds,
    SubStr,
    Replace,
    Abs,
    Ceil,
    Floor,
    Round,
    IsIri,
    IsBlank,
    IsLiteral,
    IsNumeric,
    SameTerm,
    LangMatches,
    Regex,
    If,
    Coalesce,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Var(String),
    Constant(Value),
    Call(Func, Vec<Expr>),
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        arg: Option<Box<Expr>>,
        separator: Option<String>,
    },
}

/// Evaluation environment: the variable table, the dictionary for atom
/// resolution, and (inside HAVING) the rows of the current group.
pub struct EvalContext<'a> {
    pub vars: &'a [String],
    pub dict: &'a AtomDictionary,
    pub group: Option<&'a [Row]>,
}

impl EvalContext<'_> {
    fn var_index(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| v == name)
    }
}

fn type_error(msg: impl Into<String>) -> StoreError {
    StoreError::TypeError(msg.into())
}

pub fn binding_to_value(binding: &Binding, dict: &AtomDictionary) -> Result<Option<Value>> {
    match binding {
        Binding::Unbound => Ok(None),
        Binding::Atom(atom) => {
            let text = dict
                .lookup(*atom)
                .ok_or_else(|| type_error("dangling atom in binding"))?;
            let term = Term::parse_canonical(&text)?;
            Ok(Some(Value::from_term(&term)))
        }
        Binding::Integer(i) => Ok(Some(Value::Integer(*i))),
        Binding::Double(d) => Ok(Some(Value::Double(*d))),
        Binding::Boolean(b) => Ok(Some(Value::Boolean(*b))),
    }
}

pub fn value_to_binding(value: &Value, dict: &AtomDictionary) -> Result<Binding> {
    match value {
        Value::Integer(i) => Ok(Binding::Integer(*i)),
        Value::Double(d) => Ok(Binding::Double(*d)),
        Value::Boolean(b) => Ok(Binding::Boolean(*b)),
        other => {
            let atom = dict.intern(&other.to_term().canonical())?;
            Ok(Binding::Atom(atom))
        }
    }
}

/// Effective boolean value per SPARQL 17.2.2.
pub fn effective_boolean_value(value: &Value) -> Result<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Integer(i) => Ok(*i != 0),
        Value::Double(d) => Ok(!(d.is_nan() || *d == 0.0)),
        literal @ Value::Literal {
            value,
            lang: None,
            datatype,
        } => match datatype.as_deref() {
            None | Some(vocab::XSD_STRING) => Ok(!value.is_empty()),
            Some(vocab::XSD_BOOLEAN) => Ok(value == "true" || value == "1"),
            Some(_) => match literal.numeric() {
                Some(n) => Ok(n.as_f64() != 0.0),
                None => Err(type_error("no effective boolean value")),
            },
        },
        Value::Literal { value, lang: Some(_), .. } => Ok(!value.is_empty()),
        _ => Err(type_error("no effective boolean value")),
    }
}

// ---------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------

/// Prefix and base context for resolving constants inside expressions.
pub struct ExprContext<'a> {
    pub prefixes: &'a HashMap<String, String>,
    pub base: Option<&'a str>,
}

struct ExprParser<'a, 'c> {
    src: &'a str,
    pos: usize,
    ctx: &'c ExprContext<'c>,
}

/// Parse an expression from its source span.
pub fn parse_expression(src: &str, ctx: &ExprContext<'_>) -> Result<Expr> {
    let mut parser = ExprParser { src, pos: 0, ctx };
    parser.skip_ws();
    let expr = parser.or_expr()?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(StoreError::TypeError(format!(
            "trailing content in expression: {:?}",
            &parser.src[parser.pos..]
        )));
    }
    Ok(expr)
}

impl<'a, 'c> ExprParser<'a, 'c> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut it = self.src[self.pos..].chars();
        it.next();
        it.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn err(&self, msg: impl Into<String>) -> StoreError {
        StoreError::TypeError(format!("bad expression: {}", msg.into()))
    }

    fn take_str(&mut self, s: &str) -> bool {
        if self.src[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// `<` opens an IRI constant when a matching `>` arrives before any
    /// whitespace; otherwise it is the less-than operator.
    fn at_iri_open(&self) -> bool {
        let rest = &self.src[self.pos..];
        if !rest.starts_with('<') {
            return false;
        }
        for c in rest[1..].chars() {
            match c {
                '>' => return true,
                c if c.is_whitespace() => return false,
                '<' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => return false,
                _ => {}
            }
        }
        false
    }

    fn at_keyword(&self, kw: &str) -> bool {
        let rest = &self.src[self.pos..];
        rest.len() >= kw.len()
            && rest[..kw.len()].eq_ignore_ascii_case(kw)
            && !matches!(rest[kw.len()..].chars().next(), Some(c) if c.is_alphanumeric() || c == '_')
    }

    fn take_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += kw.len();
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        loop {
            self.skip_ws();
            if self.take_str("||") {
                self.skip_ws();
                let right = self.and_expr()?;
                left = Expr::Or(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.relational()?;
        loop {
            self.skip_ws();
            if self.take_str("&&") {
                self.skip_ws();
                let right = self.relational()?;
                left = Expr::And(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn relational(&mut self) -> Result<Expr> {
        let left = self.additive()?;
        self.skip_ws();
        let op = if self.take_str("!=") {
            CmpOp::Ne
        } else if self.take_str("<=") {
            CmpOp::Le
        } else if self.take_str(">=") {
            CmpOp::Ge
        } else if self.take_str("=") {
            CmpOp::Eq
        } else if self.peek() == Some('<') && !self.at_iri_open() {
            self.bump();
            CmpOp::Lt
        } else if self.take_str(">") {
            CmpOp::Gt
        } else {
            return Ok(left);
        };
        self.skip_ws();
        let right = self.additive()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            self.skip_ws();
            if self.take_str("+") {
                self.skip_ws();
                let right = self.multiplicative()?;
                left = Expr::Arith(ArithOp::Add, Box::new(left), Box::new(right));
            } else if self.peek() == Some('-') {
                self.bump();
                self.skip_ws();
                let right = self.multiplicative()?;
                left = Expr::Arith(ArithOp::Sub, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            if self.take_str("*") {
                self.skip_ws();
                let right = self.unary()?;
                left = Expr::Arith(ArithOp::Mul, Box::new(left), Box::new(right));
            } else if self.take_str("/") {
                self.skip_ws();
                let right = self.unary()?;
                left = Expr::Arith(ArithOp::Div, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        self.skip_ws();
        if self.peek() == Some('!') && self.peek2() != Some('=') {
            self.bump();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.peek() == Some('-') {
            self.bump();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.peek() == Some('+') {
            self.bump();
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.bump();
                let expr = self.or_expr()?;
                self.skip_ws();
                if !self.take_str(")") {
                    return Err(self.err("expected ')'"));
                }
                Ok(expr)
            }
            Some('?') | Some('$') => {
                self.bump();
                let start = self.pos;
                while matches!(self.peek(), Some(c) if is_pn_chars_u(c) || c.is_ascii_digit()) {
                    self.bump();
                }
                if self.pos == start {
                    return Err(self.err("empty variable"));
                }
                Ok(Expr::Var(self.src[start..self.pos].to_string()))
            }
            Some('<') => {
                self.bump();
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c != '>') {
                    self.bump();
                }
                if !self.take_str(">") {
                    return Err(self.err("unterminated IRI"));
                }
                let iri = &self.src[start..self.pos - 1];
                let resolved = match self.ctx.base {
                    Some(base) if !crate::parser::is_absolute_iri(iri) => resolve_iri(base, iri),
                    _ => iri.to_string(),
                };
                Ok(Expr::Constant(Value::Iri(resolved)))
            }
            Some('"') | Some('\'') => self.string_literal(),
            Some(c) if c.is_ascii_digit()
                || (c == '.' && matches!(self.peek2(), Some(d) if d.is_ascii_digit())) =>
            {
                self.numeric_literal()
            }
            Some(_) => self.keyword_or_name(),
            None => Err(self.err("unexpected end of expression")),
        }
    }

    fn string_literal(&mut self) -> Result<Expr> {
        let quote = self.bump().expect("peeked");
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('t') => value.push('\t'),
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some('\\') => value.push('\\'),
                    _ => return Err(self.err("invalid escape")),
                },
                Some(c) => value.push(c),
                None => return Err(self.err("unterminated string")),
            }
        }

        let mut lang = None;
        let mut datatype = None;
        if self.take_str("@") {
            let start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '-') {
                self.bump();
            }
            lang = Some(self.src[start..self.pos].to_string());
        } else if self.take_str("^^") {
            match self.peek() {
                Some('<') => {
                    self.bump();
                    let start = self.pos;
                    while matches!(self.peek(), Some(c) if c != '>') {
                        self.bump();
                    }
                    if !self.take_str(">") {
                        return Err(self.err("unterminated datatype IRI"));
                    }
                    datatype = Some(self.src[start..self.pos - 1].to_string());
                }
                _ => {
                    let (prefix, local) = self.pname()?;
                    let ns = self
                        .ctx
                        .prefixes
                        .get(&prefix)
                        .ok_or(StoreError::UnknownPrefix(prefix))?;
                    datatype = Some(format!("{ns}{local}"));
                }
            }
        }
        Ok(Expr::Constant(Value::Literal {
            value,
            lang,
            datatype,
        }))
    }

    fn numeric_literal(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut decimal = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek2(), Some(d) if d.is_ascii_digit()) {
            decimal = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            decimal = true;
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = &self.src[start..self.pos];
        if decimal {
            text.parse::<f64>()
                .map(|d| Expr::Constant(Value::Double(d)))
                .map_err(|_| self.err("bad numeric literal"))
        } else {
            text.parse::<i64>()
                .map(|i| Expr::Constant(Value::Integer(i)))
                .map_err(|_| self.err("bad numeric literal"))
        }
    }

    fn pname(&mut self) -> Result<(String, String)> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_pn_chars(c)) {
            self.bump();
        }
        let prefix = self.src[start..self.pos].to_string();
        if !self.take_str(":") {
            return Err(self.err("expected ':' in prefixed name"));
        }
        let lstart = self.pos;
        while matches!(self.peek(), Some(c) if is_pn_chars(c) || c == '.' || c == '%') {
            self.bump();
        }
        Ok((prefix, self.src[lstart..self.pos].to_string()))
    }

    fn keyword_or_name(&mut self) -> Result<Expr> {
        if self.take_keyword("true") {
            return Ok(Expr::Constant(Value::Boolean(true)));
        }
        if self.take_keyword("false") {
            return Ok(Expr::Constant(Value::Boolean(false)));
        }

        for (kw, function) in [
            ("COUNT", AggregateFunction::Count),
            ("SUM", AggregateFunction::Sum),
            ("AVG", AggregateFunction::Avg),
            ("MIN", AggregateFunction::Min),
            ("MAX", AggregateFunction::Max),
            ("SAMPLE", AggregateFunction::Sample),
            ("GROUP_CONCAT", AggregateFunction::GroupConcat),
        ] {
            if self.at_keyword(kw) {
                self.take_keyword(kw);
                return self.aggregate_call(function);
            }
        }

        let functions: &[(&str, Func)] = &[
            ("BOUND", Func::Bound),
            ("STRLEN", Func::StrLen),
            ("STRSTARTS", Func::StrStarts),
            ("STRENDS", Func::StrEnds),
            ("STR", Func::Str),
            ("LANGMATCHES", Func::LangMatches),
            ("LANG", Func::Lang),
            ("DATATYPE", Func::Datatype),
            ("IRI", Func::Iri),
            ("URI", Func::Iri),
            ("UCASE", Func::UCase),
            ("LCASE", Func::LCase),
            ("CONCAT", Func::Concat),
            ("CONTAINS", Func::Contains),
            ("SUBSTR", Func::SubStr),
            ("REPLACE", Func::Replace),
            ("ABS", Func::Abs),
            ("CEIL", Func::Ceil),
            ("FLOOR", Func::Floor),
            ("ROUND", Func::Round),
            ("ISIRI", Func::IsIri),
            ("ISURI", Func::IsIri),
            ("ISBLANK", Func::IsBlank),
            ("ISLITERAL", Func::IsLiteral),
            ("ISNUMERIC", Func::IsNumeric),
            ("SAMETERM", Func::SameTerm),
            ("REGEX", Func::Regex),
            ("IF", Func::If),
            ("COALESCE", Func::Coalesce),
        ];
        for (kw, func) in functions {
            if self.at_keyword(kw) {
                self.take_keyword(kw);
                let args = self.call_args()?;
                return Ok(Expr::Call(*func, args));
            }
        }

        // prefixed-name constant
        let (prefix, local) = self.pname()?;
        let ns = self
            .ctx
            .prefixes
            .get(&prefix)
            .ok_or(StoreError::UnknownPrefix(prefix))?;
        Ok(Expr::Constant(Value::Iri(format!("{ns}{local}"))))
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        self.skip_ws();
        if !self.take_str("(") {
            return Err(self.err("expected '(' after function name"));
        }
        let mut args = Vec::new();
        self.skip_ws();
        if self.take_str(")") {
            return Ok(args);
        }
        loop {
            args.push(self.or_expr()?);
            self.skip_ws();
            if self.take_str(",") {
                self.skip_ws();
                continue;
            }
            if self.take_str(")") {
                return Ok(args);
            }
            return Err(self.err("expected ',' or ')' in arguments"));
        }
    }

    fn aggregate_call(&mut self, function: AggregateFunction) -> Result<Expr> {
        self.skip_ws();
        if !self.take_str("(") {
            return Err(self.err("expected '(' after aggregate"));
        }
        self.skip_ws();
        let distinct = self.take_keyword("DISTINCT");
        self.skip_ws();

        let arg = if self.take_str("*") {
            None
        } else {
            Some(Box::new(self.or_expr()?))
        };

        let mut separator = None;
        self.skip_ws();
        if self.take_str(";") {
            self.skip_ws();
            if !self.take_keyword("SEPARATOR") {
                return Err(self.err("expected SEPARATOR"));
            }
            self.skip_ws();
            if !self.take_str("=") {
                return Err(self.err("expected '='"));
            }
            self.skip_ws();
            match self.string_literal()? {
                Expr::Constant(Value::Literal { value, .. }) => separator = Some(value),
                _ => return Err(self.err("separator must be a string")),
            }
            self.skip_ws();
        }
        if !self.take_str(")") {
            return Err(self.err("expected ')' after aggregate"));
        }
        Ok(Expr::Aggregate {
            function,
            distinct,
            arg,
            separator,
        })
    }
}

/// Build the aggregate expression an `AggregateSpec` from the query
/// header describes.
pub fn aggregate_expr(spec: &AggregateSpec, source: &str, ctx: &ExprContext<'_>) -> Result<Expr> {
    let arg = match &spec.arg {
        Some(span) => Some(Box::new(parse_expression(span.text(source), ctx)?)),
        None => None,
    };
    Ok(Expr::Aggregate {
        function: spec.function,
        distinct: spec.distinct,
        arg,
        separator: spec.separator.clone(),
    })
}

// ---------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------

pub fn eval(expr: &Expr, row: &Row, ctx: &EvalContext<'_>) -> Result<Value> {
    match expr {
        Expr::Constant(v) => Ok(v.clone()),
        Expr::Var(name) => {
            let idx = ctx
                .var_index(name)
                .ok_or_else(|| type_error(format!("unknown variable ?{name}")))?;
            match binding_to_value(&row.values[idx], ctx.dict)? {
                Some(v) => Ok(v),
                None => Err(type_error(format!("unbound variable ?{name}"))),
            }
        }
        Expr::Or(a, b) => {
            let left = eval(a, row, ctx).and_then(|v| effective_boolean_value(&v));
            match left {
                Ok(true) => Ok(Value::Boolean(true)),
                Ok(false) => {
                    let right = effective_boolean_value(&eval(b, row, ctx)?)?;
                    Ok(Value::Boolean(right))
                }
                Err(e) => match eval(b, row, ctx).and_then(|v| effective_boolean_value(&v)) {
                    Ok(true) => Ok(Value::Boolean(true)),
                    _ => Err(e),
                },
            }
        }
        Expr::And(a, b) => {
            let left = eval(a, row, ctx).and_then(|v| effective_boolean_value(&v));
            match left {
                Ok(false) => Ok(Value::Boolean(false)),
                Ok(true) => {
                    let right = effective_boolean_value(&eval(b, row, ctx)?)?;
                    Ok(Value::Boolean(right))
                }
                Err(e) => match eval(b, row, ctx).and_then(|v| effective_boolean_value(&v)) {
                    Ok(false) => Ok(Value::Boolean(false)),
                    _ => Err(e),
                },
            }
        }
        Expr::Not(inner) => {
            let v = effective_boolean_value(&eval(inner, row, ctx)?)?;
            Ok(Value::Boolean(!v))
        }
        Expr::Neg(inner) => match eval(inner, row, ctx)?.numeric() {
            Some(Numeric::Int(i)) => Ok(Value::Integer(-i)),
            Some(Numeric::Dbl(d)) => Ok(Value::Double(-d)),
            None => Err(type_error("unary minus on non-numeric")),
        },
        Expr::Compare(op, a, b) => {
            let left = eval(a, row, ctx)?;
            let right = eval(b, row, ctx)?;
            compare(*op, &left, &right)
        }
        Expr::Arith(op, a, b) => {
            let left = eval(a, row, ctx)?
                .numeric()
                .ok_or_else(|| type_error("arithmetic on non-numeric"))?;
            let right = eval(b, row, ctx)?
                .numeric()
                .ok_or_else(|| type_error("arithmetic on non-numeric"))?;
            arith(*op, left, right)
        }
        Expr::Call(func, args) => call(*func, args, row, ctx),
        Expr::Aggregate {
            function,
            distinct,
            arg,
            separator,
        } => {
            let group = ctx
                .group
                .ok_or_else(|| type_error("aggregate outside of grouping"))?;
            let mut acc = Accumulator::new(*function, *distinct, separator.clone());
            for group_row in group {
                match arg {
                    None => acc.update_star(),
                    Some(expr) => match eval(expr, group_row, ctx) {
                        Ok(v) => acc.update(&v)?,
                        Err(e) if e.is_value_error() => {}
                        Err(e) => return Err(e),
                    },
                }
            }
            acc.finish()
                .ok_or_else(|| type_error("aggregate over incompatible values"))
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value> {
    use std::cmp::Ordering;

    let ordering = if let (Some(l), Some(r)) = (left.numeric(), right.numeric()) {
        l.as_f64()
            .partial_cmp(&r.as_f64())
            .ok_or_else(|| type_error("NaN comparison"))?
    } else if let (Some(l), Some(r)) = (left.string_content(), right.string_content()) {
        l.cmp(r)
    } else if let (Value::Boolean(l), Value::Boolean(r)) = (left, right) {
        l.cmp(r)
    } else {
        // term equality is still defined for IRIs and blanks
        return match op {
            CmpOp::Eq => Ok(Value::Boolean(left == right)),
            CmpOp::Ne => Ok(Value::Boolean(left != right)),
            _ => Err(type_error("type mismatch in comparison")),
        };
    };

    let result = match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    };
    Ok(Value::Boolean(result))
}

fn arith(op: ArithOp, left: Numeric, right: Numeric) -> Result<Value> {
    if let (Numeric::Int(l), Numeric::Int(r)) = (left, right) {
        let result = match op {
            ArithOp::Add => l.checked_add(r),
            ArithOp::Sub => l.checked_sub(r),
            ArithOp::Mul => l.checked_mul(r),
            ArithOp::Div => {
                if r == 0 {
                    return Err(type_error("division by zero"));
                }
                return Ok(Value::Double(l as f64 / r as f64));
            }
        };
        return result
            .map(Value::Integer)
            .ok_or_else(|| type_error("integer overflow"));
    }

    let l = left.as_f64();
    let r = right.as_f64();
    let result = match op {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div => {
            if r == 0.0 {
                return Err(type_error("division by zero"));
            }
            l / r
        }
    };
    Ok(Value::Double(result))
}

fn string_arg(value: &Value) -> Result<String> {
    match value {
        Value::Literal { value, .. } => Ok(value.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Double(d) => Ok(format_double(*d)),
        Value::Boolean(b) => Ok(b.to_string()),
        _ => Err(type_error("expected a literal")),
    }
}

fn call(func: Func, args: &[Expr], row: &Row, ctx: &EvalContext<'_>) -> Result<Value> {
    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(type_error("wrong number of arguments"))
        }
    };

    match func {
        Func::Bound => {
            arity(1)?;
            let Expr::Var(name) = &args[0] else {
                return Err(type_error("BOUND requires a variable"));
            };
            let idx = ctx
                .var_index(name)
                .ok_or_else(|| type_error(format!("unknown variable ?{name}")))?;
            Ok(Value::Boolean(row.values[idx].is_bound()))
        }
        Func::If => {
            arity(3)?;
            let cond = effective_boolean_value(&eval(&args[0], row, ctx)?)?;
            eval(if cond { &args[1] } else { &args[2] }, row, ctx)
        }
        Func::Coalesce => {
            for arg in args {
                if let Ok(v) = eval(arg, row, ctx) {
                    return Ok(v);
                }
            }
            Err(type_error("COALESCE exhausted"))
        }
        _ => {
            let values: Vec<Value> = args
                .iter()
                .map(|a| eval(a, row, ctx))
                .collect::<Result<_>>()?;
            strict_call(func, &values)
        }
    }
}

fn strict_call(func: Func, values: &[Value]) -> Result<Value> {
    let arity = |n: usize| -> Result<()> {
        if values.len() == n {
            Ok(())
        } else {
            Err(type_error("wrong number of arguments"))
        }
    };

    match func {
        Func::Str => {
            arity(1)?;
            match &values[0] {
                Value::Iri(iri) => Ok(Value::simple(iri.clone())),
                other => Ok(Value::simple(string_arg(other)?)),
            }
        }
        Func::Lang => {
            arity(1)?;
            match &values[0] {
                Value::Literal { lang, .. } => {
                    Ok(Value::simple(lang.clone().unwrap_or_default()))
                }
                Value::Integer(_) | Value::Double(_) | Value::Boolean(_) => {
                    Ok(Value::simple(""))
                }
                _ => Err(type_error("LANG expects a literal")),
            }
        }
        Func::Datatype => {
            arity(1)?;
            match &values[0] {
                Value::Literal {
                    lang: Some(_), ..
                } => Ok(Value::Iri(vocab::RDF_LANG_STRING.to_string())),
                Value::Literal {
                    datatype: Some(dt), ..
                } => Ok(Value::Iri(dt.clone())),
                Value::Literal { .. } => Ok(Value::Iri(vocab::XSD_STRING.to_string())),
                Value::Integer(_) => Ok(Value::Iri(vocab::XSD_INTEGER.to_string())),
                Value::Double(_) => Ok(Value::Iri(vocab::XSD_DOUBLE.to_string())),
                Value::Boolean(_) => Ok(Value::Iri(vocab::XSD_BOOLEAN.to_string())),
                _ => Err(type_error("DATATYPE expects a literal")),
            }
        }
        Func::Iri => {
            arity(1)?;
            match &values[0] {
                Value::Iri(iri) => Ok(Value::Iri(iri.clone())),
                Value::Literal { value, .. } => Ok(Value::Iri(value.clone())),
                _ => Err(type_error("IRI expects a string or IRI")),
            }
        }
        Func::StrLen => {
            arity(1)?;
            Ok(Value::Integer(string_arg(&values[0])?.chars().count() as i64))
        }
        Func::UCase => {
            arity(1)?;
            keep_language(&values[0], |s| s.to_uppercase())
        }
        Func::LCase => {
            arity(1)?;
            keep_language(&values[0], |s| s.to_lowercase())
        }
        Func::Concat => {
            // CONCAT() yields the plain empty literal, distinct from
            // unbound
            let mut out = String::new();
            for v in values {
                out.push_str(&string_arg(v)?);
            }
            Ok(Value::simple(out))
        }
        Func::Contains => {
            arity(2)?;
            Ok(Value::Boolean(
                string_arg(&values[0])?.contains(&string_arg(&values[1])?),
            ))
        }
        Func::StrStarts => {
            arity(2)?;
            Ok(Value::Boolean(
                string_arg(&values[0])?.starts_with(&string_arg(&values[1])?),
            ))
        }
        Func::StrEnds => {
            arity(2)?;
            Ok(Value::Boolean(
                string_arg(&values[0])?.ends_with(&string_arg(&values[1])?),
            ))
        }
        Func::SubStr => {
            if values.len() != 2 && values.len() != 3 {
                return Err(type_error("SUBSTR takes 2 or 3 arguments"));
            }
            let s = string_arg(&values[0])?;
            let start = values[1]
                .numeric()
                .ok_or_else(|| type_error("SUBSTR start must be numeric"))?
                .as_f64() as i64;
            let chars: Vec<char> = s.chars().collect();
            let from = (start.max(1) - 1) as usize;
            let taken: String = match values.get(2) {
                Some(len_v) => {
                    let len = len_v
                        .numeric()
                        .ok_or_else(|| type_error("SUBSTR length must be numeric"))?
                        .as_f64() as usize;
                    chars.iter().skip(from).take(len).collect()
                }
                None => chars.iter().skip(from).collect(),
            };
            keep_language(&values[0], |_| taken.clone())
        }
        Func::Replace => {
            if values.len() != 3 && values.len() != 4 {
                return Err(type_error("REPLACE takes 3 or 4 arguments"));
            }
            let s = string_arg(&values[0])?;
            let pattern = string_arg(&values[1])?;
            let replacement = string_arg(&values[2])?;
            let flags = values.get(3).map(string_arg).transpose()?.unwrap_or_default();
            let re = build_regex(&pattern, &flags)?;
            keep_language(&values[0], |_| {
                re.replace_all(&s, replacement.as_str()).into_owned()
            })
        }
        Func::Abs => numeric_unary(&values[0], i64::abs, f64::abs),
        Func::Ceil => numeric_unary(&values[0], |i| i, f64::ceil),
        Func::Floor => numeric_unary(&values[0], |i| i, f64::floor),
        Func::Round => numeric_unary(&values[0], |i| i, f64::round),
        Func::IsIri => {
            arity(1)?;
            Ok(Value::Boolean(matches!(values[0], Value::Iri(_))))
        }
        Func::IsBlank => {
            arity(1)?;
            Ok(Value::Boolean(matches!(values[0], Value::Blank(_))))
        }
        Func::IsLiteral => {
            arity(1)?;
            Ok(Value::Boolean(matches!(
                values[0],
                Value::Literal { .. } | Value::Integer(_) | Value::Double(_) | Value::Boolean(_)
            )))
        }
        Func::IsNumeric => {
            arity(1)?;
            Ok(Value::Boolean(values[0].numeric().is_some()))
        }
        Func::SameTerm => {
            arity(2)?;
            Ok(Value::Boolean(values[0] == values[1]))
        }
        Func::LangMatches => {
            arity(2)?;
            let tag = string_arg(&values[0])?.to_ascii_lowercase();
            let range = string_arg(&values[1])?.to_ascii_lowercase();
            let matched = if range == "*" {
                !tag.is_empty()
            } else {
                tag == range || tag.starts_with(&format!("{range}-"))
            };
            Ok(Value::Boolean(matched))
        }
        Func::Regex => {
            if values.len() != 2 && values.len() != 3 {
                return Err(type_error("REGEX takes 2 or 3 arguments"));
            }
            let text = string_arg(&values[0])?;
            let pattern = string_arg(&values[1])?;
            let flags = values.get(2).map(string_arg).transpose()?.unwrap_or_default();
            let re = build_regex(&pattern, &flags)?;
            Ok(Value::Boolean(re.is_match(&text)))
        }
        Func::Bound | Func::If | Func::Coalesce => unreachable!("handled before evaluation"),
    }
}

fn keep_language(original: &Value, f: impl Fn(&str) -> String) -> Result<Value> {
    match original {
        Value::Literal {
            value,
            lang,
            datatype,
        } => Ok(Value::Literal {
            value: f(value),
            lang: lang.clone(),
            datatype: datatype.clone(),
        }),
        other => Ok(Value::simple(f(&string_arg(other)?))),
    }
}

fn numeric_unary(
    value: &Value,
    int_op: impl Fn(i64) -> i64,
    dbl_op: impl Fn(f64) -> f64,
) -> Result<Value> {
    match value.numeric() {
        Some(Numeric::Int(i)) => Ok(Value::Integer(int_op(i))),
        Some(Numeric::Dbl(d)) => Ok(Value::Double(dbl_op(d))),
        None => Err(type_error("expected a numeric value")),
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<regex::Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            other => return Err(type_error(format!("unsupported regex flag {other:?}"))),
        }
    }
    builder
        .build()
        .map_err(|e| type_error(format!("invalid regex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx_fixture() -> (TempDir, AtomDictionary, HashMap<String, String>) {
        let dir = TempDir::new().unwrap();
        let dict = AtomDictionary::open(&dir.path().join("atoms.strings")).unwrap();
        let mut prefixes = HashMap::new();
        prefixes.insert("ex".to_string(), "http://ex/".to_string());
        (dir, dict, prefixes)
    }

    fn eval_str(src: &str, dict: &AtomDictionary, prefixes: &HashMap<String, String>) -> Result<Value> {
        let expr = parse_expression(
            src,
            &ExprContext {
                prefixes,
                base: None,
            },
        )?;
        let vars: Vec<String> = vec!["v".to_string()];
        let row = Row::unit(1);
        eval(
            &expr,
            &row,
            &EvalContext {
                vars: &vars,
                dict,
                group: None,
            },
        )
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("1 + 2 * 3", &dict, &prefixes).unwrap(),
            Value::Integer(7)
        );
        assert_eq!(
            eval_str("(1 + 2) * 3", &dict, &prefixes).unwrap(),
            Value::Integer(9)
        );
        assert_eq!(
            eval_str("7 / 2", &dict, &prefixes).unwrap(),
            Value::Double(3.5)
        );
        assert!(eval_str("1 / 0", &dict, &prefixes).is_err());
    }

    #[test]
    fn test_comparisons_and_logic() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("2 < 3 && \"a\" < \"b\"", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            eval_str("2 >= 3 || true", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            eval_str("!(1 = 2)", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_type_error_on_mixed_comparison() {
        let (_d, dict, prefixes) = ctx_fixture();
        let result = eval_str("<http://ex/a> < 3", &dict, &prefixes);
        assert!(matches!(result, Err(StoreError::TypeError(_))));
        // equality across kinds is still well-defined
        assert_eq!(
            eval_str("<http://ex/a> = <http://ex/a>", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_string_functions() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("STRLEN(\"héllo\")", &dict, &prefixes).unwrap(),
            Value::Integer(5)
        );
        assert_eq!(
            eval_str("UCASE(\"ab\")", &dict, &prefixes).unwrap(),
            Value::simple("AB")
        );
        assert_eq!(
            eval_str("SUBSTR(\"hello\", 2, 3)", &dict, &prefixes).unwrap(),
            Value::simple("ell")
        );
        assert_eq!(
            eval_str("CONTAINS(\"haystack\", \"stack\")", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            eval_str("REPLACE(\"aaa\", \"a\", \"b\")", &dict, &prefixes).unwrap(),
            Value::simple("bbb")
        );
    }

    #[test]
    fn test_empty_concat_is_plain_empty_literal() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("CONCAT()", &dict, &prefixes).unwrap(),
            Value::simple("")
        );
    }

    #[test]
    fn test_bound_and_coalesce_on_unbound() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("BOUND(?v)", &dict, &prefixes).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            eval_str("COALESCE(?v, \"fallback\")", &dict, &prefixes).unwrap(),
            Value::simple("fallback")
        );
        assert!(eval_str("?v + 1", &dict, &prefixes).is_err());
    }

    #[test]
    fn test_regex_flags() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("REGEX(\"Hello\", \"^h\", \"i\")", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            eval_str("REGEX(\"Hello\", \"^h\")", &dict, &prefixes).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_lang_and_datatype() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("LANG(\"chat\"@fr)", &dict, &prefixes).unwrap(),
            Value::simple("fr")
        );
        assert_eq!(
            eval_str("LANGMATCHES(LANG(\"x\"@en-GB), \"en\")", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            eval_str("DATATYPE(\"plain\")", &dict, &prefixes).unwrap(),
            Value::Iri(vocab::XSD_STRING.to_string())
        );
        assert_eq!(
            eval_str("DATATYPE(5)", &dict, &prefixes).unwrap(),
            Value::Iri(vocab::XSD_INTEGER.to_string())
        );
    }

    #[test]
    fn test_prefixed_name_constant() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str("ex:thing = <http://ex/thing>", &dict, &prefixes).unwrap(),
            Value::Boolean(true)
        );
        assert!(matches!(
            eval_str("missing:thing", &dict, &prefixes),
            Err(StoreError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn test_numeric_typed_literal_promotes() {
        let (_d, dict, prefixes) = ctx_fixture();
        assert_eq!(
            eval_str(
                "\"5\"^^<http://www.w3.org/2001/XMLSchema#integer> + 1",
                &dict,
                &prefixes
            )
            .unwrap(),
            Value::Integer(6)
        );
    }
}
