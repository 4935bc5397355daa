// Plan construction: one walk over the pattern buffer, index selection
// deferred to the store's bound-prefix rule, join order settled by
// cardinality estimates.

use std::collections::{HashMap, HashSet};

use crate::atoms::{vocab, AtomId, Term};
use crate::error::{Result, StoreError};
use crate::execution::expression::{parse_expression, Expr, ExprContext};
use crate::execution::solution::Binding;
use crate::parser::{is_absolute_iri, resolve_iri};
use crate::sparql::{ParsedQuery, PatternSlot, SlotKind, SourceSpan, TermRef, TermRefKind};
use crate::store::{QuadPattern, QuadStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternNode {
    Var(usize),
    /// A constant; `None` means the term is unknown to the dictionary,
    /// so the pattern can never match.
    Const(Option<AtomId>),
}

#[derive(Debug, Clone, Copy)]
pub struct TriplePattern {
    pub subject: PatternNode,
    pub predicate: PatternNode,
    pub object: PatternNode,
}

impl TriplePattern {
    fn vars(&self) -> impl Iterator<Item = usize> + '_ {
        [self.subject, self.predicate, self.object]
            .into_iter()
            .filter_map(|n| match n {
                PatternNode::Var(v) => Some(v),
                PatternNode::Const(_) => None,
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum GraphSpec {
    Fixed(Option<AtomId>),
    Var(usize),
}

#[derive(Debug)]
pub enum PlanNode {
    Unit,
    Bgp(Vec<TriplePattern>),
    Join(Box<PlanNode>, Box<PlanNode>),
    LeftJoin(Box<PlanNode>, Box<PlanNode>),
    Union(Box<PlanNode>, Box<PlanNode>),
    Minus(Box<PlanNode>, Vec<TriplePattern>),
    Filter(Box<PlanNode>, SourceSpan),
    Extend(Box<PlanNode>, usize, SourceSpan),
    Graph(GraphSpec, Box<PlanNode>),
    Values {
        vars: Vec<usize>,
        rows: Vec<Vec<Binding>>,
    },
    Exists {
        input: Box<PlanNode>,
        pattern: Box<PlanNode>,
        negated: bool,
    },
}

fn join(left: PlanNode, right: PlanNode) -> PlanNode {
    match left {
        PlanNode::Unit => right,
        left => PlanNode::Join(Box::new(left), Box::new(right)),
    }
}

/// Builds the plan tree and owns the variable table. Blank nodes and
/// anonymous nodes in patterns become internal variables whose names
/// start with a space, which no SPARQL variable can.
pub struct Planner<'a> {
    store: &'a QuadStore,
    source: &'a str,
    query: &'a ParsedQuery,
    pub prefixes: HashMap<String, String>,
    pub base: Option<String>,
    pub vars: Vec<String>,
}

impl<'a> Planner<'a> {
    pub fn new(store: &'a QuadStore, source: &'a str, query: &'a ParsedQuery) -> Result<Self> {
        let base = query.prologue.base.map(|span| span.text(source).to_string());
        let mut prefixes = HashMap::new();
        for binding in &query.prologue.prefixes {
            let prefix = &source
                [binding.prefix_start as usize..(binding.prefix_start + binding.prefix_len) as usize];
            let iri =
                &source[binding.iri_start as usize..(binding.iri_start + binding.iri_len) as usize];
            let resolved = match &base {
                Some(base) if !is_absolute_iri(iri) => resolve_iri(base, iri),
                _ => iri.to_string(),
            };
            prefixes.insert(prefix.to_string(), resolved);
        }
        Ok(Self {
            store,
            source,
            query,
            prefixes,
            base,
            vars: Vec::new(),
        })
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn store(&self) -> &'a QuadStore {
        self.store
    }

    pub fn expr_context(&self) -> ExprContext<'_> {
        ExprContext {
            prefixes: &self.prefixes,
            base: self.base.as_deref(),
        }
    }

    pub fn parse_expr(&self, span: SourceSpan) -> Result<Expr> {
        parse_expression(span.text(self.source), &self.expr_context())
    }

    pub fn var_index(&mut self, name: &str) -> usize {
        if let Some(idx) = self.vars.iter().position(|v| v == name) {
            return idx;
        }
        self.vars.push(name.to_string());
        self.vars.len() - 1
    }

    /// Expand a term reference into its full `Term`; variables have no
    /// term form.
    pub fn term_ref_to_term(&self, tref: &TermRef) -> Result<Option<Term>> {
        let text = tref.text(self.source);
        match tref.kind {
            TermRefKind::Variable | TermRefKind::Unused | TermRefKind::Expr => Ok(None),
            TermRefKind::RdfType => Ok(Some(Term::iri(vocab::RDF_TYPE))),
            TermRefKind::Iri => {
                let resolved = match &self.base {
                    Some(base) if !is_absolute_iri(text) => resolve_iri(base, text),
                    _ => text.to_string(),
                };
                Ok(Some(Term::iri(resolved)))
            }
            TermRefKind::PrefixedName => {
                let (prefix, local) = text
                    .split_once(':')
                    .ok_or_else(|| StoreError::Internal("malformed prefixed name".to_string()))?;
                let ns = self
                    .prefixes
                    .get(prefix)
                    .ok_or_else(|| StoreError::UnknownPrefix(prefix.to_string()))?;
                let local: String = local.chars().filter(|&c| c != '\\').collect();
                Ok(Some(Term::iri(format!("{ns}{local}"))))
            }
            TermRefKind::BlankNode => Ok(Some(Term::blank(text))),
            TermRefKind::Anon => Ok(Some(Term::blank(format!("anon{}", tref.start)))),
            TermRefKind::Literal => Ok(Some(self.parse_literal(text)?)),
        }
    }

    fn parse_literal(&self, text: &str) -> Result<Term> {
        let bytes = text.as_bytes();
        match bytes.first() {
            Some(b'"') | Some(b'\'') => self.parse_quoted_literal(text),
            Some(_) if text == "true" || text == "false" => {
                Ok(Term::typed_literal(text, vocab::XSD_BOOLEAN))
            }
            Some(_) => {
                // numeric literal as written
                let datatype = if text.contains(['e', 'E']) {
                    vocab::XSD_DOUBLE
                } else if text.contains('.') {
                    vocab::XSD_DECIMAL
                } else {
                    vocab::XSD_INTEGER
                };
                Ok(Term::typed_literal(text, datatype))
            }
            None => Err(StoreError::Internal("empty literal span".to_string())),
        }
    }

    fn parse_quoted_literal(&self, text: &str) -> Result<Term> {
        let mut chars = text.chars().peekable();
        let quote = chars.next().expect("non-empty literal");
        let mut value = String::new();
        loop {
            match chars.next() {
                Some(c) if c == quote => break,
                Some('\\') => match chars.next() {
                    Some('t') => value.push('\t'),
                    Some('b') => value.push('\u{8}'),
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('f') => value.push('\u{c}'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some('\\') => value.push('\\'),
                    Some(other) => value.push(other),
                    None => {
                        return Err(StoreError::Internal("unterminated literal span".to_string()))
                    }
                },
                Some(c) => value.push(c),
                None => return Err(StoreError::Internal("unterminated literal span".to_string())),
            }
        }

        let suffix: String = chars.collect();
        if let Some(lang) = suffix.strip_prefix('@') {
            return Ok(Term::lang_literal(value, lang));
        }
        if let Some(dt) = suffix.strip_prefix("^^") {
            let datatype = if let Some(inner) = dt.strip_prefix('<').and_then(|d| d.strip_suffix('>'))
            {
                match &self.base {
                    Some(base) if !is_absolute_iri(inner) => resolve_iri(base, inner),
                    _ => inner.to_string(),
                }
            } else {
                let (prefix, local) = dt
                    .split_once(':')
                    .ok_or_else(|| StoreError::Internal("malformed datatype".to_string()))?;
                let ns = self
                    .prefixes
                    .get(prefix)
                    .ok_or_else(|| StoreError::UnknownPrefix(prefix.to_string()))?;
                format!("{ns}{local}")
            };
            return Ok(Term::typed_literal(value, datatype));
        }
        Ok(Term::literal(value))
    }

    /// Pattern position: variables (and blanks, which act as variables
    /// in patterns) become var slots; constants resolve through the
    /// dictionary without interning.
    fn resolve_pattern_node(&mut self, tref: &TermRef) -> Result<PatternNode> {
        match tref.kind {
            TermRefKind::Variable => {
                let name = tref.text(self.source).to_string();
                Ok(PatternNode::Var(self.var_index(&name)))
            }
            TermRefKind::BlankNode => {
                let name = format!(" bnode:{}", tref.text(self.source));
                Ok(PatternNode::Var(self.var_index(&name)))
            }
            TermRefKind::Anon => {
                let name = format!(" anon:{}", tref.start);
                Ok(PatternNode::Var(self.var_index(&name)))
            }
            _ => {
                let term = self
                    .term_ref_to_term(tref)?
                    .ok_or_else(|| StoreError::Internal("constant expected".to_string()))?;
                Ok(PatternNode::Const(
                    self.store.atoms().get(&term.canonical()),
                ))
            }
        }
    }

    fn triple_pattern(&mut self, slot: &PatternSlot) -> Result<TriplePattern> {
        Ok(TriplePattern {
            subject: self.resolve_pattern_node(&slot.terms[0])?,
            predicate: self.resolve_pattern_node(&slot.terms[1])?,
            object: self.resolve_pattern_node(&slot.terms[2])?,
        })
    }

    fn flush_bgp(&self, plan: PlanNode, bgp: &mut Vec<TriplePattern>) -> Result<PlanNode> {
        if bgp.is_empty() {
            return Ok(plan);
        }
        let ordered = self.order_bgp(std::mem::take(bgp))?;
        Ok(join(plan, PlanNode::Bgp(ordered)))
    }

    /// Plan one slot range; nested headers consume their children.
    pub fn plan_group(&mut self, start: usize, end: usize) -> Result<PlanNode> {
        let mut plan = PlanNode::Unit;
        let mut bgp: Vec<TriplePattern> = Vec::new();
        let mut i = start;

        while i < end {
            let slot = self.query.slots[i];
            match slot.kind {
                SlotKind::Unused => {
                    i += 1;
                }
                SlotKind::Triple => {
                    bgp.push(self.triple_pattern(&slot)?);
                    i += 1;
                }
                SlotKind::MinusTriple => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let mut patterns = Vec::new();
                    while i < end && self.query.slots[i].kind == SlotKind::MinusTriple {
                        let slot = self.query.slots[i];
                        patterns.push(self.triple_pattern(&slot)?);
                        i += 1;
                    }
                    plan = PlanNode::Minus(Box::new(plan), patterns);
                }
                SlotKind::Filter => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let term = slot.terms[0];
                    plan = PlanNode::Filter(
                        Box::new(plan),
                        SourceSpan {
                            start: term.start,
                            len: term.len,
                        },
                    );
                    i += 1;
                }
                SlotKind::Bind => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let expr = slot.terms[0];
                    let name = slot.terms[1].text(self.source).to_string();
                    let var = self.var_index(&name);
                    plan = PlanNode::Extend(
                        Box::new(plan),
                        var,
                        SourceSpan {
                            start: expr.start,
                            len: expr.len,
                        },
                    );
                    i += 1;
                }
                SlotKind::OptionalHeader => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let children = slot.children();
                    let sub = self.plan_group(children.start, children.end)?;
                    plan = PlanNode::LeftJoin(Box::new(plan), Box::new(sub));
                    i = (i + 1).max(children.end);
                }
                SlotKind::UnionHeader => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let children = slot.children();
                    let split = children.start + slot.extra as usize;
                    let left = self.plan_group(children.start, split)?;
                    let right = self.plan_group(split, children.end)?;
                    plan = join(plan, PlanNode::Union(Box::new(left), Box::new(right)));
                    i = (i + 1).max(children.end);
                }
                SlotKind::GraphHeader => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let spec = match slot.terms[0].kind {
                        TermRefKind::Variable => {
                            let name = slot.terms[0].text(self.source).to_string();
                            GraphSpec::Var(self.var_index(&name))
                        }
                        _ => {
                            let term = self.term_ref_to_term(&slot.terms[0])?.ok_or_else(|| {
                                StoreError::Internal("graph term expected".to_string())
                            })?;
                            GraphSpec::Fixed(self.store.atoms().get(&term.canonical()))
                        }
                    };
                    let children = slot.children();
                    let sub = self.plan_group(children.start, children.end)?;
                    plan = join(plan, PlanNode::Graph(spec, Box::new(sub)));
                    i = (i + 1).max(children.end);
                }
                SlotKind::ExistsHeader | SlotKind::NotExistsHeader => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let children = slot.children();
                    let sub = self.plan_group(children.start, children.end)?;
                    plan = PlanNode::Exists {
                        input: Box::new(plan),
                        pattern: Box::new(sub),
                        negated: slot.kind == SlotKind::NotExistsHeader,
                    };
                    i = (i + 1).max(children.end);
                }
                SlotKind::ValuesHeader => {
                    plan = self.flush_bgp(plan, &mut bgp)?;
                    let width = slot.extra as usize;
                    let mut vars = Vec::with_capacity(width);
                    for term in slot.terms.iter().take(width) {
                        let name = term.text(self.source).to_string();
                        vars.push(self.var_index(&name));
                    }
                    let mut rows = Vec::new();
                    let children = slot.children();
                    for entry_idx in children.clone() {
                        let entry = self.query.slots[entry_idx];
                        let mut row = Vec::with_capacity(width);
                        for term in entry.terms.iter().take(width) {
                            if term.kind == TermRefKind::Unused {
                                row.push(Binding::Unbound);
                            } else {
                                let term = self.term_ref_to_term(term)?.ok_or_else(|| {
                                    StoreError::Internal("VALUES entry expected".to_string())
                                })?;
                                // VALUES constants must survive even when
                                // absent from the store
                                let atom = self.store.atoms().intern(&term.canonical())?;
                                row.push(Binding::Atom(atom));
                            }
                        }
                        rows.push(row);
                    }
                    plan = join(plan, PlanNode::Values { vars, rows });
                    i = (i + 1).max(children.end);
                }
                SlotKind::ValuesEntry => {
                    // reached only if detached from its header
                    i += 1;
                }
            }
        }

        plan = self.flush_bgp(plan, &mut bgp)?;
        Ok(plan)
    }

    /// Greedy join order: cheapest estimated pattern first, then prefer
    /// patterns connected to already-bound variables.
    fn order_bgp(&self, patterns: Vec<TriplePattern>) -> Result<Vec<TriplePattern>> {
        if patterns.len() <= 1 {
            return Ok(patterns);
        }

        let mut estimates = Vec::with_capacity(patterns.len());
        for p in &patterns {
            estimates.push(self.estimate(p)?);
        }

        let mut remaining: Vec<usize> = (0..patterns.len()).collect();
        let mut ordered = Vec::with_capacity(patterns.len());
        let mut bound: HashSet<usize> = HashSet::new();

        while !remaining.is_empty() {
            let pick = remaining
                .iter()
                .enumerate()
                .min_by_key(|(_, &idx)| {
                    let connected = ordered.is_empty()
                        || patterns[idx].vars().any(|v| bound.contains(&v));
                    (!connected, estimates[idx])
                })
                .map(|(pos, _)| pos)
                .expect("remaining is non-empty");
            let idx = remaining.swap_remove(pick);
            bound.extend(patterns[idx].vars());
            ordered.push(patterns[idx]);
        }
        Ok(ordered)
    }

    fn estimate(&self, pattern: &TriplePattern) -> Result<u64> {
        let as_const = |node: PatternNode| match node {
            PatternNode::Const(Some(atom)) => Some(atom),
            _ => None,
        };
        if matches!(pattern.subject, PatternNode::Const(None))
            || matches!(pattern.predicate, PatternNode::Const(None))
            || matches!(pattern.object, PatternNode::Const(None))
        {
            return Ok(0);
        }
        self.store.estimate(QuadPattern {
            subject: as_const(pattern.subject),
            predicate: as_const(pattern.predicate),
            object: as_const(pattern.object),
            graph: None,
        })
    }
}
