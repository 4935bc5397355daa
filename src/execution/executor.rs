// Query evaluation over the plan tree. Solutions are materialized
// binding tables; joins bind through the indices, with a hash join when
// the left side fits the materialization budget.

use std::collections::{HashMap, HashSet};

use crate::atoms::{AtomDictionary, AtomId, Term};
use crate::common::CancelToken;
use crate::error::{Result, StoreError};
use crate::execution::expression::{
    aggregate_expr, effective_boolean_value, eval as eval_expr, parse_expression,
    value_to_binding, Expr, EvalContext, ExprContext,
};
use crate::execution::planner::{GraphSpec, PatternNode, PlanNode, Planner, TriplePattern};
use crate::execution::solution::{compare_bindings, Binding, Row};
use crate::sparql::{ParsedQuery, QueryKind, SlotRange, TemporalClause, TermRefKind};
use crate::store::{QuadPattern, QuadStore, TemporalScope};

/// The three result shapes.
#[derive(Debug)]
pub enum QueryResults {
    Solutions {
        vars: Vec<String>,
        rows: Vec<Vec<Option<Term>>>,
    },
    Boolean(bool),
    Graph(Vec<[Term; 3]>),
}

enum ActiveGraph {
    Default,
    Fixed(AtomId),
}

fn binding_to_atom(binding: &Binding, dict: &AtomDictionary) -> Option<AtomId> {
    match binding {
        Binding::Atom(atom) => Some(*atom),
        Binding::Unbound => None,
        inline => {
            let term = inline.to_term(dict)?;
            dict.get(&term.canonical())
        }
    }
}

fn bindings_equal(a: &Binding, b: &Binding, dict: &AtomDictionary) -> bool {
    a == b || a.key(dict) == b.key(dict)
}

pub struct Executor<'a> {
    store: &'a QuadStore,
    source: &'a str,
    query: &'a ParsedQuery,
    vars: Vec<String>,
    prefixes: HashMap<String, String>,
    base: Option<String>,
    scope: TemporalScope,
    budget: usize,
    cancel: CancelToken,
    default_graphs: Vec<AtomId>,
    named_graphs: Vec<AtomId>,
}

/// Parse, plan, and evaluate a read query.
pub fn execute_query(
    store: &QuadStore,
    source: &str,
    cancel: &CancelToken,
) -> Result<QueryResults> {
    let query = crate::sparql::parse(source)?;
    if query.kind == QueryKind::Update {
        return Err(StoreError::Internal(
            "update request passed to the query executor".to_string(),
        ));
    }
    execute_parsed(store, source, &query, cancel)
}

pub fn execute_parsed(
    store: &QuadStore,
    source: &str,
    query: &ParsedQuery,
    cancel: &CancelToken,
) -> Result<QueryResults> {
    let mut planner = Planner::new(store, source, query)?;
    let plan = planner.plan_group(query.root.0 as usize, (query.root.0 + query.root.1) as usize)?;

    // projection variables must exist before the row width freezes
    for item in &query.projection.items {
        let name = item.var.text(source).to_string();
        planner.var_index(&name);
    }

    let scope = match query.temporal {
        Some(TemporalClause::AsOf(t)) => TemporalScope::AsOf(t),
        Some(TemporalClause::Between(t1, t2)) => TemporalScope::Between(t1, t2),
        None => TemporalScope::AsOf(store.now()),
    };

    // dataset: FROM builds the default-graph set, FROM NAMED the
    // iterable named graphs
    let mut default_graphs = Vec::new();
    let mut named_graphs = Vec::new();
    for clause in &query.dataset {
        let term = planner
            .term_ref_to_term(&clause.iri)?
            .ok_or_else(|| StoreError::Internal("dataset clause without IRI".to_string()))?;
        let atom = store.atoms().get(&term.canonical());
        let Some(atom) = atom else { continue };
        if clause.named {
            named_graphs.push(atom);
        } else {
            default_graphs.push(atom);
        }
    }
    if default_graphs.is_empty() {
        default_graphs.push(AtomId::DEFAULT_GRAPH);
    }
    let from_named_declared = query.dataset.iter().any(|c| c.named);
    if !from_named_declared {
        named_graphs = store.named_graphs();
    }

    let executor = Executor {
        store,
        source,
        query,
        prefixes: planner.prefixes.clone(),
        base: planner.base.clone(),
        vars: planner.vars.clone(),
        scope,
        budget: store.materialization_budget(),
        cancel: cancel.clone(),
        default_graphs,
        named_graphs,
    };
    executor.run(&plan, &planner)
}

impl<'a> Executor<'a> {
    fn width(&self) -> usize {
        self.vars.len()
    }

    fn dict(&self) -> &AtomDictionary {
        self.store.atoms()
    }

    fn expr_ctx(&self) -> ExprContext<'_> {
        ExprContext {
            prefixes: &self.prefixes,
            base: self.base.as_deref(),
        }
    }

    fn eval_ctx<'g>(&'g self, group: Option<&'g [Row]>) -> EvalContext<'g> {
        EvalContext {
            vars: &self.vars,
            dict: self.store.atoms(),
            group,
        }
    }

    fn run(&self, plan: &PlanNode, planner: &Planner<'_>) -> Result<QueryResults> {
        let unit = vec![Row::unit(self.width())];
        let mut rows = self.eval(plan, unit, &ActiveGraph::Default)?;

        let has_aggregates = self
            .query
            .projection
            .items
            .iter()
            .any(|i| i.aggregate.is_some());
        let needs_grouping =
            !self.query.group_by.is_empty() || has_aggregates || self.query.having.is_some();

        if needs_grouping {
            rows = self.grouped(rows)?;
        } else {
            // projection expressions without aggregation
            for item in &self.query.projection.items {
                let Some(expr_span) = item.expr else { continue };
                let expr = parse_expression(expr_span.text(self.source), &self.expr_ctx())?;
                let var = self.var_of(&item.var)?;
                let ctx = self.eval_ctx(None);
                for row in &mut rows {
                    match eval_expr(&expr, row, &ctx) {
                        Ok(v) => row.values[var] = value_to_binding(&v, self.dict())?,
                        Err(e) if e.is_value_error() => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        if !self.query.order_by.is_empty() {
            self.order(&mut rows)?;
        }

        match self.query.kind {
            QueryKind::Ask => Ok(QueryResults::Boolean(!rows.is_empty())),
            QueryKind::Select => self.shape_select(rows),
            QueryKind::Construct => self.shape_construct(rows, planner),
            QueryKind::Describe => self.shape_describe(rows, planner),
            QueryKind::Update => Err(StoreError::Internal(
                "update request passed to the query executor".to_string(),
            )),
        }
    }

    fn var_of(&self, tref: &crate::sparql::TermRef) -> Result<usize> {
        let name = tref.text(self.source);
        self.vars
            .iter()
            .position(|v| v == name)
            .ok_or_else(|| StoreError::Internal(format!("unregistered variable ?{name}")))
    }

    // --- plan evaluation ---

    fn eval(&self, plan: &PlanNode, input: Vec<Row>, graph: &ActiveGraph) -> Result<Vec<Row>> {
        match plan {
            PlanNode::Unit => Ok(input),
            PlanNode::Bgp(patterns) => {
                let mut rows = input;
                for pattern in patterns {
                    if rows.is_empty() {
                        break;
                    }
                    rows = self.scan_extend(rows, pattern, graph)?;
                }
                Ok(rows)
            }
            PlanNode::Join(l, r) => {
                let lrows = self.eval(l, input, graph)?;
                if lrows.is_empty() {
                    return Ok(lrows);
                }
                if lrows.len() > 1 && lrows.len() <= self.budget && is_independent(r) {
                    let rrows = self.eval(r, vec![Row::unit(self.width())], graph)?;
                    Ok(self.hash_join(lrows, rrows))
                } else {
                    self.eval(r, lrows, graph)
                }
            }
            PlanNode::LeftJoin(l, r) => {
                let lrows = self.eval(l, input, graph)?;
                let mut out = Vec::new();
                for lrow in lrows {
                    self.cancel.check()?;
                    let sub = self.eval(r, vec![lrow.clone()], graph)?;
                    if sub.is_empty() {
                        out.push(lrow);
                    } else {
                        out.extend(sub);
                    }
                }
                Ok(out)
            }
            PlanNode::Union(l, r) => {
                let mut rows = self.eval(l, input.clone(), graph)?;
                rows.extend(self.eval(r, input, graph)?);
                Ok(rows)
            }
            PlanNode::Minus(l, patterns) => {
                let lrows = self.eval(l, input, graph)?;
                if lrows.is_empty() {
                    return Ok(lrows);
                }
                let minus_plan = PlanNode::Bgp(patterns.clone());
                let mrows = self.eval(&minus_plan, vec![Row::unit(self.width())], graph)?;
                let dict = self.dict();
                Ok(lrows
                    .into_iter()
                    .filter(|lrow| {
                        !mrows.iter().any(|mrow| {
                            let mut shared_bound = false;
                            for v in 0..self.width() {
                                let (a, b) = (&lrow.values[v], &mrow.values[v]);
                                if a.is_bound() && b.is_bound() {
                                    if !bindings_equal(a, b, dict) {
                                        return false;
                                    }
                                    shared_bound = true;
                                }
                            }
                            shared_bound
                        })
                    })
                    .collect())
            }
            PlanNode::Filter(p, span) => {
                let rows = self.eval(p, input, graph)?;
                let expr = parse_expression(span.text(self.source), &self.expr_ctx())?;
                let ctx = self.eval_ctx(None);
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    self.cancel.check()?;
                    match eval_expr(&expr, &row, &ctx).and_then(|v| effective_boolean_value(&v)) {
                        Ok(true) => out.push(row),
                        Ok(false) => {}
                        Err(e) if e.is_value_error() => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(out)
            }
            PlanNode::Extend(p, var, span) => {
                let rows = self.eval(p, input, graph)?;
                let expr = parse_expression(span.text(self.source), &self.expr_ctx())?;
                let ctx = self.eval_ctx(None);
                let mut out = Vec::with_capacity(rows.len());
                for mut row in rows {
                    if row.values[*var].is_bound() {
                        // a second binding for the same variable fails
                        // the row
                        continue;
                    }
                    match eval_expr(&expr, &row, &ctx) {
                        Ok(v) => row.values[*var] = value_to_binding(&v, self.dict())?,
                        Err(e) if e.is_value_error() => {}
                        Err(e) => return Err(e),
                    }
                    out.push(row);
                }
                Ok(out)
            }
            PlanNode::Graph(spec, sub) => match spec {
                GraphSpec::Fixed(None) => Ok(Vec::new()),
                GraphSpec::Fixed(Some(g)) => self.eval(sub, input, &ActiveGraph::Fixed(*g)),
                GraphSpec::Var(v) => {
                    let mut out = Vec::new();
                    for row in input {
                        self.cancel.check()?;
                        match binding_to_atom(&row.values[*v], self.dict()) {
                            Some(g) if g != AtomId::DEFAULT_GRAPH => {
                                out.extend(self.eval(
                                    sub,
                                    vec![row.clone()],
                                    &ActiveGraph::Fixed(g),
                                )?);
                            }
                            Some(_) => {}
                            None if row.values[*v].is_bound() => {}
                            None => {
                                // the default graph is never named; only
                                // named graphs bind ?g
                                for &g in &self.named_graphs {
                                    let mut bound = row.clone();
                                    bound.values[*v] = Binding::Atom(g);
                                    out.extend(self.eval(
                                        sub,
                                        vec![bound],
                                        &ActiveGraph::Fixed(g),
                                    )?);
                                }
                            }
                        }
                    }
                    Ok(out)
                }
            },
            PlanNode::Values { vars, rows: vrows } => {
                let dict = self.dict();
                let mut out = Vec::new();
                for row in input {
                    for vrow in vrows {
                        let mut merged = row.clone();
                        let mut ok = true;
                        for (slot, value) in vars.iter().zip(vrow) {
                            if !value.is_bound() {
                                continue;
                            }
                            let current = &merged.values[*slot];
                            if current.is_bound() {
                                if !bindings_equal(current, value, dict) {
                                    ok = false;
                                    break;
                                }
                            } else {
                                merged.values[*slot] = value.clone();
                            }
                        }
                        if ok {
                            out.push(merged);
                        }
                    }
                }
                Ok(out)
            }
            PlanNode::Exists {
                input: inner,
                pattern,
                negated,
            } => {
                let rows = self.eval(inner, input, graph)?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    self.cancel.check()?;
                    let matched = !self.eval(pattern, vec![row.clone()], graph)?.is_empty();
                    if matched != *negated {
                        out.push(row);
                    }
                }
                Ok(out)
            }
        }
    }

    fn scan_extend(
        &self,
        rows: Vec<Row>,
        pattern: &TriplePattern,
        graph: &ActiveGraph,
    ) -> Result<Vec<Row>> {
        let dict = self.dict();
        let nodes = [pattern.subject, pattern.predicate, pattern.object];
        let mut out = Vec::new();

        for row in rows {
            self.cancel.check()?;

            let mut subst = [Option::<AtomId>::None; 3];
            let mut unmatchable = false;
            for (i, node) in nodes.iter().enumerate() {
                match node {
                    PatternNode::Const(Some(atom)) => subst[i] = Some(*atom),
                    PatternNode::Const(None) => unmatchable = true,
                    PatternNode::Var(v) => {
                        let binding = &row.values[*v];
                        if binding.is_bound() {
                            match binding_to_atom(binding, dict) {
                                Some(atom) => subst[i] = Some(atom),
                                None => unmatchable = true,
                            }
                        }
                    }
                }
            }
            if unmatchable {
                continue;
            }

            let (graph_bound, graph_filter) = match graph {
                ActiveGraph::Fixed(g) => (Some(*g), None),
                ActiveGraph::Default => {
                    if self.default_graphs.len() == 1 {
                        (Some(self.default_graphs[0]), None)
                    } else {
                        (None, Some(&self.default_graphs))
                    }
                }
            };

            let mut cursor = self.store.query(
                QuadPattern {
                    subject: subst[0],
                    predicate: subst[1],
                    object: subst[2],
                    graph: graph_bound,
                },
                self.scope,
            )?;
            while let Some(quad) = cursor.next()? {
                self.cancel.check()?;
                if let Some(allowed) = graph_filter {
                    if !allowed.contains(&quad.graph) {
                        continue;
                    }
                }
                let values = [quad.subject, quad.predicate, quad.object];
                let mut new_row = row.clone();
                let mut ok = true;
                for (i, node) in nodes.iter().enumerate() {
                    if let PatternNode::Var(v) = node {
                        let current = &new_row.values[*v];
                        if current.is_bound() {
                            // repeated variable within one pattern
                            match binding_to_atom(current, dict) {
                                Some(atom) if atom == values[i] => {}
                                _ => {
                                    ok = false;
                                    break;
                                }
                            }
                        } else {
                            new_row.values[*v] = Binding::Atom(values[i]);
                        }
                    }
                }
                if ok {
                    out.push(new_row);
                }
            }
        }
        Ok(out)
    }

    fn hash_join(&self, lrows: Vec<Row>, rrows: Vec<Row>) -> Vec<Row> {
        let dict = self.dict();
        let width = self.width();

        let bound_somewhere = |rows: &[Row], v: usize| rows.iter().any(|r| r.values[v].is_bound());
        let shared: Vec<usize> = (0..width)
            .filter(|&v| bound_somewhere(&lrows, v) && bound_somewhere(&rrows, v))
            .collect();

        let merge = |l: &Row, r: &Row| -> Option<Row> {
            let mut merged = l.clone();
            for v in 0..width {
                let rv = &r.values[v];
                if !rv.is_bound() {
                    continue;
                }
                let lv = &merged.values[v];
                if lv.is_bound() {
                    if !bindings_equal(lv, rv, dict) {
                        return None;
                    }
                } else {
                    merged.values[v] = rv.clone();
                }
            }
            Some(merged)
        };

        if shared.is_empty() {
            let mut out = Vec::with_capacity(lrows.len() * rrows.len());
            for l in &lrows {
                for r in &rrows {
                    if let Some(m) = merge(l, r) {
                        out.push(m);
                    }
                }
            }
            return out;
        }

        // Build side: right rows with every shared variable bound hash
        // cleanly; partially-bound rows fall back to a scan list.
        let mut buckets: HashMap<Vec<String>, Vec<&Row>> = HashMap::new();
        let mut loose: Vec<&Row> = Vec::new();
        for r in &rrows {
            if shared.iter().all(|&v| r.values[v].is_bound()) {
                buckets
                    .entry(r.dedup_key(&shared, dict))
                    .or_default()
                    .push(r);
            } else {
                loose.push(r);
            }
        }

        let mut out = Vec::new();
        for l in &lrows {
            if shared.iter().all(|&v| l.values[v].is_bound()) {
                if let Some(candidates) = buckets.get(&l.dedup_key(&shared, dict)) {
                    for r in candidates {
                        if let Some(m) = merge(l, r) {
                            out.push(m);
                        }
                    }
                }
                for r in &loose {
                    if let Some(m) = merge(l, r) {
                        out.push(m);
                    }
                }
            } else {
                for r in &rrows {
                    if let Some(m) = merge(l, r) {
                        out.push(m);
                    }
                }
            }
        }
        out
    }

    // --- grouping ---

    fn grouped(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        let group_exprs: Vec<Expr> = self
            .query
            .group_by
            .iter()
            .map(|span| parse_expression(span.text(self.source), &self.expr_ctx()))
            .collect::<Result<_>>()?;
        let ctx = self.eval_ctx(None);

        let mut order: Vec<Vec<String>> = Vec::new();
        let mut groups: HashMap<Vec<String>, Vec<Row>> = HashMap::new();
        for row in rows {
            self.cancel.check()?;
            let key: Vec<String> = group_exprs
                .iter()
                .map(|e| match eval_expr(e, &row, &ctx) {
                    Ok(v) => format!("{v:?}"),
                    Err(_) => "!err".to_string(),
                })
                .collect();
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(row);
        }

        // aggregation over zero groups still yields one row when nothing
        // is grouped by
        if groups.is_empty() && self.query.group_by.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), Vec::new());
        }

        let having_expr = self
            .query
            .having
            .map(|span| parse_expression(span.text(self.source), &self.expr_ctx()))
            .transpose()?;

        let mut out = Vec::new();
        for key in order {
            let group_rows = groups.remove(&key).unwrap_or_default();
            let mut row = Row::unit(self.width());

            // grouping variables carry into the group row
            for expr in &group_exprs {
                if let Expr::Var(name) = expr {
                    if let Some(idx) = self.vars.iter().position(|v| v == name) {
                        if let Some(first) = group_rows.first() {
                            row.values[idx] = first.values[idx].clone();
                        }
                    }
                }
            }

            let group_ctx = self.eval_ctx(Some(&group_rows));
            for item in &self.query.projection.items {
                let var = self.var_of(&item.var)?;
                if let Some(spec) = &item.aggregate {
                    let expr = aggregate_expr(spec, self.source, &self.expr_ctx())?;
                    match eval_expr(&expr, &row, &group_ctx) {
                        Ok(v) => row.values[var] = value_to_binding(&v, self.dict())?,
                        Err(e) if e.is_value_error() => {}
                        Err(e) => return Err(e),
                    }
                } else if let Some(span) = item.expr {
                    let expr = parse_expression(span.text(self.source), &self.expr_ctx())?;
                    match eval_expr(&expr, &row, &group_ctx) {
                        Ok(v) => row.values[var] = value_to_binding(&v, self.dict())?,
                        Err(e) if e.is_value_error() => {}
                        Err(e) => return Err(e),
                    }
                }
            }

            if let Some(having) = &having_expr {
                match eval_expr(having, &row, &group_ctx)
                    .and_then(|v| effective_boolean_value(&v))
                {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) if e.is_value_error() => continue,
                    Err(e) => return Err(e),
                }
            }
            out.push(row);
        }
        Ok(out)
    }

    // --- modifiers & shaping ---

    fn order(&self, rows: &mut [Row]) -> Result<()> {
        let conds: Vec<(Expr, bool)> = self
            .query
            .order_by
            .iter()
            .map(|c| {
                parse_expression(c.expr.text(self.source), &self.expr_ctx())
                    .map(|e| (e, c.descending))
            })
            .collect::<Result<_>>()?;
        let ctx = self.eval_ctx(None);

        // precompute sort keys: one binding per condition per row
        let mut keyed: Vec<(Vec<Binding>, usize)> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let keys = conds
                    .iter()
                    .map(|(e, _)| match eval_expr(e, row, &ctx) {
                        Ok(v) => value_to_binding(&v, self.dict()).unwrap_or(Binding::Unbound),
                        Err(_) => Binding::Unbound,
                    })
                    .collect();
                (keys, i)
            })
            .collect();

        let dict = self.dict();
        keyed.sort_by(|(ka, ia), (kb, ib)| {
            for (idx, (_, descending)) in conds.iter().enumerate() {
                let ord = compare_bindings(&ka[idx], &kb[idx], dict);
                let ord = if *descending { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            ia.cmp(ib)
        });

        let reordered: Vec<Row> = keyed.iter().map(|(_, i)| rows[*i].clone()).collect();
        rows.clone_from_slice(&reordered);
        Ok(())
    }

    fn projected_indices(&self) -> Result<(Vec<String>, Vec<usize>)> {
        if self.query.projection.wildcard || self.query.projection.items.is_empty() {
            let mut names = Vec::new();
            let mut indices = Vec::new();
            for (i, name) in self.vars.iter().enumerate() {
                if !name.starts_with(' ') {
                    names.push(name.clone());
                    indices.push(i);
                }
            }
            Ok((names, indices))
        } else {
            let mut names = Vec::new();
            let mut indices = Vec::new();
            for item in &self.query.projection.items {
                let name = item.var.text(self.source).to_string();
                indices.push(self.var_of(&item.var)?);
                names.push(name);
            }
            Ok((names, indices))
        }
    }

    fn shape_select(&self, mut rows: Vec<Row>) -> Result<QueryResults> {
        let (names, indices) = self.projected_indices()?;
        let dict = self.dict();

        if self.query.projection.distinct {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(row.dedup_key(&indices, dict)));
        } else if self.query.projection.reduced {
            // adjacent duplicates only
            let mut last: Option<Vec<String>> = None;
            rows.retain(|row| {
                let key = row.dedup_key(&indices, dict);
                let keep = last.as_ref() != Some(&key);
                last = Some(key);
                keep
            });
        }

        let offset = self.query.offset.unwrap_or(0) as usize;
        let limit = self.query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let page = rows.into_iter().skip(offset).take(limit);

        let mut shaped = Vec::new();
        for row in page {
            let mut out = Vec::with_capacity(indices.len());
            for &idx in &indices {
                out.push(row.values[idx].to_term(dict));
            }
            shaped.push(out);
        }
        Ok(QueryResults::Solutions { vars: names, rows: shaped })
    }

    fn shape_construct(&self, rows: Vec<Row>, planner: &Planner<'_>) -> Result<QueryResults> {
        let Some(template) = self.query.template else {
            return Ok(QueryResults::Graph(Vec::new()));
        };
        let offset = self.query.offset.unwrap_or(0) as usize;
        let limit = self.query.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        let mut triples = Vec::new();
        let mut seen = HashSet::new();
        for (row_idx, row) in rows.iter().enumerate().skip(offset).take(limit) {
            self.cancel.check()?;
            for slot_idx in template.0 as usize..(template.0 + template.1) as usize {
                let slot = &self.query.slots[slot_idx];
                let terms: Option<Vec<Term>> = (0..3)
                    .map(|i| self.template_term(&slot.terms[i], row, row_idx, planner))
                    .collect::<Result<Option<Vec<_>>>>()?;
                let Some(terms) = terms else { continue };
                let [s, p, o] = <[Term; 3]>::try_from(terms)
                    .map_err(|_| StoreError::Internal("template arity".to_string()))?;
                if s.is_literal() || !p.is_iri() {
                    continue;
                }
                let key = format!("{s} {p} {o}");
                if seen.insert(key) {
                    triples.push([s, p, o]);
                }
            }
        }
        Ok(QueryResults::Graph(triples))
    }

    /// Template instantiation: variables substitute, blank labels are
    /// freshly scoped per row.
    fn template_term(
        &self,
        tref: &crate::sparql::TermRef,
        row: &Row,
        row_idx: usize,
        planner: &Planner<'_>,
    ) -> Result<Option<Term>> {
        match tref.kind {
            TermRefKind::Variable => {
                let idx = self.var_of(tref)?;
                Ok(row.values[idx].to_term(self.dict()))
            }
            TermRefKind::BlankNode => Ok(Some(Term::blank(format!(
                "{}_r{row_idx}",
                tref.text(self.source)
            )))),
            TermRefKind::Anon => Ok(Some(Term::blank(format!("anon{}_r{row_idx}", tref.start)))),
            _ => planner.term_ref_to_term(tref),
        }
    }

    fn shape_describe(&self, rows: Vec<Row>, planner: &Planner<'_>) -> Result<QueryResults> {
        let mut resources: Vec<Term> = Vec::new();
        let mut seen = HashSet::new();
        for tref in &self.query.describe_terms {
            match tref.kind {
                TermRefKind::Variable => {
                    let idx = self.var_of(tref)?;
                    for row in &rows {
                        if let Some(term) = row.values[idx].to_term(self.dict()) {
                            if seen.insert(term.canonical()) {
                                resources.push(term);
                            }
                        }
                    }
                }
                _ => {
                    if let Some(term) = planner.term_ref_to_term(tref)? {
                        if seen.insert(term.canonical()) {
                            resources.push(term);
                        }
                    }
                }
            }
        }

        let mut triples = Vec::new();
        for resource in resources {
            let Some(atom) = self.store.atoms().get(&resource.canonical()) else {
                continue;
            };
            let mut cursor = self.store.query(
                QuadPattern {
                    subject: Some(atom),
                    ..Default::default()
                },
                self.scope,
            )?;
            while let Some(quad) = cursor.next()? {
                let p = self.atom_term(quad.predicate)?;
                let o = self.atom_term(quad.object)?;
                triples.push([resource.clone(), p, o]);
            }
        }
        Ok(QueryResults::Graph(triples))
    }

    fn atom_term(&self, atom: AtomId) -> Result<Term> {
        let text = self
            .dict()
            .lookup(atom)
            .ok_or_else(|| StoreError::Corruption("dangling atom".to_string()))?;
        Term::parse_canonical(&text)
    }
}

/// Evaluate one slot range as a pattern against the current state,
/// returning the raw variable table and binding rows. Used by the
/// update executor for DELETE/INSERT WHERE.
pub(crate) fn evaluate_pattern_range(
    store: &QuadStore,
    source: &str,
    query: &ParsedQuery,
    range: SlotRange,
    cancel: &CancelToken,
) -> Result<(Vec<String>, Vec<Row>)> {
    let mut planner = Planner::new(store, source, query)?;
    let plan = planner.plan_group(range.0 as usize, (range.0 + range.1) as usize)?;

    let executor = Executor {
        store,
        source,
        query,
        prefixes: planner.prefixes.clone(),
        base: planner.base.clone(),
        vars: planner.vars.clone(),
        scope: TemporalScope::AsOf(store.now()),
        budget: store.materialization_budget(),
        cancel: cancel.clone(),
        default_graphs: vec![AtomId::DEFAULT_GRAPH],
        named_graphs: store.named_graphs(),
    };
    let unit = vec![Row::unit(executor.width())];
    let rows = executor.eval(&plan, unit, &ActiveGraph::Default)?;
    Ok((executor.vars, rows))
}

fn is_independent(plan: &PlanNode) -> bool {
    match plan {
        PlanNode::Unit | PlanNode::Bgp(_) | PlanNode::Values { .. } => true,
        PlanNode::Join(l, r) | PlanNode::Union(l, r) => is_independent(l) && is_independent(r),
        PlanNode::Graph(_, p) => is_independent(p),
        _ => false,
    }
}
