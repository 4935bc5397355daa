// # Update Executor
//
// Runs a SPARQL Update sequence inside a single write transaction.
// WHERE clauses evaluate against the pre-transaction snapshot; every
// mutation applies through the batch, and nothing is visible unless the
// whole sequence commits.

use tracing::debug;

use crate::atoms::AtomId;
use crate::common::CancelToken;
use crate::error::{Result, StoreError};
use crate::execution::{evaluate_pattern_range, Binding, Planner, Row};
use crate::sparql::{
    self, GraphTarget, ParsedQuery, QueryKind, SlotKind, SlotRange, TermRef, TermRefKind, UpdateOp,
};
use crate::store::{Interval, QuadPattern, QuadStore, TemporalScope, WriteBatch};

#[derive(Debug, Clone, Default)]
pub struct UpdateStats {
    pub operations: usize,
    pub asserted: u64,
    pub retracted: u64,
}

/// Parse and execute an update request.
pub fn execute_update(store: &QuadStore, source: &str, cancel: &CancelToken) -> Result<UpdateStats> {
    let query = sparql::parse(source)?;
    if query.kind != QueryKind::Update {
        return Err(StoreError::Internal(
            "query request passed to the update executor".to_string(),
        ));
    }
    execute_parsed_update(store, source, &query, cancel)
}

pub fn execute_parsed_update(
    store: &QuadStore,
    source: &str,
    query: &ParsedQuery,
    cancel: &CancelToken,
) -> Result<UpdateStats> {
    let planner = Planner::new(store, source, query)?;

    // WHERE clauses are evaluated before the write lock is taken; the
    // whole sequence then applies against one transaction
    let mut solutions: Vec<Option<(Vec<String>, Vec<Row>)>> = Vec::new();
    for op in &query.updates {
        match op {
            UpdateOp::Modify { pattern, .. } => {
                solutions.push(Some(evaluate_pattern_range(
                    store, source, query, *pattern, cancel,
                )?));
            }
            _ => solutions.push(None),
        }
    }
    let named_snapshot = store.named_graphs();

    let mut batch = store.begin_batch()?;
    let mut stats = UpdateStats::default();

    for (op_idx, op) in query.updates.iter().enumerate() {
        cancel.check()?;
        stats.operations += 1;
        match op {
            UpdateOp::InsertData { quads } => {
                let instantiated =
                    instantiate(&planner, query, *quads, None, op_idx, 0)?;
                for (s, p, o, g) in instantiated {
                    batch.assert_canonical(&s, &p, &o, &g, Interval::open_from(batch.now()))?;
                    stats.asserted += 1;
                }
            }
            UpdateOp::DeleteData { quads } => {
                let instantiated =
                    instantiate(&planner, query, *quads, None, op_idx, 0)?;
                stats.retracted += delete_quads(store, &mut batch, &instantiated, cancel)?;
            }
            UpdateOp::Modify {
                delete,
                insert,
                pattern: _,
            } => {
                let (vars, rows) = solutions[op_idx].as_ref().ok_or_else(|| {
                    StoreError::Internal("missing pre-evaluated solutions".to_string())
                })?;
                for (row_idx, row) in rows.iter().enumerate() {
                    cancel.check()?;
                    if let Some(delete) = delete {
                        let quads = instantiate(
                            &planner,
                            query,
                            *delete,
                            Some((vars, row)),
                            op_idx,
                            row_idx,
                        )?;
                        stats.retracted += delete_quads(store, &mut batch, &quads, cancel)?;
                    }
                    if let Some(insert) = insert {
                        let quads = instantiate(
                            &planner,
                            query,
                            *insert,
                            Some((vars, row)),
                            op_idx,
                            row_idx,
                        )?;
                        for (s, p, o, g) in quads {
                            batch.assert_canonical(
                                &s,
                                &p,
                                &o,
                                &g,
                                Interval::open_from(batch.now()),
                            )?;
                            stats.asserted += 1;
                        }
                    }
                }
            }
            UpdateOp::Clear { target, silent: _ } | UpdateOp::Drop { target, silent: _ } => {
                // graphs are not schema objects here: DROP degrades to a
                // bulk retract like CLEAR
                for graph in target_graphs(&planner, store, target, &named_snapshot)? {
                    stats.retracted += clear_graph(&mut batch, graph, cancel)?;
                }
            }
            UpdateOp::Copy { from, to, silent } => {
                stats.retracted +=
                    copy_graph(store, &mut batch, &planner, from, to, true, *silent, cancel)?;
            }
            UpdateOp::Move { from, to, silent } => {
                stats.retracted +=
                    copy_graph(store, &mut batch, &planner, from, to, true, *silent, cancel)?;
                if let Some(src) = source_graph(&planner, store, &batch, from, *silent)? {
                    stats.retracted += clear_graph(&mut batch, src, cancel)?;
                }
            }
            UpdateOp::Add { from, to, silent } => {
                stats.retracted +=
                    copy_graph(store, &mut batch, &planner, from, to, false, *silent, cancel)?;
            }
        }
    }

    batch.commit()?;
    debug!(
        operations = stats.operations,
        asserted = stats.asserted,
        retracted = stats.retracted,
        "update committed"
    );
    Ok(stats)
}

type CanonicalQuad = (String, String, String, String);

/// Instantiate a quad template range against an optional solution row.
/// Quads with unbound variables are omitted; blank labels are freshly
/// scoped per operation and row.
fn instantiate(
    planner: &Planner<'_>,
    query: &ParsedQuery,
    range: SlotRange,
    row: Option<(&Vec<String>, &Row)>,
    op_idx: usize,
    row_idx: usize,
) -> Result<Vec<CanonicalQuad>> {
    let mut out = Vec::new();
    let mut idx = range.0 as usize;
    let end = (range.0 + range.1) as usize;

    while idx < end {
        let slot = &query.slots[idx];
        match slot.kind {
            SlotKind::Triple => {
                if let Some(triple) =
                    instantiate_triple(planner, slot.terms, row, op_idx, row_idx)?
                {
                    out.push((triple.0, triple.1, triple.2, String::new()));
                }
                idx += 1;
            }
            SlotKind::GraphHeader => {
                let graph =
                    resolve_template_term(planner, &slot.terms[0], row, op_idx, row_idx)?;
                let children = slot.children();
                if let Some(graph) = graph {
                    for child_idx in children.clone() {
                        let child = &query.slots[child_idx];
                        if child.kind != SlotKind::Triple {
                            continue;
                        }
                        if let Some(triple) =
                            instantiate_triple(planner, child.terms, row, op_idx, row_idx)?
                        {
                            out.push((triple.0, triple.1, triple.2, graph.clone()));
                        }
                    }
                }
                idx = (idx + 1).max(children.end);
            }
            _ => {
                idx += 1;
            }
        }
    }
    Ok(out)
}

fn instantiate_triple(
    planner: &Planner<'_>,
    terms: [TermRef; 4],
    row: Option<(&Vec<String>, &Row)>,
    op_idx: usize,
    row_idx: usize,
) -> Result<Option<(String, String, String)>> {
    let s = resolve_template_term(planner, &terms[0], row, op_idx, row_idx)?;
    let p = resolve_template_term(planner, &terms[1], row, op_idx, row_idx)?;
    let o = resolve_template_term(planner, &terms[2], row, op_idx, row_idx)?;
    match (s, p, o) {
        (Some(s), Some(p), Some(o)) => Ok(Some((s, p, o))),
        _ => Ok(None),
    }
}

fn resolve_template_term(
    planner: &Planner<'_>,
    tref: &TermRef,
    row: Option<(&Vec<String>, &Row)>,
    op_idx: usize,
    row_idx: usize,
) -> Result<Option<String>> {
    match tref.kind {
        TermRefKind::Variable => {
            let Some((vars, row)) = row else {
                return Ok(None);
            };
            let name = tref.text(planner.source());
            let Some(idx) = vars.iter().position(|v| v == name) else {
                return Ok(None);
            };
            match &row.values[idx] {
                Binding::Unbound => Ok(None),
                binding => Ok(binding
                    .to_term(planner.store().atoms())
                    .map(|t| t.canonical())),
            }
        }
        TermRefKind::BlankNode => Ok(Some(format!(
            "_:u{op_idx}r{row_idx}_{}",
            tref.text(planner.source())
        ))),
        TermRefKind::Anon => Ok(Some(format!("_:u{op_idx}r{row_idx}a{}", tref.start))),
        _ => Ok(planner.term_ref_to_term(tref)?.map(|t| t.canonical())),
    }
}

fn delete_quads(
    store: &QuadStore,
    batch: &mut WriteBatch<'_>,
    quads: &[CanonicalQuad],
    cancel: &CancelToken,
) -> Result<u64> {
    let atoms = store.atoms();
    let mut retracted = 0;
    for (s, p, o, g) in quads {
        cancel.check()?;
        let resolved = (atoms.get(s), atoms.get(p), atoms.get(o), atoms.get(g));
        let (Some(s), Some(p), Some(o), Some(g)) = resolved else {
            continue;
        };
        let matches = batch.scan(
            QuadPattern {
                subject: Some(s),
                predicate: Some(p),
                object: Some(o),
                graph: Some(g),
            },
            TemporalScope::Now,
        )?;
        for quad in matches {
            batch.close_quad(&quad)?;
            retracted += 1;
        }
    }
    Ok(retracted)
}

fn clear_graph(batch: &mut WriteBatch<'_>, graph: AtomId, cancel: &CancelToken) -> Result<u64> {
    let matches = batch.scan(
        QuadPattern {
            graph: Some(graph),
            ..Default::default()
        },
        TemporalScope::Now,
    )?;
    let mut retracted = 0;
    for quad in matches {
        cancel.check()?;
        batch.close_quad(&quad)?;
        retracted += 1;
    }
    Ok(retracted)
}

fn target_graphs(
    planner: &Planner<'_>,
    store: &QuadStore,
    target: &GraphTarget,
    named_snapshot: &[AtomId],
) -> Result<Vec<AtomId>> {
    Ok(match target {
        GraphTarget::Default => vec![AtomId::DEFAULT_GRAPH],
        GraphTarget::Named => named_snapshot.to_vec(),
        GraphTarget::All => {
            let mut all = vec![AtomId::DEFAULT_GRAPH];
            all.extend_from_slice(named_snapshot);
            all
        }
        GraphTarget::Graph(tref) => {
            let term = planner
                .term_ref_to_term(tref)?
                .ok_or_else(|| StoreError::Internal("graph target expected".to_string()))?;
            match store.atoms().get(&term.canonical()) {
                Some(atom) => vec![atom],
                None => Vec::new(),
            }
        }
    })
}

/// Resolve the source graph of COPY/MOVE/ADD. A named source that does
/// not exist is an error unless SILENT was given, in which case the
/// operation degrades to a no-op (`None`).
fn source_graph(
    planner: &Planner<'_>,
    store: &QuadStore,
    batch: &WriteBatch<'_>,
    target: &GraphTarget,
    silent: bool,
) -> Result<Option<AtomId>> {
    match target {
        GraphTarget::Default => Ok(Some(AtomId::DEFAULT_GRAPH)),
        GraphTarget::Graph(tref) => {
            let term = planner
                .term_ref_to_term(tref)?
                .ok_or_else(|| StoreError::Internal("graph expected".to_string()))?;
            match store.atoms().get(&term.canonical()) {
                Some(atom) if batch.graph_exists(atom) => Ok(Some(atom)),
                _ if silent => Ok(None),
                _ => Err(StoreError::SchemaInvariant(format!(
                    "source graph {} does not exist",
                    term.canonical()
                ))),
            }
        }
        _ => Err(StoreError::Internal(
            "NAMED/ALL are not single-graph sources".to_string(),
        )),
    }
}

fn destination_graph(planner: &Planner<'_>, target: &GraphTarget) -> Result<String> {
    Ok(match target {
        GraphTarget::Default => String::new(),
        GraphTarget::Graph(tref) => planner
            .term_ref_to_term(tref)?
            .ok_or_else(|| StoreError::Internal("graph expected".to_string()))?
            .canonical(),
        _ => {
            return Err(StoreError::Internal(
                "NAMED/ALL are not single-graph destinations".to_string(),
            ))
        }
    })
}

/// Copy the current quads of `from` into `to`, optionally clearing the
/// destination first. Returns quads retracted by the clearing.
#[allow(clippy::too_many_arguments)]
fn copy_graph(
    store: &QuadStore,
    batch: &mut WriteBatch<'_>,
    planner: &Planner<'_>,
    from: &GraphTarget,
    to: &GraphTarget,
    clear_destination: bool,
    silent: bool,
    cancel: &CancelToken,
) -> Result<u64> {
    let Some(src) = source_graph(planner, store, batch, from, silent)? else {
        // missing source suppressed by SILENT
        return Ok(0);
    };
    let dst = destination_graph(planner, to)?;
    let atoms = store.atoms();

    // same source and destination is a no-op
    if atoms.get(&dst) == Some(src) {
        return Ok(0);
    }

    let src_quads = batch.scan(
        QuadPattern {
            graph: Some(src),
            ..Default::default()
        },
        TemporalScope::Now,
    )?;

    // COPY and MOVE replace the destination; ADD accumulates into it
    let mut retracted = 0;
    if clear_destination {
        if let Some(dst_atom) = atoms.get(&dst) {
            retracted += clear_graph(batch, dst_atom, cancel)?;
        }
    }

    for quad in src_quads {
        cancel.check()?;
        let s = atoms
            .lookup(quad.subject)
            .ok_or_else(|| StoreError::Corruption("dangling atom".to_string()))?;
        let p = atoms
            .lookup(quad.predicate)
            .ok_or_else(|| StoreError::Corruption("dangling atom".to_string()))?;
        let o = atoms
            .lookup(quad.object)
            .ok_or_else(|| StoreError::Corruption("dangling atom".to_string()))?;
        batch.assert_canonical(&s, &p, &o, &dst, Interval::open_from(batch.now()))?;
    }
    Ok(retracted)
}
