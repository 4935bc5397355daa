// # SPARQL Parser
//
// Source text in, a compact pattern-slot buffer out. Everything
// downstream (planner, executor, update executor) iterates the slots
// and the query header; expressions stay as source spans until they are
// evaluated.

mod buffer;
mod parser;

pub use buffer::{
    AggregateFunction, AggregateSpec, DatasetClause, GraphTarget, OrderCondition, ParsedQuery,
    PatternSlot, PrefixBinding, Projection, Prologue, QueryKind, SelectItem, SlotKind, SlotRange,
    SourceSpan, TemporalClause, TermRef, TermRefKind, UpdateOp,
};
pub use parser::parse;
