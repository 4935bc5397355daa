// # Query Planner + Executor
//
// Walks the pattern buffer once into a plan tree, then evaluates it as
// materialized binding tables against the quad store.

mod aggregate;
mod executor;
mod expression;
mod planner;
mod solution;

pub(crate) use executor::evaluate_pattern_range;
pub use executor::{execute_parsed, execute_query, QueryResults};
pub use expression::{
    effective_boolean_value, eval, parse_expression, EvalContext, Expr, ExprContext, Value,
};
pub use planner::{GraphSpec, PatternNode, PlanNode, Planner, TriplePattern};
pub use solution::{compare_bindings, Binding, Row};
