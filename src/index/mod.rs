// # B+Tree Index Set
//
// Six orderings of `(s, p, o, g)` plus the valid-time interval, each kept
// in a page-backed B+tree so any bound-position lookup has an index whose
// leading columns match.

mod btree;
mod tuple;

pub use btree::{BTree, BTreeCursor, BTreeStats};
pub use tuple::{IndexOrder, IndexTuple, TUPLE_BYTES};
