use crate::atoms::AtomId;
use crate::error::{Result, StoreError};

/// A 64-bit monotonic moment. Moments are opaque; callers may use wall
///-clock milliseconds or any other monotone source.
pub type Moment = u64;

/// Sentinel for an open-ended interval.
pub const FOREVER: Moment = u64::MAX;

/// Positions a term can occupy in a quad; used for schema checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriplePosition {
    Subject,
    Predicate,
    Object,
    Graph,
}

/// Half-open valid-time interval `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub from: Moment,
    pub to: Moment,
}

impl Interval {
    pub fn new(from: Moment, to: Moment) -> Result<Self> {
        if from >= to {
            return Err(StoreError::SchemaInvariant(format!(
                "empty or inverted interval [{from}, {to})"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn open_from(from: Moment) -> Self {
        Self { from, to: FOREVER }
    }

    pub fn is_open(&self) -> bool {
        self.to == FOREVER
    }

    pub fn contains(&self, t: Moment) -> bool {
        self.from <= t && t < self.to
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        self.from < other.to && other.from < self.to
    }

    pub fn merge(&self, other: &Interval) -> Interval {
        Interval {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }
}

/// Four atom ids plus the valid-time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub subject: AtomId,
    pub predicate: AtomId,
    pub object: AtomId,
    pub graph: AtomId,
    pub interval: Interval,
}

impl Quad {
    pub fn in_default_graph(&self) -> bool {
        self.graph == AtomId::DEFAULT_GRAPH
    }
}

/// Which valid-time slice a query observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalScope {
    /// Quads valid at the moment the query starts.
    Now,
    /// Quads whose interval contains `t`.
    AsOf(Moment),
    /// Quads whose interval intersects `[t1, t2)`.
    Between(Moment, Moment),
    /// Every version, regardless of validity.
    All,
}

impl TemporalScope {
    /// Resolve `Now` against the store clock; other scopes pass through.
    pub fn resolve(self, now: Moment) -> TemporalScope {
        match self {
            TemporalScope::Now => TemporalScope::AsOf(now),
            other => other,
        }
    }

    pub fn admits(&self, interval: &Interval) -> bool {
        match self {
            TemporalScope::Now => interval.is_open(),
            TemporalScope::AsOf(t) => interval.contains(*t),
            TemporalScope::Between(t1, t2) => {
                t1 < t2
                    && interval.intersects(&Interval {
                        from: *t1,
                        to: *t2,
                    })
            }
            TemporalScope::All => true,
        }
    }
}
