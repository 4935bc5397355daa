// The parsed-query representation: a flat buffer of 64-byte pattern
// slots plus a query-level header. Every slot field that references
// query text is a `(start, len)` span back into the source; expressions
// are re-parsed from their spans on demand during execution.

/// Slot discriminator, byte 0 of every slot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Placeholder for a flattened subgroup; consumers skip it.
    Unused = 0,
    Triple = 1,
    Filter = 2,
    Bind = 3,
    GraphHeader = 4,
    ExistsHeader = 5,
    NotExistsHeader = 6,
    MinusTriple = 7,
    ValuesHeader = 8,
    ValuesEntry = 9,
    OptionalHeader = 10,
    UnionHeader = 11,
}

/// What a term span denotes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRefKind {
    Unused = 0,
    /// Span covers the bare variable name, without `?`/`$`.
    Variable = 1,
    /// Span covers the IRI text, without angle brackets.
    Iri = 2,
    /// Span covers `prefix:local` as written.
    PrefixedName = 3,
    /// Span covers the literal exactly as written.
    Literal = 4,
    /// Span covers the label, without `_:`.
    BlankNode = 5,
    /// The `a` keyword; the span is empty.
    RdfType = 6,
    /// Anonymous `[]`; the span start doubles as its identity.
    Anon = 7,
    /// Span covers expression text (Filter / Bind slots).
    Expr = 8,
}

/// `(kind, start, len)` reference into the query source.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermRef {
    pub kind: TermRefKind,
    pub start: u32,
    pub len: u32,
}

impl TermRef {
    pub const UNUSED: TermRef = TermRef {
        kind: TermRefKind::Unused,
        start: 0,
        len: 0,
    };

    pub fn new(kind: TermRefKind, start: u32, len: u32) -> Self {
        Self { kind, start, len }
    }

    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start as usize..(self.start + self.len) as usize]
    }

    pub fn is_variable(&self) -> bool {
        self.kind == TermRefKind::Variable
    }
}

/// One 64-byte pattern slot.
///
/// Field use by kind:
/// - `Triple`/`MinusTriple`: terms 0..3 are subject/predicate/object.
/// - `Filter`: term 0 is the expression span.
/// - `Bind`: term 0 is the expression span, term 1 the bound variable.
/// - `GraphHeader`: term 0 is the graph term; children are the body.
/// - `ExistsHeader`/`NotExistsHeader`/`OptionalHeader`: children are the
///   body.
/// - `UnionHeader`: children cover both branches; `extra` is the slot
///   count of the left branch (the explicit split point).
/// - `ValuesHeader`: terms are the variables, `extra` their count;
///   children are one `ValuesEntry` per row.
/// - `ValuesEntry`: terms hold one row; `Unused` means UNDEF.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PatternSlot {
    pub kind: SlotKind,
    pub flags: u8,
    pub child_start: u16,
    pub child_count: u16,
    pub extra: u16,
    pub terms: [TermRef; 4],
    pub reserved: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<PatternSlot>() == 64);
const _: () = assert!(std::mem::size_of::<TermRef>() == 12);

impl PatternSlot {
    pub fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            flags: 0,
            child_start: 0,
            child_count: 0,
            extra: 0,
            terms: [TermRef::UNUSED; 4],
            reserved: [0; 2],
        }
    }

    pub fn children(&self) -> std::ops::Range<usize> {
        self.child_start as usize..(self.child_start + self.child_count) as usize
    }
}

/// Span into the query source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: u32,
    pub len: u32,
}

impl SourceSpan {
    pub fn text<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start as usize..(self.start + self.len) as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Ask,
    Construct,
    Describe,
    Update,
}

/// Prefix binding stored by source offsets, per the single-pass design.
#[derive(Debug, Clone, Copy)]
pub struct PrefixBinding {
    pub prefix_start: u32,
    pub prefix_len: u32,
    pub iri_start: u32,
    pub iri_len: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Prologue {
    pub base: Option<SourceSpan>,
    pub prefixes: Vec<PrefixBinding>,
}

#[derive(Debug, Clone, Copy)]
pub struct DatasetClause {
    pub iri: TermRef,
    pub named: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Sample,
    GroupConcat,
}

#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub distinct: bool,
    /// None for `COUNT(*)`.
    pub arg: Option<SourceSpan>,
    pub separator: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SelectItem {
    pub var: TermRef,
    pub expr: Option<SourceSpan>,
    pub aggregate: Option<AggregateSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct Projection {
    pub wildcard: bool,
    pub distinct: bool,
    pub reduced: bool,
    pub items: Vec<SelectItem>,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderCondition {
    pub expr: SourceSpan,
    pub descending: bool,
}

/// `AS OF t` / `BETWEEN t1 AND t2` valid-time clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalClause {
    AsOf(u64),
    Between(u64, u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphTarget {
    Default,
    Named,
    All,
    Graph(TermRef),
}

/// Slot range `(start, count)` into the pattern buffer.
pub type SlotRange = (u16, u16);

#[derive(Debug, Clone)]
pub enum UpdateOp {
    InsertData {
        quads: SlotRange,
    },
    DeleteData {
        quads: SlotRange,
    },
    Modify {
        delete: Option<SlotRange>,
        insert: Option<SlotRange>,
        pattern: SlotRange,
    },
    Clear {
        target: GraphTarget,
        silent: bool,
    },
    Drop {
        target: GraphTarget,
        silent: bool,
    },
    Copy {
        from: GraphTarget,
        to: GraphTarget,
        silent: bool,
    },
    Move {
        from: GraphTarget,
        to: GraphTarget,
        silent: bool,
    },
    Add {
        from: GraphTarget,
        to: GraphTarget,
        silent: bool,
    },
}

/// The complete parse product: pattern slots plus the query header.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub kind: QueryKind,
    pub slots: Vec<PatternSlot>,
    pub prologue: Prologue,
    pub dataset: Vec<DatasetClause>,
    pub projection: Projection,
    /// Slot range of the WHERE group.
    pub root: SlotRange,
    /// CONSTRUCT template triples.
    pub template: Option<SlotRange>,
    pub describe_terms: Vec<TermRef>,
    pub group_by: Vec<SourceSpan>,
    pub having: Option<SourceSpan>,
    pub order_by: Vec<OrderCondition>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub temporal: Option<TemporalClause>,
    pub updates: Vec<UpdateOp>,
}

impl ParsedQuery {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            prologue: Prologue::default(),
            dataset: Vec::new(),
            projection: Projection::default(),
            root: (0, 0),
            template: None,
            describe_terms: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            temporal: None,
            updates: Vec::new(),
        }
    }

    pub fn root_slots(&self) -> std::ops::Range<usize> {
        self.root.0 as usize..(self.root.0 + self.root.1) as usize
    }

    /// Nested sections never reach past the allocated slot count.
    pub fn validate_children(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.children().end <= self.slots.len())
    }
}
