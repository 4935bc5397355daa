// Storage engine integration: round-trips, named-graph isolation,
// bitemporal queries, and crash recovery.

use chronoquad::common::CancelToken;
use chronoquad::parser::RdfFormat;
use chronoquad::store::{Interval, QuadPattern, TemporalScope};
use chronoquad::{Config, QuadStore, Term};
use tempfile::TempDir;

fn open(dir: &TempDir) -> QuadStore {
    QuadStore::open(&Config::new(dir.path()).with_page_size(4096)).unwrap()
}

#[test]
fn test_basic_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .load(
            "<http://ex/s> <http://ex/p> \"v\" .".as_bytes(),
            RdfFormat::Turtle,
            None,
            None,
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(store.stats().quads, 1);
    let mut cursor = store
        .query(QuadPattern::any(), TemporalScope::Now)
        .unwrap();
    let quad = cursor.next().unwrap().unwrap();
    assert!(quad.in_default_graph());
    let atoms = store.atoms();
    assert_eq!(&*atoms.lookup(quad.subject).unwrap(), "<http://ex/s>");
    assert_eq!(&*atoms.lookup(quad.predicate).unwrap(), "<http://ex/p>");
    assert_eq!(&*atoms.lookup(quad.object).unwrap(), "\"v\"");
    assert!(cursor.next().unwrap().is_none());
}

#[test]
fn test_named_graph_isolation() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .assert_current(
            &Term::iri("http://ex/s"),
            &Term::iri("http://ex/p"),
            &Term::literal("v"),
            Some(&Term::iri("http://ex/g1")),
        )
        .unwrap();

    // The quad is not in the default graph
    let s = store.atoms().get("<http://ex/s>").unwrap();
    let in_default = QuadPattern {
        subject: Some(s),
        graph: Some(chronoquad::AtomId::DEFAULT_GRAPH),
        ..Default::default()
    };
    assert!(!store.contains_current(in_default).unwrap());

    let mut in_g1 = store
        .query_terms(
            Some(&Term::iri("http://ex/s")),
            None,
            None,
            Some(&Term::iri("http://ex/g1")),
            TemporalScope::Now,
        )
        .unwrap();
    assert!(in_g1.next().unwrap().is_some());
}

#[test]
fn test_bitemporal_as_of_sequence() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let x = Term::iri("http://ex/x");
    let p = Term::iri("http://ex/p");

    // at t=10 assert :x :p 1; at t=20 retract; at t=30 assert :x :p 2
    let mut batch = store.begin_batch().unwrap();
    batch
        .assert_terms(&x, &p, &Term::literal("1"), None, Interval::new(10, 20).unwrap())
        .unwrap();
    batch
        .assert_terms(&x, &p, &Term::literal("2"), None, Interval::open_from(30))
        .unwrap();
    batch.commit().unwrap();

    let object_at = |t| {
        let mut cursor = store.query_as_of(QuadPattern::any(), t).unwrap();
        cursor
            .next()
            .unwrap()
            .map(|q| store.atoms().lookup(q.object).unwrap().to_string())
    };
    assert_eq!(object_at(15).as_deref(), Some("\"1\""));
    assert_eq!(object_at(25), None);
    assert_eq!(object_at(35).as_deref(), Some("\"2\""));
}

#[test]
fn test_crash_recovery_replays_committed_batch() {
    let dir = TempDir::new().unwrap();

    {
        let store = open(&dir);
        let mut batch = store.begin_batch().unwrap();
        for i in 0..10_000u64 {
            batch
                .assert_terms(
                    &Term::iri(format!("http://ex/s{i}")),
                    &Term::iri("http://ex/p"),
                    &Term::literal(i.to_string()),
                    None,
                    Interval::open_from(100),
                )
                .unwrap();
        }
        batch.commit().unwrap();
        // Simulate a crash before any checkpoint: the drop-time flush
        // must not run
        std::mem::forget(store);
    }

    let store = open(&dir);
    assert_eq!(store.stats().quads, 10_000);

    // Spot-check through differently-ordered indices
    let atoms = store.atoms();
    let s = atoms.get("<http://ex/s7777>").unwrap();
    let p = atoms.get("<http://ex/p>").unwrap();
    let o = atoms.get("\"7777\"").unwrap();
    let patterns = [
        QuadPattern { subject: Some(s), ..Default::default() },
        QuadPattern { predicate: Some(p), object: Some(o), ..Default::default() },
        QuadPattern { object: Some(o), ..Default::default() },
        QuadPattern { subject: Some(s), predicate: Some(p), object: Some(o), ..Default::default() },
    ];
    for pattern in patterns {
        assert!(store.contains_current(pattern).unwrap(), "{pattern:?}");
    }
}

#[test]
fn test_retraction_preserves_history() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let s = Term::iri("http://ex/s");
    let p = Term::iri("http://ex/p");
    let o = Term::literal("v");

    store.assert_current(&s, &p, &o, None).unwrap();
    assert!(store.retract_current(&s, &p, &o, None).unwrap());

    assert!(!store.contains_current(QuadPattern::any()).unwrap());
    let mut all = store
        .query(QuadPattern::any(), TemporalScope::All)
        .unwrap();
    let quads = all.collect_all().unwrap();
    assert_eq!(quads.len(), 1);
    assert!(!quads[0].interval.is_open());
}

#[test]
fn test_dump_is_canonical_nquads() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .load(
            "@prefix ex: <http://ex/> .\n\
             ex:s ex:p \"v\" .\n"
                .as_bytes(),
            RdfFormat::Turtle,
            None,
            None,
            &CancelToken::new(),
        )
        .unwrap();
    store
        .assert_current(
            &Term::iri("http://ex/a"),
            &Term::iri("http://ex/b"),
            &Term::iri("http://ex/c"),
            Some(&Term::iri("http://ex/g")),
        )
        .unwrap();

    let mut out = Vec::new();
    let count = store.dump(&mut out).unwrap();
    assert_eq!(count, 2);
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("<http://ex/s> <http://ex/p> \"v\" ."));
    assert!(text.contains("<http://ex/a> <http://ex/b> <http://ex/c> <http://ex/g> ."));
}

#[test]
fn test_load_dump_load_is_identity() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = open(&dir_a);
    let b = open(&dir_b);

    let source = "@prefix ex: <http://ex/> .\n\
                  ex:s ex:p \"v\\\"quoted\\\"\", 42, \"tagged\"@en ; a ex:T .\n\
                  ex:g { ex:in ex:graph ex:one . }\n";
    a.load(
        source.as_bytes(),
        RdfFormat::TriG,
        None,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    let mut dumped = Vec::new();
    a.dump(&mut dumped).unwrap();
    b.load(
        dumped.as_slice(),
        RdfFormat::NQuads,
        None,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    let mut second = Vec::new();
    b.dump(&mut second).unwrap();

    let mut lines_a: Vec<&str> = std::str::from_utf8(&dumped).unwrap().lines().collect();
    let mut lines_b: Vec<&str> = std::str::from_utf8(&second).unwrap().lines().collect();
    lines_a.sort_unstable();
    lines_b.sort_unstable();
    assert_eq!(lines_a, lines_b);
    assert_eq!(a.stats().quads, b.stats().quads);
}

#[test]
fn test_query_between_and_interval_merge() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut batch = store.begin_batch().unwrap();
    let s = Term::iri("http://ex/s");
    let p = Term::iri("http://ex/p");
    let o = Term::literal("v");
    batch
        .assert_terms(&s, &p, &o, None, Interval::new(10, 30).unwrap())
        .unwrap();
    batch
        .assert_terms(&s, &p, &o, None, Interval::new(25, 60).unwrap())
        .unwrap();
    batch.commit().unwrap();

    // Overlapping intervals merged into one quad spanning both
    assert_eq!(store.stats().quads, 1);
    assert_eq!(
        store
            .query_between(QuadPattern::any(), 5, 15)
            .unwrap()
            .collect_all()
            .unwrap()
            .len(),
        1
    );
    assert!(store
        .query_between(QuadPattern::any(), 60, 99)
        .unwrap()
        .collect_all()
        .unwrap()
        .is_empty());
}
