// SPARQL Update integration: data modification, graph management, and
// transactional behavior.

use chronoquad::common::CancelToken;
use chronoquad::execution::{execute_query, QueryResults};
use chronoquad::store::{QuadPattern, TemporalScope};
use chronoquad::update::execute_update;
use chronoquad::{Config, QuadStore};
use tempfile::TempDir;

fn open(dir: &TempDir) -> QuadStore {
    QuadStore::open(&Config::new(dir.path()).with_page_size(4096)).unwrap()
}

fn update(store: &QuadStore, text: &str) -> chronoquad::update::UpdateStats {
    execute_update(store, text, &CancelToken::new()).unwrap()
}

fn count(store: &QuadStore, query: &str) -> usize {
    match execute_query(store, query, &CancelToken::new()).unwrap() {
        QueryResults::Solutions { rows, .. } => rows.len(),
        other => panic!("expected solutions, got {other:?}"),
    }
}

#[test]
fn test_insert_data_literal_and_graph_sections() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let stats = update(
        &store,
        "PREFIX ex: <http://ex/>\n\
         INSERT DATA { ex:s ex:p \"v\" . GRAPH ex:g { ex:a ex:b ex:c } }",
    );
    assert_eq!(stats.asserted, 2);
    assert_eq!(store.stats().quads, 2);
    assert_eq!(count(&store, "SELECT * WHERE { ?s ?p ?o }"), 1);
    assert_eq!(
        count(&store, "SELECT * WHERE { GRAPH <http://ex/g> { ?s ?p ?o } }"),
        1
    );
}

#[test]
fn test_delete_data_retracts() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    update(
        &store,
        "PREFIX ex: <http://ex/>\nINSERT DATA { ex:s ex:p \"v\" . ex:s ex:p \"w\" }",
    );
    let stats = update(
        &store,
        "PREFIX ex: <http://ex/>\nDELETE DATA { ex:s ex:p \"v\" }",
    );
    assert_eq!(stats.retracted, 1);
    assert_eq!(count(&store, "SELECT * WHERE { ?s ?p ?o }"), 1);
}

#[test]
fn test_delete_insert_where_rewrites() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    update(
        &store,
        "PREFIX ex: <http://ex/>\nINSERT DATA { ex:a ex:old 1 . ex:b ex:old 2 }",
    );
    let stats = update(
        &store,
        "PREFIX ex: <http://ex/>\n\
         DELETE { ?s ex:old ?v } INSERT { ?s ex:new ?v } WHERE { ?s ex:old ?v }",
    );
    assert_eq!(stats.retracted, 2);
    assert_eq!(stats.asserted, 2);
    assert_eq!(
        count(&store, "PREFIX ex: <http://ex/> SELECT * WHERE { ?s ex:old ?v }"),
        0
    );
    assert_eq!(
        count(&store, "PREFIX ex: <http://ex/> SELECT * WHERE { ?s ex:new ?v }"),
        2
    );
}

#[test]
fn test_delete_where_shorthand() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    update(
        &store,
        "PREFIX ex: <http://ex/>\nINSERT DATA { ex:a ex:p 1 . ex:b ex:q 2 }",
    );
    update(&store, "PREFIX ex: <http://ex/>\nDELETE WHERE { ?s ex:p ?v }");
    assert_eq!(count(&store, "SELECT * WHERE { ?s ?p ?o }"), 1);
}

#[test]
fn test_clear_variants() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    update(
        &store,
        "PREFIX ex: <http://ex/>\n\
         INSERT DATA { ex:d ex:p 1 . GRAPH ex:g1 { ex:a ex:p 1 } GRAPH ex:g2 { ex:b ex:p 2 } }",
    );

    update(&store, "PREFIX ex: <http://ex/>\nCLEAR GRAPH ex:g1");
    assert_eq!(
        count(&store, "SELECT * WHERE { GRAPH <http://ex/g1> { ?s ?p ?o } }"),
        0
    );
    assert_eq!(count(&store, "SELECT ?g WHERE { GRAPH ?g { ?s ?p ?o } }"), 1);

    update(&store, "CLEAR NAMED");
    assert_eq!(count(&store, "SELECT ?g WHERE { GRAPH ?g { ?s ?p ?o } }"), 0);
    assert_eq!(count(&store, "SELECT * WHERE { ?s ?p ?o }"), 1);

    update(&store, "CLEAR ALL");
    assert_eq!(count(&store, "SELECT * WHERE { ?s ?p ?o }"), 0);
    // Retraction, not erasure: history is still there
    assert!(!store
        .query(QuadPattern::any(), TemporalScope::All)
        .unwrap()
        .collect_all()
        .unwrap()
        .is_empty());
}

#[test]
fn test_copy_move_add() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    update(
        &store,
        "PREFIX ex: <http://ex/>\n\
         INSERT DATA { GRAPH ex:src { ex:a ex:p 1 } GRAPH ex:dst { ex:old ex:q 2 } }",
    );

    // COPY replaces the destination
    update(&store, "PREFIX ex: <http://ex/>\nCOPY ex:src TO ex:dst");
    assert_eq!(
        count(&store, "SELECT * WHERE { GRAPH <http://ex/dst> { ?s ?p ?o } }"),
        1
    );
    assert_eq!(
        count(
            &store,
            "SELECT * WHERE { GRAPH <http://ex/dst> { <http://ex/old> ?p ?o } }"
        ),
        0
    );

    // ADD accumulates
    update(
        &store,
        "PREFIX ex: <http://ex/>\n\
         INSERT DATA { GRAPH ex:extra { ex:z ex:p 9 } } ;\n\
         ADD ex:extra TO ex:dst",
    );
    assert_eq!(
        count(&store, "SELECT * WHERE { GRAPH <http://ex/dst> { ?s ?p ?o } }"),
        2
    );

    // MOVE empties the source
    update(&store, "PREFIX ex: <http://ex/>\nMOVE ex:dst TO ex:final");
    assert_eq!(
        count(&store, "SELECT * WHERE { GRAPH <http://ex/dst> { ?s ?p ?o } }"),
        0
    );
    assert_eq!(
        count(&store, "SELECT * WHERE { GRAPH <http://ex/final> { ?s ?p ?o } }"),
        2
    );
}

#[test]
fn test_copy_from_missing_graph_errors_without_silent() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    for op in ["COPY", "MOVE", "ADD"] {
        let result = execute_update(
            &store,
            &format!("{op} <http://ex/missing> TO <http://ex/dst>"),
            &CancelToken::new(),
        );
        assert!(
            matches!(result, Err(chronoquad::StoreError::SchemaInvariant(_))),
            "{op} should fail on a missing source"
        );
    }
    assert_eq!(store.stats().quads, 0);

    // SILENT suppresses the error and the operation becomes a no-op
    for op in ["COPY", "MOVE", "ADD"] {
        let stats = update(
            &store,
            &format!("{op} SILENT <http://ex/missing> TO <http://ex/dst>"),
        );
        assert_eq!(stats.asserted, 0);
        assert_eq!(stats.retracted, 0);
    }
    assert_eq!(store.stats().quads, 0);
}

#[test]
fn test_copy_source_created_in_same_sequence() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    // the source graph comes into existence one operation earlier
    update(
        &store,
        "PREFIX ex: <http://ex/>\n\
         INSERT DATA { GRAPH ex:tmp { ex:a ex:p 1 } } ;\n\
         COPY ex:tmp TO DEFAULT",
    );
    assert_eq!(count(&store, "SELECT * WHERE { ?s ?p ?o }"), 1);
}

#[test]
fn test_copy_onto_itself_is_noop() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    update(
        &store,
        "PREFIX ex: <http://ex/>\nINSERT DATA { GRAPH ex:g { ex:a ex:p 1 } }",
    );
    let stats = update(&store, "PREFIX ex: <http://ex/>\nCOPY ex:g TO ex:g");
    assert_eq!(stats.asserted, 0);
    assert_eq!(stats.retracted, 0);
    assert_eq!(
        count(&store, "SELECT * WHERE { GRAPH <http://ex/g> { ?s ?p ?o } }"),
        1
    );
}

#[test]
fn test_sequence_is_atomic_on_error() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    // The second operation is malformed; the first must not apply
    let result = execute_update(
        &store,
        "PREFIX ex: <http://ex/>\n\
         INSERT DATA { ex:s ex:p 1 } ;\n\
         FROB ex:g",
        &CancelToken::new(),
    );
    assert!(result.is_err());
    assert_eq!(store.stats().quads, 0);
}

#[test]
fn test_update_rejects_query_form() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    assert!(execute_update(&store, "SELECT * WHERE { ?s ?p ?o }", &CancelToken::new()).is_err());
}

#[test]
fn test_insert_visible_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        update(
            &store,
            "PREFIX ex: <http://ex/>\nINSERT DATA { ex:s ex:p \"persisted\" }",
        );
    }
    let store = open(&dir);
    assert_eq!(count(&store, "SELECT * WHERE { ?s ?p ?o }"), 1);
}
