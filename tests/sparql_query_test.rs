// SPARQL query integration: pattern matching, the algebra operators,
// aggregation, and solution modifiers end to end.

use chronoquad::common::CancelToken;
use chronoquad::execution::{execute_query, QueryResults};
use chronoquad::parser::RdfFormat;
use chronoquad::store::Interval;
use chronoquad::{Config, QuadStore, Term};
use tempfile::TempDir;

fn store_with(dir: &TempDir, turtle: &str) -> QuadStore {
    let store = QuadStore::open(&Config::new(dir.path()).with_page_size(4096)).unwrap();
    store
        .load(
            turtle.as_bytes(),
            RdfFormat::TriG,
            None,
            None,
            &CancelToken::new(),
        )
        .unwrap();
    store
}

fn select(store: &QuadStore, query: &str) -> (Vec<String>, Vec<Vec<Option<String>>>) {
    match execute_query(store, query, &CancelToken::new()).unwrap() {
        QueryResults::Solutions { vars, rows } => (
            vars,
            rows.into_iter()
                .map(|row| row.into_iter().map(|t| t.map(|t| t.canonical())).collect())
                .collect(),
        ),
        other => panic!("expected solutions, got {other:?}"),
    }
}

fn ask(store: &QuadStore, query: &str) -> bool {
    match execute_query(store, query, &CancelToken::new()).unwrap() {
        QueryResults::Boolean(b) => b,
        other => panic!("expected boolean, got {other:?}"),
    }
}

#[test]
fn test_select_all_returns_each_triple_once() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, "<http://ex/s> <http://ex/p> \"v\" .");

    let (vars, rows) = select(&store, "SELECT * WHERE { ?s ?p ?o }");
    assert_eq!(vars, vec!["s", "p", "o"]);
    assert_eq!(
        rows,
        vec![vec![
            Some("<http://ex/s>".to_string()),
            Some("<http://ex/p>".to_string()),
            Some("\"v\"".to_string()),
        ]]
    );
}

#[test]
fn test_named_graph_only_reachable_through_graph_clause() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\nex:g1 { ex:s ex:p \"v\" . }\n",
    );

    let (_, rows) = select(
        &store,
        "SELECT * WHERE { <http://ex/s> ?p ?o }",
    );
    assert!(rows.is_empty());

    let (_, rows) = select(
        &store,
        "SELECT * WHERE { GRAPH <http://ex/g1> { <http://ex/s> ?p ?o } }",
    );
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_optional_left_outer_join() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:a ex:p 1 . ex:b ex:p 2 . ex:a ex:q \"hi\" .\n",
    );

    let (vars, mut rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?s ?v WHERE { ?s ex:p ?x OPTIONAL { ?s ex:q ?v } }",
    );
    assert_eq!(vars, vec!["s", "v"]);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec![Some("<http://ex/a>".to_string()), Some("\"hi\"".to_string())],
            vec![Some("<http://ex/b>".to_string()), None],
        ]
    );
}

#[test]
fn test_union_concatenates_branches() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\nex:a ex:p 1 . ex:b ex:q 2 .\n",
    );

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?s WHERE { { ?s ex:p ?x } UNION { ?s ex:q ?x } }",
    );
    let mut subjects: Vec<_> = rows.into_iter().map(|r| r[0].clone().unwrap()).collect();
    subjects.sort();
    assert_eq!(subjects, vec!["<http://ex/a>", "<http://ex/b>"]);
}

#[test]
fn test_minus_removes_compatible_rows() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:a ex:p 1 . ex:b ex:p 2 . ex:a ex:bad true .\n",
    );

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?s WHERE { ?s ex:p ?x MINUS { ?s ex:bad true } }",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("<http://ex/b>"));
}

#[test]
fn test_filter_drops_failing_and_erroring_rows() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:a ex:p 1 . ex:b ex:p 5 . ex:c ex:p \"not a number\" .\n",
    );

    // the non-numeric row raises a type error and is dropped, not fatal
    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\nSELECT ?s WHERE { ?s ex:p ?v FILTER(?v > 2) }",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("<http://ex/b>"));
}

#[test]
fn test_bind_and_projection_expression() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, "@prefix ex: <http://ex/> .\nex:a ex:p 4 .\n");

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?w WHERE { ?s ex:p ?v BIND(?v * 10 AS ?w) }",
    );
    assert_eq!(
        rows[0][0].as_deref(),
        Some("\"40\"^^<http://www.w3.org/2001/XMLSchema#integer>")
    );
}

#[test]
fn test_empty_concat_is_empty_literal_not_unbound() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, "@prefix ex: <http://ex/> .\nex:a ex:p 1 .\n");

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\nSELECT ?e WHERE { ?s ex:p ?v BIND(CONCAT() AS ?e) }",
    );
    assert_eq!(rows[0][0].as_deref(), Some("\"\""));
}

#[test]
fn test_values_cartesian_product() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\nex:a ex:p 1 . ex:b ex:p 2 .\n",
    );

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?s ?v WHERE { ?s ex:p ?x VALUES ?s { ex:a } }",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("<http://ex/a>"));
}

#[test]
fn test_exists_and_not_exists() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:a ex:p 1 . ex:b ex:p 2 . ex:a ex:flag true .\n",
    );

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?s WHERE { ?s ex:p ?x FILTER EXISTS { ?s ex:flag true } }",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("<http://ex/a>"));

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?s WHERE { ?s ex:p ?x FILTER NOT EXISTS { ?s ex:flag true } }",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("<http://ex/b>"));
}

#[test]
fn test_graph_variable_over_default_only_store_yields_nothing() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, "@prefix ex: <http://ex/> .\nex:a ex:p 1 .\n");

    let (_, rows) = select(&store, "SELECT ?g WHERE { GRAPH ?g { ?s ?p ?o } }");
    assert!(rows.is_empty());
}

#[test]
fn test_graph_variable_binds_named_graphs() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:g1 { ex:a ex:p 1 . }\n\
         ex:g2 { ex:b ex:p 2 . }\n",
    );

    let (_, rows) = select(&store, "SELECT ?g WHERE { GRAPH ?g { ?s ?p ?o } }");
    let mut graphs: Vec<_> = rows.into_iter().map(|r| r[0].clone().unwrap()).collect();
    graphs.sort();
    assert_eq!(graphs, vec!["<http://ex/g1>", "<http://ex/g2>"]);
}

#[test]
fn test_aggregate_sum() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\nex:a ex:p 1, 2, 3, 4, 5 .\n",
    );

    let (vars, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\nSELECT (SUM(?v) AS ?s) WHERE { ex:a ex:p ?v }",
    );
    assert_eq!(vars, vec!["s"]);
    assert_eq!(
        rows,
        vec![vec![Some(
            "\"15\"^^<http://www.w3.org/2001/XMLSchema#integer>".to_string()
        )]]
    );
}

#[test]
fn test_group_by_having_and_count() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:a ex:p 1, 2, 3 . ex:b ex:p 9 .\n",
    );

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT ?s (COUNT(?v) AS ?n) WHERE { ?s ex:p ?v } GROUP BY ?s HAVING(COUNT(?v) > 1)",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("<http://ex/a>"));
    assert_eq!(
        rows[0][1].as_deref(),
        Some("\"3\"^^<http://www.w3.org/2001/XMLSchema#integer>")
    );
}

#[test]
fn test_order_limit_offset_distinct() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:a ex:p \"a\" . ex:b ex:p \"b\" . ex:c ex:p \"c\" . ex:c2 ex:p \"c\" .\n",
    );

    let (_, rows) = select(
        &store,
        "PREFIX ex: <http://ex/>\n\
         SELECT DISTINCT ?v WHERE { ?s ex:p ?v } ORDER BY ?v LIMIT 2 OFFSET 1",
    );
    assert_eq!(
        rows,
        vec![
            vec![Some("\"b\"".to_string())],
            vec![Some("\"c\"".to_string())],
        ]
    );
}

#[test]
fn test_repeated_execution_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\n\
         ex:a ex:p 1 . ex:b ex:p 2 . ex:c ex:q 3 .\n",
    );
    let query = "PREFIX ex: <http://ex/>\n\
                 SELECT ?s ?v WHERE { ?s ex:p ?v } ORDER BY ?s";
    let first = select(&store, query);
    let second = select(&store, query);
    assert_eq!(first, second);
}

#[test]
fn test_ask_and_construct() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, "@prefix ex: <http://ex/> .\nex:a ex:old 1 .\n");

    assert!(ask(
        &store,
        "PREFIX ex: <http://ex/>\nASK { ex:a ex:old ?v }"
    ));
    assert!(!ask(
        &store,
        "PREFIX ex: <http://ex/>\nASK { ex:a ex:new ?v }"
    ));

    match execute_query(
        &store,
        "PREFIX ex: <http://ex/>\nCONSTRUCT { ?s ex:new ?v } WHERE { ?s ex:old ?v }",
        &CancelToken::new(),
    )
    .unwrap()
    {
        QueryResults::Graph(triples) => {
            assert_eq!(triples.len(), 1);
            assert_eq!(triples[0][1].canonical(), "<http://ex/new>");
        }
        other => panic!("expected graph, got {other:?}"),
    }
}

#[test]
fn test_describe_returns_subject_triples() {
    let dir = TempDir::new().unwrap();
    let store = store_with(
        &dir,
        "@prefix ex: <http://ex/> .\nex:a ex:p 1 ; ex:q 2 . ex:b ex:p 3 .\n",
    );

    match execute_query(
        &store,
        "DESCRIBE <http://ex/a>",
        &CancelToken::new(),
    )
    .unwrap()
    {
        QueryResults::Graph(triples) => {
            assert_eq!(triples.len(), 2);
            assert!(triples.iter().all(|t| t[0].canonical() == "<http://ex/a>"));
        }
        other => panic!("expected graph, got {other:?}"),
    }
}

#[test]
fn test_temporal_as_of_clause() {
    let dir = TempDir::new().unwrap();
    let store = QuadStore::open(&Config::new(dir.path()).with_page_size(4096)).unwrap();

    let mut batch = store.begin_batch().unwrap();
    batch
        .assert_terms(
            &Term::iri("http://ex/x"),
            &Term::iri("http://ex/p"),
            &Term::literal("old"),
            None,
            Interval::new(10, 20).unwrap(),
        )
        .unwrap();
    batch.commit().unwrap();

    let (_, rows) = select(&store, "SELECT ?o WHERE { ?s ?p ?o } AS OF 15");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_deref(), Some("\"old\""));

    let (_, rows) = select(&store, "SELECT ?o WHERE { ?s ?p ?o } AS OF 25");
    assert!(rows.is_empty());

    let (_, rows) = select(&store, "SELECT ?o WHERE { ?s ?p ?o } BETWEEN 5 AND 50");
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_cancellation_aborts_query() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, "@prefix ex: <http://ex/> .\nex:a ex:p 1 .\n");

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = execute_query(&store, "SELECT * WHERE { ?s ?p ?o }", &cancel);
    assert!(matches!(
        result,
        Err(chronoquad::StoreError::Canceled)
    ));
}

#[test]
fn test_unknown_prefix_aborts_query() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, "@prefix ex: <http://ex/> .\nex:a ex:p 1 .\n");

    let result = execute_query(
        &store,
        "SELECT * WHERE { nope:a ?p ?o }",
        &CancelToken::new(),
    );
    assert!(matches!(
        result,
        Err(chronoquad::StoreError::UnknownPrefix(_))
    ));
}
