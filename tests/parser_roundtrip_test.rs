// Cross-format parsing properties: Turtle/TriG agreement, write-then-
// reparse identity, and the normative edge-case behaviors.

use chronoquad::common::CancelToken;
use chronoquad::parser::{negotiate_accept, parse_quads, NQuadsWriter, RdfFormat};

type Emitted = Vec<(String, String, String, String)>;

fn parse(text: &str, format: RdfFormat) -> chronoquad::Result<Emitted> {
    let mut quads = Vec::new();
    let mut sink = |s: &str, p: &str, o: &str, g: &str| -> chronoquad::Result<()> {
        quads.push((s.to_string(), p.to_string(), o.to_string(), g.to_string()));
        Ok(())
    };
    parse_quads(text.as_bytes(), format, None, &mut sink, &CancelToken::new())?;
    Ok(quads)
}

fn multiset(mut quads: Emitted) -> Emitted {
    quads.sort();
    quads
}

#[test]
fn test_turtle_write_reparse_identity() {
    let source = "@prefix ex: <http://ex/> .\n\
                  ex:s ex:p \"plain\", \"tag\"@en, 3.5, true ;\n\
                       a ex:Type .\n\
                  _:node ex:q ex:s .\n";
    let first = parse(source, RdfFormat::Turtle).unwrap();

    let mut written = Vec::new();
    {
        let mut writer = NQuadsWriter::new(&mut written);
        for (s, p, o, g) in &first {
            writer.write_quad(s, p, o, g).unwrap();
        }
    }
    let second = parse(
        std::str::from_utf8(&written).unwrap(),
        RdfFormat::NQuads,
    )
    .unwrap();
    assert_eq!(multiset(first), multiset(second));
}

#[test]
fn test_trig_write_reparse_identity() {
    let source = "@prefix ex: <http://ex/> .\n\
                  ex:default ex:p 1 .\n\
                  GRAPH ex:g { ex:a ex:p \"x\" . }\n\
                  ex:h { ex:b ex:q ex:c . }\n";
    let first = parse(source, RdfFormat::TriG).unwrap();
    assert_eq!(first.len(), 3);

    let mut written = Vec::new();
    {
        let mut writer = NQuadsWriter::new(&mut written);
        for (s, p, o, g) in &first {
            writer.write_quad(s, p, o, g).unwrap();
        }
    }
    let second = parse(
        std::str::from_utf8(&written).unwrap(),
        RdfFormat::NQuads,
    )
    .unwrap();
    assert_eq!(multiset(first), multiset(second));
}

#[test]
fn test_empty_collection_emits_nil() {
    let quads = parse(
        "@prefix ex: <http://ex/> .\nex:s ex:p () .",
        RdfFormat::Turtle,
    )
    .unwrap();
    assert_eq!(quads.len(), 1);
    assert_eq!(
        quads[0].2,
        "<http://www.w3.org/1999/02/22-rdf-syntax-ns#nil>"
    );
}

#[test]
fn test_nested_property_lists_get_fresh_labels() {
    let quads = parse(
        "@prefix ex: <http://ex/> .\n\
         ex:s ex:p [ ex:q [ ex:r 1 ] ] .\n\
         ex:t ex:p [ ex:q 2 ] .",
        RdfFormat::Turtle,
    )
    .unwrap();
    let labels: Vec<&str> = quads
        .iter()
        .flat_map(|q| [q.0.as_str(), q.2.as_str()])
        .filter(|t| t.starts_with("_:"))
        .collect();
    // every generated label is used, and the three nodes are distinct
    let distinct: std::collections::HashSet<_> = labels.iter().collect();
    assert_eq!(distinct.len(), 3);
}

#[test]
fn test_numeric_literal_datatypes() {
    let quads = parse(
        "@prefix ex: <http://ex/> .\nex:s ex:p .5, 1e1 .",
        RdfFormat::Turtle,
    )
    .unwrap();
    assert_eq!(
        quads[0].2,
        "\".5\"^^<http://www.w3.org/2001/XMLSchema#decimal>"
    );
    assert_eq!(
        quads[1].2,
        "\"1e1\"^^<http://www.w3.org/2001/XMLSchema#double>"
    );
}

#[test]
fn test_syntax_errors_carry_line_and_column() {
    let result = parse(
        "<http://ex/s> <http://ex/p> \"v\" .\n<http://ex/s> <http://bad iri> \"v\" .",
        RdfFormat::Turtle,
    );
    match result {
        Err(chronoquad::StoreError::Syntax { line, column, .. }) => {
            assert_eq!(line, 2);
            assert!(column > 1);
        }
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[test]
fn test_format_negotiation() {
    assert_eq!(
        RdfFormat::from_content_type("application/trig; charset=utf-8"),
        RdfFormat::TriG
    );
    assert_eq!(RdfFormat::from_content_type("text/csv"), RdfFormat::Unknown);
    assert_eq!(
        negotiate_accept("application/rdf+xml;q=0.4, application/n-quads;q=0.8"),
        RdfFormat::NQuads
    );
}
