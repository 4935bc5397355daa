// # Streaming Parse Substrate
//
// A shared code-point lexer with pooled buffers feeds the Turtle, TriG,
// N-Triples, and N-Quads grammars. Grammars emit canonical term spans
// through a callback; the spans are valid only for the duration of each
// call.

mod format;
mod iri;
pub(crate) mod lexer;
mod ntriples;
mod turtle;
mod writer;

pub use format::{negotiate_accept, RdfFormat};
pub use iri::{is_absolute_iri, resolve_iri};
pub use lexer::Lexer;
pub use ntriples::NTriplesParser;
pub use turtle::TurtleParser;
pub use writer::{NQuadsWriter, NTriplesWriter};

use std::io::Read;

use crate::common::CancelToken;
use crate::error::{Result, StoreError};

/// Receives one quad per grammar emission. All four spans are borrowed
/// and die when the call returns; an empty `graph` span denotes the
/// default graph. Callers must intern or copy to retain.
pub trait QuadSink {
    fn quad(&mut self, subject: &str, predicate: &str, object: &str, graph: &str) -> Result<()>;
}

impl<F> QuadSink for F
where
    F: FnMut(&str, &str, &str, &str) -> Result<()>,
{
    fn quad(&mut self, subject: &str, predicate: &str, object: &str, graph: &str) -> Result<()> {
        self(subject, predicate, object, graph)
    }
}

/// Parse `input` in the given format, emitting quads into `sink`.
pub fn parse_quads<R: Read>(
    input: R,
    format: RdfFormat,
    base: Option<&str>,
    sink: &mut dyn QuadSink,
    cancel: &CancelToken,
) -> Result<()> {
    match format {
        RdfFormat::Turtle | RdfFormat::TriG => {
            let trig = format == RdfFormat::TriG;
            let mut parser = TurtleParser::new(input, trig).with_cancel(cancel.clone());
            if let Some(base) = base {
                parser = parser.with_base(base);
            }
            parser.parse(sink)
        }
        RdfFormat::NTriples | RdfFormat::NQuads => {
            let quads = format == RdfFormat::NQuads;
            NTriplesParser::new(input, quads)
                .with_cancel(cancel.clone())
                .parse(sink)
        }
        other => Err(StoreError::Internal(format!(
            "no parser registered for {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turtle_and_trig_agree_on_turtle_input() {
        let source = "@prefix ex: <http://ex/> .\nex:s ex:p ex:o , \"v\" .\n";
        let collect = |format: RdfFormat| {
            let mut quads = Vec::new();
            let mut sink = |s: &str, p: &str, o: &str, g: &str| -> Result<()> {
                quads.push((s.to_string(), p.to_string(), o.to_string(), g.to_string()));
                Ok(())
            };
            parse_quads(source.as_bytes(), format, None, &mut sink, &CancelToken::new()).unwrap();
            quads
        };
        assert_eq!(collect(RdfFormat::Turtle), collect(RdfFormat::TriG));
    }

    #[test]
    fn test_unparseable_formats_rejected() {
        let mut sink = |_: &str, _: &str, _: &str, _: &str| -> Result<()> { Ok(()) };
        assert!(parse_quads(
            "".as_bytes(),
            RdfFormat::RdfXml,
            None,
            &mut sink,
            &CancelToken::new()
        )
        .is_err());
    }
}
