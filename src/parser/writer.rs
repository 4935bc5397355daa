// Canonical N-Quads / N-Triples serialization. Terms arrive already in
// canonical form, so writing is concatenation with the right separators.

use std::io::Write;

use crate::error::Result;

pub struct NQuadsWriter<'a, W: Write> {
    out: &'a mut W,
}

impl<'a, W: Write> NQuadsWriter<'a, W> {
    pub fn new(out: &'a mut W) -> Self {
        Self { out }
    }

    /// An empty graph string means the default graph and is omitted.
    pub fn write_quad(&mut self, s: &str, p: &str, o: &str, g: &str) -> Result<()> {
        if g.is_empty() {
            writeln!(self.out, "{s} {p} {o} .")?;
        } else {
            writeln!(self.out, "{s} {p} {o} {g} .")?;
        }
        Ok(())
    }
}

pub struct NTriplesWriter<'a, W: Write> {
    out: &'a mut W,
}

impl<'a, W: Write> NTriplesWriter<'a, W> {
    pub fn new(out: &'a mut W) -> Self {
        Self { out }
    }

    pub fn write_triple(&mut self, s: &str, p: &str, o: &str) -> Result<()> {
        writeln!(self.out, "{s} {p} {o} .")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CancelToken;
    use crate::parser::{parse_quads, RdfFormat};

    #[test]
    fn test_write_forms() {
        let mut buf = Vec::new();
        let mut writer = NQuadsWriter::new(&mut buf);
        writer
            .write_quad("<http://ex/s>", "<http://ex/p>", "\"v\"", "")
            .unwrap();
        writer
            .write_quad("<http://ex/s>", "<http://ex/p>", "\"v\"", "<http://ex/g>")
            .unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "<http://ex/s> <http://ex/p> \"v\" .\n\
             <http://ex/s> <http://ex/p> \"v\" <http://ex/g> .\n"
        );
    }

    #[test]
    fn test_written_output_reparses_identically() {
        let source = "@prefix ex: <http://ex/> .\n\
                      ex:s ex:p \"a\\\"b\", 42, \"t\"@en ; a ex:T .\n";

        let mut first: Vec<(String, String, String, String)> = Vec::new();
        {
            let mut sink = |s: &str, p: &str, o: &str, g: &str| -> crate::error::Result<()> {
                first.push((s.into(), p.into(), o.into(), g.into()));
                Ok(())
            };
            parse_quads(
                source.as_bytes(),
                RdfFormat::Turtle,
                None,
                &mut sink,
                &CancelToken::new(),
            )
            .unwrap();
        }

        let mut serialized = Vec::new();
        {
            let mut writer = NQuadsWriter::new(&mut serialized);
            for (s, p, o, g) in &first {
                writer.write_quad(s, p, o, g).unwrap();
            }
        }

        let mut second: Vec<(String, String, String, String)> = Vec::new();
        {
            let mut sink = |s: &str, p: &str, o: &str, g: &str| -> crate::error::Result<()> {
                second.push((s.into(), p.into(), o.into(), g.into()));
                Ok(())
            };
            parse_quads(
                serialized.as_slice(),
                RdfFormat::NQuads,
                None,
                &mut sink,
                &CancelToken::new(),
            )
            .unwrap();
        }

        assert_eq!(first, second);
    }
}
