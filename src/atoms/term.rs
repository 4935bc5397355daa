use crate::error::{Result, StoreError};
use std::fmt;

/// Coarse classification of a term from its canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Iri,
    BlankNode,
    Literal,
}

/// An RDF term: IRI, blank-node label, or literal.
///
/// The canonical string form encloses IRIs in `<>`, prefixes blank nodes
/// with `_:`, and writes literals as `"value"`, `"value"@lang`, or
/// `"value"^^<datatype>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    BlankNode(String),
    Literal {
        value: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::BlankNode(label.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn lang_literal(value: impl Into<String>, lang: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            lang: Some(lang.into()),
            datatype: None,
        }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            lang: None,
            datatype: Some(datatype.into()),
        }
    }

    pub fn kind(&self) -> TermKind {
        match self {
            Term::Iri(_) => TermKind::Iri,
            Term::BlankNode(_) => TermKind::BlankNode,
            Term::Literal { .. } => TermKind::Literal,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    /// Classify a canonical term string without parsing it fully.
    pub fn kind_of(canonical: &str) -> Option<TermKind> {
        match canonical.as_bytes().first()? {
            b'<' => Some(TermKind::Iri),
            b'_' => Some(TermKind::BlankNode),
            b'"' => Some(TermKind::Literal),
            _ => None,
        }
    }

    /// Render the canonical form used as the dictionary key.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    pub fn write_canonical(&self, out: &mut String) {
        match self {
            Term::Iri(iri) => {
                out.push('<');
                out.push_str(iri);
                out.push('>');
            }
            Term::BlankNode(label) => {
                out.push_str("_:");
                out.push_str(label);
            }
            Term::Literal {
                value,
                lang,
                datatype,
            } => {
                out.push('"');
                escape_literal_into(value, out);
                out.push('"');
                if let Some(lang) = lang {
                    out.push('@');
                    out.push_str(lang);
                } else if let Some(dt) = datatype {
                    out.push_str("^^<");
                    out.push_str(dt);
                    out.push('>');
                }
            }
        }
    }

    /// Parse a canonical term string back into a `Term`.
    pub fn parse_canonical(text: &str) -> Result<Term> {
        let bytes = text.as_bytes();
        match bytes.first() {
            Some(b'<') => {
                if !text.ends_with('>') {
                    return Err(StoreError::Corruption(format!("malformed IRI atom: {text}")));
                }
                Ok(Term::Iri(text[1..text.len() - 1].to_string()))
            }
            Some(b'_') => {
                let label = text
                    .strip_prefix("_:")
                    .ok_or_else(|| StoreError::Corruption(format!("malformed blank atom: {text}")))?;
                Ok(Term::BlankNode(label.to_string()))
            }
            Some(b'"') => parse_canonical_literal(text),
            _ => Err(StoreError::Corruption(format!("malformed atom: {text}"))),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn parse_canonical_literal(text: &str) -> Result<Term> {
    let inner_start = 1;
    let mut idx = inner_start;
    let bytes = text.as_bytes();
    let mut value = String::new();

    loop {
        if idx >= bytes.len() {
            return Err(StoreError::Corruption(format!(
                "unterminated literal atom: {text}"
            )));
        }
        match bytes[idx] {
            b'"' => break,
            b'\\' => {
                idx += 1;
                let esc = *bytes.get(idx).ok_or_else(|| {
                    StoreError::Corruption(format!("dangling escape in atom: {text}"))
                })?;
                match esc {
                    b'\\' => value.push('\\'),
                    b'"' => value.push('"'),
                    b'n' => value.push('\n'),
                    b'r' => value.push('\r'),
                    b't' => value.push('\t'),
                    other => {
                        return Err(StoreError::Corruption(format!(
                            "invalid escape \\{} in atom",
                            other as char
                        )))
                    }
                }
                idx += 1;
            }
            _ => {
                // Advance one UTF-8 code point
                let ch_len = utf8_len(bytes[idx]);
                value.push_str(&text[idx..idx + ch_len]);
                idx += ch_len;
            }
        }
    }

    let rest = &text[idx + 1..];
    if rest.is_empty() {
        return Ok(Term::Literal {
            value,
            lang: None,
            datatype: None,
        });
    }
    if let Some(lang) = rest.strip_prefix('@') {
        return Ok(Term::Literal {
            value,
            lang: Some(lang.to_string()),
            datatype: None,
        });
    }
    if let Some(dt) = rest.strip_prefix("^^<").and_then(|r| r.strip_suffix('>')) {
        return Ok(Term::Literal {
            value,
            lang: None,
            datatype: Some(dt.to_string()),
        });
    }
    Err(StoreError::Corruption(format!(
        "malformed literal suffix in atom: {text}"
    )))
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

pub(crate) fn escape_literal_into(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::vocab;

    #[test]
    fn test_canonical_forms() {
        assert_eq!(Term::iri("http://ex/s").canonical(), "<http://ex/s>");
        assert_eq!(Term::blank("b0").canonical(), "_:b0");
        assert_eq!(Term::literal("v").canonical(), "\"v\"");
        assert_eq!(Term::lang_literal("hi", "en").canonical(), "\"hi\"@en");
        assert_eq!(
            Term::typed_literal("5", vocab::XSD_INTEGER).canonical(),
            "\"5\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn test_literal_escaping_round_trip() {
        let term = Term::literal("line\none\t\"quoted\" \\ back");
        let canonical = term.canonical();
        assert_eq!(Term::parse_canonical(&canonical).unwrap(), term);
    }

    #[test]
    fn test_parse_canonical() {
        assert_eq!(
            Term::parse_canonical("<http://ex/p>").unwrap(),
            Term::iri("http://ex/p")
        );
        assert_eq!(Term::parse_canonical("_:x").unwrap(), Term::blank("x"));
        assert_eq!(
            Term::parse_canonical("\"hi\"@en-GB").unwrap(),
            Term::lang_literal("hi", "en-GB")
        );
        assert!(Term::parse_canonical("bare").is_err());
        assert!(Term::parse_canonical("\"open").is_err());
    }

    #[test]
    fn test_kind_of() {
        assert_eq!(Term::kind_of("<http://ex/>"), Some(TermKind::Iri));
        assert_eq!(Term::kind_of("_:b"), Some(TermKind::BlankNode));
        assert_eq!(Term::kind_of("\"v\""), Some(TermKind::Literal));
        assert_eq!(Term::kind_of(""), None);
    }
}
