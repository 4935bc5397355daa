// Binding tables: the positional result rows produced by the executor.

use std::cmp::Ordering;

use crate::atoms::vocab;
use crate::atoms::{AtomDictionary, AtomId, Term};

/// One cell of a result row. `Unbound` is distinct from every literal,
/// including the empty string. Inline numerics and booleans come from
/// expression evaluation; stored terms stay as atoms.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Unbound,
    Atom(AtomId),
    Integer(i64),
    Double(f64),
    Boolean(bool),
}

impl Binding {
    pub fn is_bound(&self) -> bool {
        !matches!(self, Binding::Unbound)
    }

    /// Materialize the binding as a term, resolving atoms through the
    /// dictionary.
    pub fn to_term(&self, dict: &AtomDictionary) -> Option<Term> {
        match self {
            Binding::Unbound => None,
            Binding::Atom(atom) => {
                let text = dict.lookup(*atom)?;
                Term::parse_canonical(&text).ok()
            }
            Binding::Integer(i) => Some(Term::typed_literal(i.to_string(), vocab::XSD_INTEGER)),
            Binding::Double(d) => Some(Term::typed_literal(format_double(*d), vocab::XSD_DOUBLE)),
            Binding::Boolean(b) => Some(Term::typed_literal(b.to_string(), vocab::XSD_BOOLEAN)),
        }
    }

    /// Canonical text used for dedup keys and group keys.
    pub fn key(&self, dict: &AtomDictionary) -> String {
        match self {
            Binding::Unbound => String::new(),
            Binding::Atom(atom) => dict
                .lookup(*atom)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            Binding::Integer(i) => format!("\"{i}\"^^<{}>", vocab::XSD_INTEGER),
            Binding::Double(d) => format!("\"{}\"^^<{}>", format_double(*d), vocab::XSD_DOUBLE),
            Binding::Boolean(b) => format!("\"{b}\"^^<{}>", vocab::XSD_BOOLEAN),
        }
    }
}

pub fn format_double(d: f64) -> String {
    if d == d.trunc() && d.is_finite() && d.abs() < 1e15 {
        format!("{d:.1}")
    } else {
        format!("{d}")
    }
}

/// One solution: a positional array over the executor's variable table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Binding>,
}

impl Row {
    pub fn unit(width: usize) -> Self {
        Self {
            values: vec![Binding::Unbound; width],
        }
    }

    pub fn get(&self, var: usize) -> &Binding {
        &self.values[var]
    }

    pub fn dedup_key(&self, vars: &[usize], dict: &AtomDictionary) -> Vec<String> {
        vars.iter().map(|&v| self.values[v].key(dict)).collect()
    }
}

/// SPARQL term ordering: unbound < blank < IRI < literal; literals by
/// datatype, then lexical value.
pub fn compare_bindings(a: &Binding, b: &Binding, dict: &AtomDictionary) -> Ordering {
    let ka = sort_key(a, dict);
    let kb = sort_key(b, dict);
    ka.cmp(&kb)
}

fn sort_key(b: &Binding, dict: &AtomDictionary) -> (u8, String, String) {
    match b {
        Binding::Unbound => (0, String::new(), String::new()),
        Binding::Atom(atom) => match dict.lookup(*atom) {
            None => (0, String::new(), String::new()),
            Some(text) => match Term::parse_canonical(&text) {
                Ok(Term::BlankNode(label)) => (1, String::new(), label),
                Ok(Term::Iri(iri)) => (2, String::new(), iri),
                Ok(Term::Literal {
                    value,
                    lang,
                    datatype,
                }) => {
                    let dt = lang
                        .map(|l| format!("@{l}"))
                        .or(datatype)
                        .unwrap_or_default();
                    (3, dt, value)
                }
                Err(_) => (0, String::new(), String::new()),
            },
        },
        Binding::Integer(i) => (3, vocab::XSD_INTEGER.to_string(), i.to_string()),
        Binding::Double(d) => (3, vocab::XSD_DOUBLE.to_string(), format_double(*d)),
        Binding::Boolean(v) => (3, vocab::XSD_BOOLEAN.to_string(), v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ordering_classes() {
        let dir = TempDir::new().unwrap();
        let dict = AtomDictionary::open(&dir.path().join("atoms.strings")).unwrap();
        let blank = Binding::Atom(dict.intern("_:b").unwrap());
        let iri = Binding::Atom(dict.intern("<http://ex/a>").unwrap());
        let lit = Binding::Atom(dict.intern("\"x\"").unwrap());

        assert_eq!(
            compare_bindings(&Binding::Unbound, &blank, &dict),
            Ordering::Less
        );
        assert_eq!(compare_bindings(&blank, &iri, &dict), Ordering::Less);
        assert_eq!(compare_bindings(&iri, &lit, &dict), Ordering::Less);
        assert_eq!(compare_bindings(&lit, &lit, &dict), Ordering::Equal);
    }

    #[test]
    fn test_unbound_distinct_from_empty_string() {
        let dir = TempDir::new().unwrap();
        let dict = AtomDictionary::open(&dir.path().join("atoms.strings")).unwrap();
        let empty = Binding::Atom(dict.intern("\"\"").unwrap());
        assert_ne!(
            compare_bindings(&Binding::Unbound, &empty, &dict),
            Ordering::Equal
        );
        assert_ne!(Binding::Unbound.key(&dict), empty.key(&dict));
    }

    #[test]
    fn test_inline_term_rendering() {
        let dir = TempDir::new().unwrap();
        let dict = AtomDictionary::open(&dir.path().join("atoms.strings")).unwrap();
        assert_eq!(
            Binding::Integer(15).to_term(&dict).unwrap().canonical(),
            "\"15\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
        assert_eq!(
            Binding::Double(2.0).to_term(&dict).unwrap().canonical(),
            "\"2.0\"^^<http://www.w3.org/2001/XMLSchema#double>"
        );
    }
}
