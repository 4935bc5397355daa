use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::store::quad::TriplePosition;

/// Interned term id. Deterministic only within a single store directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(pub u64);

impl AtomId {
    /// Reserved: never a valid term.
    pub const INVALID: AtomId = AtomId(0);

    /// Reserved: the unnamed default graph. Conveyed as an empty string at
    /// the public boundary.
    pub const DEFAULT_GRAPH: AtomId = AtomId(1);

    const FIRST_DYNAMIC: u64 = 2;

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

struct DictInner {
    map: HashMap<Arc<str>, AtomId>,
    strings: Vec<Arc<str>>,
}

/// Bidirectional mapping between canonical term strings and atom ids.
///
/// Append-only: atoms live for the lifetime of the store. Interning takes
/// the writer lock; lookups see a monotonically growing snapshot.
pub struct AtomDictionary {
    inner: RwLock<DictInner>,
    heap: Mutex<BufWriter<File>>,
}

impl AtomDictionary {
    /// Open or create the `atoms.strings` heap at `path` and rebuild the
    /// in-memory map from it.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut map = HashMap::new();
        let mut strings = Vec::new();
        let mut offset = 0usize;
        let mut valid_len = 0u64;

        while offset < bytes.len() {
            if offset + 4 > bytes.len() {
                break;
            }
            let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            if offset + 4 + len > bytes.len() {
                break;
            }
            let text = std::str::from_utf8(&bytes[offset + 4..offset + 4 + len])
                .map_err(|_| StoreError::Corruption("non-UTF-8 atom record".to_string()))?;
            let id = AtomId(AtomId::FIRST_DYNAMIC + strings.len() as u64);
            let shared: Arc<str> = Arc::from(text);
            map.insert(shared.clone(), id);
            strings.push(shared);
            offset += 4 + len;
            valid_len = offset as u64;
        }

        if valid_len < bytes.len() as u64 {
            warn!(
                valid = valid_len,
                total = bytes.len(),
                "truncating torn tail of atom heap"
            );
            file.set_len(valid_len)?;
        }

        Ok(Self {
            inner: RwLock::new(DictInner { map, strings }),
            heap: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Return the existing id for `text` or assign the next one, appending
    /// the string to the heap.
    pub fn intern(&self, text: &str) -> Result<AtomId> {
        if text.is_empty() {
            return Ok(AtomId::DEFAULT_GRAPH);
        }

        if let Some(id) = self.inner.read().map.get(text) {
            return Ok(*id);
        }

        let mut inner = self.inner.write();
        if let Some(id) = inner.map.get(text) {
            return Ok(*id);
        }

        let id = AtomId(AtomId::FIRST_DYNAMIC + inner.strings.len() as u64);

        {
            let mut heap = self.heap.lock();
            heap.write_all(&(text.len() as u32).to_le_bytes())?;
            heap.write_all(text.as_bytes())?;
        }

        let shared: Arc<str> = Arc::from(text);
        inner.map.insert(shared.clone(), id);
        inner.strings.push(shared);
        Ok(id)
    }

    /// Lookup without interning; used for query constants where an absent
    /// term simply means an empty match.
    pub fn get(&self, text: &str) -> Option<AtomId> {
        if text.is_empty() {
            return Some(AtomId::DEFAULT_GRAPH);
        }
        self.inner.read().map.get(text).copied()
    }

    /// Resolve an atom id back to its canonical string.
    pub fn lookup(&self, id: AtomId) -> Option<Arc<str>> {
        if id == AtomId::DEFAULT_GRAPH {
            return Some(Arc::from(""));
        }
        if id.0 < AtomId::FIRST_DYNAMIC {
            return None;
        }
        self.inner
            .read()
            .strings
            .get((id.0 - AtomId::FIRST_DYNAMIC) as usize)
            .cloned()
    }

    /// Number of interned atoms (reserved ids excluded).
    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and fsync the heap; called before a WAL commit becomes durable
    /// so no committed quad can reference a lost atom.
    pub fn sync(&self) -> Result<()> {
        let mut heap = self.heap.lock();
        heap.flush()?;
        heap.get_ref().sync_data()?;
        Ok(())
    }

    /// Validate that a canonical term may occupy the given triple position.
    pub fn check_position(text: &str, position: TriplePosition) -> Result<()> {
        let first = text.as_bytes().first().copied();
        let ok = match position {
            TriplePosition::Subject => matches!(first, Some(b'<') | Some(b'_')),
            TriplePosition::Predicate => matches!(first, Some(b'<')),
            TriplePosition::Object => matches!(first, Some(b'<') | Some(b'_') | Some(b'"')),
            TriplePosition::Graph => text.is_empty() || matches!(first, Some(b'<') | Some(b'_')),
        };
        if ok {
            Ok(())
        } else {
            Err(StoreError::SchemaInvariant(format!(
                "term {text:?} not allowed in {position:?} position"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_intern_lookup_round_trip() {
        let dir = TempDir::new().unwrap();
        let dict = AtomDictionary::open(&dir.path().join("atoms.strings")).unwrap();

        let a = dict.intern("<http://ex/s>").unwrap();
        let b = dict.intern("\"v\"").unwrap();
        assert_ne!(a, b);
        assert_eq!(dict.intern("<http://ex/s>").unwrap(), a);

        assert_eq!(&*dict.lookup(a).unwrap(), "<http://ex/s>");
        assert_eq!(&*dict.lookup(b).unwrap(), "\"v\"");
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_reserved_atoms() {
        let dir = TempDir::new().unwrap();
        let dict = AtomDictionary::open(&dir.path().join("atoms.strings")).unwrap();

        assert_eq!(dict.intern("").unwrap(), AtomId::DEFAULT_GRAPH);
        assert_eq!(&*dict.lookup(AtomId::DEFAULT_GRAPH).unwrap(), "");
        assert_eq!(dict.lookup(AtomId::INVALID), None);
        assert!(!AtomId::INVALID.is_valid());
    }

    #[test]
    fn test_reopen_preserves_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("atoms.strings");

        let a;
        let b;
        {
            let dict = AtomDictionary::open(&path).unwrap();
            a = dict.intern("<http://ex/a>").unwrap();
            b = dict.intern("\"hello world\"@en").unwrap();
            dict.sync().unwrap();
        }

        let dict = AtomDictionary::open(&path).unwrap();
        assert_eq!(dict.get("<http://ex/a>"), Some(a));
        assert_eq!(dict.get("\"hello world\"@en"), Some(b));
        assert_eq!(dict.intern("<http://ex/c>").unwrap().0, b.0 + 1);
    }

    #[test]
    fn test_torn_tail_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("atoms.strings");

        {
            let dict = AtomDictionary::open(&path).unwrap();
            dict.intern("<http://ex/a>").unwrap();
            dict.sync().unwrap();
        }

        // Append a torn record: length prefix promising more than present
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(b"short").unwrap();
        }

        let dict = AtomDictionary::open(&path).unwrap();
        assert_eq!(dict.len(), 1);
        assert!(dict.get("<http://ex/a>").is_some());
    }

    #[test]
    fn test_byte_exact_equality() {
        let dir = TempDir::new().unwrap();
        let dict = AtomDictionary::open(&dir.path().join("atoms.strings")).unwrap();

        // No Unicode normalization: NFC and NFD forms are distinct atoms
        let nfc = dict.intern("\"caf\u{e9}\"").unwrap();
        let nfd = dict.intern("\"cafe\u{301}\"").unwrap();
        assert_ne!(nfc, nfd);
    }

    #[test]
    fn test_position_checks() {
        assert!(AtomDictionary::check_position("<http://ex/p>", TriplePosition::Predicate).is_ok());
        assert!(AtomDictionary::check_position("\"v\"", TriplePosition::Predicate).is_err());
        assert!(AtomDictionary::check_position("\"v\"", TriplePosition::Subject).is_err());
        assert!(AtomDictionary::check_position("\"v\"", TriplePosition::Object).is_ok());
        assert!(AtomDictionary::check_position("", TriplePosition::Graph).is_ok());
        assert!(AtomDictionary::check_position("_:b", TriplePosition::Graph).is_ok());
    }
}
