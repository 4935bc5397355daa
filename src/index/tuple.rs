use std::cmp::Ordering;

/// Serialized size of one index entry: four key columns plus the interval.
pub const TUPLE_BYTES: usize = 48;

/// One index entry in key-permuted order. `key` holds the four atom ids
/// arranged for the owning ordering; the interval columns follow.
///
/// Sort order: key columns ascending, then `valid_from` ascending, then
/// `valid_to` descending (longest-asserted first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexTuple {
    pub key: [u64; 4],
    pub valid_from: u64,
    pub valid_to: u64,
}

impl IndexTuple {
    pub fn new(key: [u64; 4], valid_from: u64, valid_to: u64) -> Self {
        Self {
            key,
            valid_from,
            valid_to,
        }
    }

    pub fn encode_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= TUPLE_BYTES);
        for (i, v) in self.key.iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
        }
        out[32..40].copy_from_slice(&self.valid_from.to_le_bytes());
        out[40..48].copy_from_slice(&self.valid_to.to_le_bytes());
    }

    pub fn decode(data: &[u8]) -> Self {
        debug_assert!(data.len() >= TUPLE_BYTES);
        let mut key = [0u64; 4];
        for (i, v) in key.iter_mut().enumerate() {
            *v = u64::from_le_bytes(data[i * 8..i * 8 + 8].try_into().unwrap());
        }
        Self {
            key,
            valid_from: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            valid_to: u64::from_le_bytes(data[40..48].try_into().unwrap()),
        }
    }

    pub fn matches_prefix(&self, prefix: &[u64]) -> bool {
        self.key[..prefix.len()] == *prefix
    }
}

impl Ord for IndexTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.valid_from.cmp(&other.valid_from))
            .then_with(|| other.valid_to.cmp(&self.valid_to))
    }
}

impl PartialOrd for IndexTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The six index orderings. The graph column always follows the three
/// triple columns; choosing among the six gives every bound-position
/// combination a usable prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    Spog = 0,
    Sopg = 1,
    Psog = 2,
    Posg = 3,
    Ospg = 4,
    Opsg = 5,
}

impl IndexOrder {
    pub const ALL: [IndexOrder; 6] = [
        IndexOrder::Spog,
        IndexOrder::Sopg,
        IndexOrder::Psog,
        IndexOrder::Posg,
        IndexOrder::Ospg,
        IndexOrder::Opsg,
    ];

    /// Key position -> quad position (0=s, 1=p, 2=o, 3=g).
    fn permutation(self) -> [usize; 4] {
        match self {
            IndexOrder::Spog => [0, 1, 2, 3],
            IndexOrder::Sopg => [0, 2, 1, 3],
            IndexOrder::Psog => [1, 0, 2, 3],
            IndexOrder::Posg => [1, 2, 0, 3],
            IndexOrder::Ospg => [2, 0, 1, 3],
            IndexOrder::Opsg => [2, 1, 0, 3],
        }
    }

    /// Arrange quad columns `(s, p, o, g)` into this ordering's key.
    pub fn to_key(self, s: u64, p: u64, o: u64, g: u64) -> [u64; 4] {
        let quad = [s, p, o, g];
        let perm = self.permutation();
        [
            quad[perm[0]],
            quad[perm[1]],
            quad[perm[2]],
            quad[perm[3]],
        ]
    }

    /// Recover quad columns `(s, p, o, g)` from this ordering's key.
    pub fn from_key(self, key: [u64; 4]) -> (u64, u64, u64, u64) {
        let perm = self.permutation();
        let mut quad = [0u64; 4];
        for (i, &p) in perm.iter().enumerate() {
            quad[p] = key[i];
        }
        (quad[0], quad[1], quad[2], quad[3])
    }

    /// How many leading key columns are bound given the bound mask over
    /// `(s, p, o, g)`.
    pub fn bound_prefix_len(self, bound: [bool; 4]) -> usize {
        let perm = self.permutation();
        perm.iter().take_while(|&&p| bound[p]).count()
    }

    /// Build the seek prefix for this ordering from optionally bound
    /// columns; stops at the first unbound position.
    pub fn seek_prefix(
        self,
        s: Option<u64>,
        p: Option<u64>,
        o: Option<u64>,
        g: Option<u64>,
    ) -> Vec<u64> {
        let quad = [s, p, o, g];
        self.permutation()
            .iter()
            .map_while(|&pos| quad[pos])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let t = IndexTuple::new([1, 2, 3, 4], 10, u64::MAX);
        let mut buf = [0u8; TUPLE_BYTES];
        t.encode_into(&mut buf);
        assert_eq!(IndexTuple::decode(&buf), t);
    }

    #[test]
    fn test_temporal_tie_break() {
        // Same key: earlier valid_from first, then longer interval first
        let a = IndexTuple::new([1, 1, 1, 1], 5, 100);
        let b = IndexTuple::new([1, 1, 1, 1], 5, 50);
        let c = IndexTuple::new([1, 1, 1, 1], 8, 9);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_permutations_invert() {
        for order in IndexOrder::ALL {
            let key = order.to_key(11, 22, 33, 44);
            assert_eq!(order.from_key(key), (11, 22, 33, 44));
        }
    }

    #[test]
    fn test_bound_prefix_len() {
        // s and o bound: SOPG sees a 2-column prefix, SPOG only 1
        let bound = [true, false, true, false];
        assert_eq!(IndexOrder::Sopg.bound_prefix_len(bound), 2);
        assert_eq!(IndexOrder::Spog.bound_prefix_len(bound), 1);
        assert_eq!(IndexOrder::Psog.bound_prefix_len(bound), 0);
        assert_eq!(IndexOrder::Ospg.bound_prefix_len(bound), 2);
    }

    #[test]
    fn test_seek_prefix_stops_at_unbound() {
        let prefix = IndexOrder::Spog.seek_prefix(Some(7), None, Some(9), None);
        assert_eq!(prefix, vec![7]);
        let prefix = IndexOrder::Sopg.seek_prefix(Some(7), None, Some(9), None);
        assert_eq!(prefix, vec![7, 9]);
    }
}
