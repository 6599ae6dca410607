use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use super::{ItemId, UserId};

type EntryMap = IndexMap<ItemId, f32, FxBuildHasher>;

/// Insertion-ordered sparse vector keyed by item id.
///
/// Absent items read as 0. Overwriting an item keeps its original position,
/// so iteration order is the order in which items were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    owner: UserId,
    entries: EntryMap,
}

/// Orders two vectors so that the one with fewer entries comes first.
///
/// Similarity loops walk the first vector and probe the second.
pub fn smaller_first<'a>(
    a: &'a SparseVector,
    b: &'a SparseVector,
) -> (&'a SparseVector, &'a SparseVector) {
    if b.len() < a.len() { (b, a) } else { (a, b) }
}

impl SparseVector {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            entries: EntryMap::default(),
        }
    }

    pub fn with_capacity(owner: UserId, capacity: usize) -> Self {
        Self {
            owner,
            entries: EntryMap::with_capacity_and_hasher(capacity, FxBuildHasher),
        }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn get(&self, item: ItemId) -> f32 {
        self.entries.get(&item).copied().unwrap_or(0.0)
    }

    /// Like [`get`](Self::get) but distinguishes an explicit 0 from absence.
    pub fn try_get(&self, item: ItemId) -> Option<f32> {
        self.entries.get(&item).copied()
    }

    /// Insert or overwrite. Returns the previous score, if any.
    pub fn set(&mut self, item: ItemId, score: f32) -> Option<f32> {
        self.entries.insert(item, score)
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.entries.contains_key(&item)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Alias of [`len`](Self::len).
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, f32)> + '_ {
        self.entries.iter().map(|(&k, &v)| (k, v))
    }

    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.entries.keys().copied()
    }

    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = smaller_first(self, other);
        small
            .iter()
            .filter_map(|(item, a)| large.try_get(item).map(|b| a * b))
            .sum()
    }

    pub fn norm(&self) -> f32 {
        self.entries.values().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity.
    ///
    /// The default mode only looks at items present in both vectors. `strict`
    /// takes the union of both key sets, so items held by only one side still
    /// weigh on that side's magnitude. Returns 0 when either vector is empty
    /// or the magnitude product is zero.
    pub fn cosine(&self, other: &SparseVector, strict: bool) -> f32 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }

        let (small, large) = smaller_first(self, other);
        let mut num = 0.0f32;
        let mut d_small = 0.0f32;
        let mut d_large = 0.0f32;

        for (item, a) in small.iter() {
            match large.try_get(item) {
                Some(b) => {
                    num += a * b;
                    d_small += a * a;
                    d_large += b * b;
                }
                None if strict => d_small += a * a,
                None => {}
            }
        }

        if strict {
            d_large += large
                .iter()
                .filter(|(item, _)| !small.contains(*item))
                .map(|(_, b)| b * b)
                .sum::<f32>();
        }

        let denom = d_small * d_large;
        if denom == 0.0 {
            return 0.0;
        }
        (num / denom.sqrt()).clamp(-1.0, 1.0)
    }

    /// Smallest and largest score; `(0, 0)` for an empty vector.
    pub fn min_max(&self) -> (f32, f32) {
        let mut it = self.entries.values().copied();
        let Some(first) = it.next() else {
            return (0.0, 0.0);
        };
        it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)))
    }

    /// Entries ordered by score, highest first. Equal scores keep insertion order.
    pub fn sorted_by_score(&self) -> Vec<(ItemId, f32)> {
        let mut out: Vec<(ItemId, f32)> = self.iter().collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }

    /// Keeps only entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(ItemId, f32) -> bool) {
        self.entries.retain(|&k, v| keep(k, *v));
    }
}

impl FromIterator<(ItemId, f32)> for SparseVector {
    fn from_iter<T: IntoIterator<Item = (ItemId, f32)>>(iter: T) -> Self {
        let mut v = SparseVector::new(0);
        for (item, score) in iter {
            v.set(item, score);
        }
        v
    }
}

impl Extend<(ItemId, f32)> for SparseVector {
    fn extend<T: IntoIterator<Item = (ItemId, f32)>>(&mut self, iter: T) {
        for (item, score) in iter {
            self.set(item, score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn vector(entries: &[(u32, f32)]) -> SparseVector {
        entries.iter().copied().collect()
    }

    fn random_vector(rng: &mut StdRng, owner: u32) -> SparseVector {
        let n = rng.random_range(0..12);
        let mut v = SparseVector::new(owner);
        for _ in 0..n {
            let item = rng.random_range(0..20u32);
            let score = if rng.random::<bool>() { 1.0 } else { -1.0 };
            v.set(item, score * rng.random::<f32>());
        }
        v
    }

    #[test]
    fn test_get_absent_is_zero() {
        let v = vector(&[(1, 0.5)]);
        assert_eq!(v.get(1), 0.5);
        assert_eq!(v.get(2), 0.0);
        assert_eq!(v.try_get(2), None);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut v = vector(&[(3, 1.0), (1, 1.0), (2, 1.0)]);
        assert_eq!(v.set(1, -1.0), Some(1.0));
        let order: Vec<u32> = v.items().collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(v.get(1), -1.0);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn test_smaller_first() {
        let a = vector(&[(1, 1.0), (2, 1.0)]);
        let b = vector(&[(1, 1.0)]);
        let (s, l) = smaller_first(&a, &b);
        assert_eq!(s.len(), 1);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn test_dot_and_norm() {
        let a = vector(&[(1, 1.0), (2, 2.0), (3, -1.0)]);
        let b = vector(&[(2, 3.0), (3, 1.0), (9, 5.0)]);
        assert_eq!(a.dot(&b), 5.0);
        assert_eq!(a.dot(&b), b.dot(&a));
        assert!((a.norm() - 6.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_identical_and_opposite() {
        let a = vector(&[(10, 1.0), (11, -1.0)]);
        let b = vector(&[(10, -1.0), (11, 1.0)]);
        assert!((a.cosine(&a, false) - 1.0).abs() < 1e-6);
        assert!((a.cosine(&b, false) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_or_disjoint_is_zero() {
        let a = vector(&[(1, 1.0)]);
        let b = vector(&[(2, 1.0)]);
        let empty = SparseVector::new(0);
        assert_eq!(a.cosine(&b, false), 0.0);
        assert_eq!(a.cosine(&b, true), 0.0);
        assert_eq!(a.cosine(&empty, false), 0.0);
        assert_eq!(empty.cosine(&a, true), 0.0);
    }

    #[test]
    fn test_cosine_strict_counts_unshared_items() {
        let a = vector(&[(1, 1.0), (2, 1.0)]);
        let b = vector(&[(1, 1.0)]);
        assert!((a.cosine(&b, false) - 1.0).abs() < 1e-6);
        let strict = a.cosine(&b, true);
        assert!((strict - 1.0 / 2.0f32.sqrt()).abs() < 1e-6);
        assert!((b.cosine(&a, true) - strict).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_symmetric_and_bounded() {
        let mut rng = StdRng::seed_from_u64(42);
        for i in 0..500 {
            let a = random_vector(&mut rng, i);
            let b = random_vector(&mut rng, i + 1);
            for strict in [false, true] {
                let ab = a.cosine(&b, strict);
                let ba = b.cosine(&a, strict);
                assert!((ab - ba).abs() < 1e-5, "asymmetric: {} vs {}", ab, ba);
                assert!((-1.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn test_min_max() {
        assert_eq!(SparseVector::new(0).min_max(), (0.0, 0.0));
        let v = vector(&[(1, 0.25), (2, -0.75), (3, 0.5)]);
        assert_eq!(v.min_max(), (-0.75, 0.5));
    }

    #[test]
    fn test_sorted_by_score_is_stable() {
        let v = vector(&[(1, 0.5), (2, 1.0), (3, 0.5), (4, -1.0)]);
        let sorted: Vec<u32> = v.sorted_by_score().into_iter().map(|(i, _)| i).collect();
        assert_eq!(sorted, vec![2, 1, 3, 4]);
    }
}
