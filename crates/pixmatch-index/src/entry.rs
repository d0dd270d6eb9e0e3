//! One index entry: an external reference, its miniature, and the set of
//! references it must never be matched against.

use pixmatch_error::{PixmatchError, Result};
use pixmatch_types::{ExternalRef, Miniature};
use smallvec::SmallVec;

/// Per-entry exclusion set. Most entries have none, so the storage is
/// inline until a handful of refs accumulate.
pub type SbdSet = SmallVec<[ExternalRef; 4]>;

/// A persisted similar-but-different pair in canonical form.
///
/// The lexicographically smaller reference owns the relation: the
/// comparison engine only examines pairs in ascending ref order, so
/// consulting the smaller side's exclusion set suffices. Storing the
/// relation once halves both storage and lookup cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbdPair {
    smaller: ExternalRef,
    larger: ExternalRef,
}

impl SbdPair {
    /// Build a pair, enforcing `smaller < larger`.
    pub fn new(smaller: ExternalRef, larger: ExternalRef) -> Result<Self> {
        if smaller >= larger {
            return Err(PixmatchError::internal(format!(
                "similar_but_different pair ({smaller}, {larger}) is not in canonical order"
            )));
        }
        Ok(Self { smaller, larger })
    }

    #[must_use]
    pub fn smaller(&self) -> &ExternalRef {
        &self.smaller
    }

    #[must_use]
    pub fn larger(&self) -> &ExternalRef {
        &self.larger
    }

    /// Split into `(smaller, larger)`.
    #[must_use]
    pub fn into_parts(self) -> (ExternalRef, ExternalRef) {
        (self.smaller, self.larger)
    }
}

/// An image known to the index: reference, miniature, exclusions.
///
/// Owned exclusively by the [`ImageIndex`](crate::ImageIndex); nothing
/// outside the index retains a handle after insertion.
#[derive(Debug, Clone)]
pub struct Entry {
    external_ref: ExternalRef,
    miniature: Miniature,
    sbd: SbdSet,
}

impl Entry {
    #[must_use]
    pub fn new(external_ref: ExternalRef, miniature: Miniature, sbd: SbdSet) -> Self {
        Self {
            external_ref,
            miniature,
            sbd,
        }
    }

    #[must_use]
    pub fn external_ref(&self) -> &ExternalRef {
        &self.external_ref
    }

    #[must_use]
    pub fn miniature(&self) -> &Miniature {
        &self.miniature
    }

    /// Exclusion refs attached to this entry.
    #[must_use]
    pub fn sbd(&self) -> &[ExternalRef] {
        &self.sbd
    }

    /// Whether `other` is a known false positive for this entry.
    #[must_use]
    pub fn excludes(&self, other: &str) -> bool {
        self.sbd.iter().any(|r| r.as_str() == other)
    }

    pub(crate) fn prepend_sbd(&mut self, other: ExternalRef) {
        self.sbd.insert(0, other);
    }

    pub(crate) fn clear_sbd(&mut self) {
        self.sbd.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ExternalRef {
        ExternalRef::new(s).expect("valid ref")
    }

    #[test]
    fn pair_enforces_canonical_order() {
        assert!(SbdPair::new(r("a"), r("b")).is_ok());
        assert!(SbdPair::new(r("b"), r("a")).is_err());
        assert!(SbdPair::new(r("a"), r("a")).is_err());
    }

    #[test]
    fn excludes_searches_linearly() {
        let mini = Miniature::new(1, 1).expect("alloc");
        let mut e = Entry::new(r("ref_a"), mini, SbdSet::new());
        assert!(!e.excludes("ref_b"));
        e.prepend_sbd(r("ref_b"));
        e.prepend_sbd(r("ref_c"));
        assert!(e.excludes("ref_b"));
        assert!(e.excludes("ref_c"));
        assert!(!e.excludes("ref_a"));
        e.clear_sbd();
        assert!(!e.excludes("ref_b"));
    }
}
