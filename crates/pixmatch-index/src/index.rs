//! Sorted owning collection of index entries.

use std::cmp::Ordering;

use tracing::debug;

use crate::entry::{Entry, SbdPair};

/// Result of [`ImageIndex::delete`].
///
/// The two not-found flavors are distinct so the server can log whether the
/// scan went past where the ref would sort or ran off the end of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entry existed and was removed.
    Removed,
    /// The scan passed the position where the ref would sort.
    PassedWithoutMatch,
    /// The scan reached the end without passing the ref's position.
    EndOfList,
}

impl DeleteOutcome {
    #[must_use]
    pub fn removed(self) -> bool {
        matches!(self, Self::Removed)
    }
}

/// Ordered set of `(external_ref -> miniature, exclusion set)` entries,
/// ascending by byte-wise ref compare.
///
/// Invariants: refs are unique, iteration is in sorted order, and every
/// mutation preserves both. A sorted `Vec` backs the index; ordered
/// traversal is all the comparison engine needs.
#[derive(Debug, Default)]
pub struct ImageIndex {
    entries: Vec<Entry>,
}

impl ImageIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in sorted order. Position `i + 1..` is the tail the
    /// comparison engine pairs entry `i` against.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Iterate entries in sorted ref order.
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Look up an entry by ref.
    #[must_use]
    pub fn find(&self, external_ref: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.external_ref().as_str().cmp(external_ref))
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Insert before the first entry whose ref sorts greater or equal.
    ///
    /// Callers never insert duplicates: the store's uniqueness constraint
    /// rejects a duplicate `add` before the in-memory insert is attempted,
    /// so a duplicate here is a programming error.
    pub fn insert(&mut self, entry: Entry) {
        let pos = self
            .entries
            .partition_point(|e| e.external_ref() < entry.external_ref());
        debug_assert!(
            self.entries
                .get(pos)
                .is_none_or(|e| e.external_ref() != entry.external_ref()),
            "duplicate external_ref inserted: {}",
            entry.external_ref()
        );
        self.entries.insert(pos, entry);
    }

    /// Scan in sorted order and remove the entry keyed by `external_ref`.
    pub fn delete(&mut self, external_ref: &str) -> DeleteOutcome {
        for pos in 0..self.entries.len() {
            match self.entries[pos].external_ref().as_str().cmp(external_ref) {
                Ordering::Less => {}
                Ordering::Equal => {
                    self.entries.remove(pos);
                    return DeleteOutcome::Removed;
                }
                Ordering::Greater => return DeleteOutcome::PassedWithoutMatch,
            }
        }
        DeleteOutcome::EndOfList
    }

    /// Drop every entry, miniatures and exclusion sets included.
    pub fn unload(&mut self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }

    /// Empty every entry's exclusion set.
    pub fn clear_sbd(&mut self) {
        for entry in &mut self.entries {
            entry.clear_sbd();
        }
    }

    /// Attach canonical pairs to their owning entries in one merge pass.
    ///
    /// `pairs` must arrive ascending by smaller ref, which lets a single
    /// cursor walk the sorted entries. Each pair's larger ref is prepended
    /// to the entry keyed by its smaller ref; pairs whose smaller ref has
    /// no entry are skipped.
    pub fn attach_sbd_pairs(&mut self, pairs: impl IntoIterator<Item = SbdPair>) {
        let mut pos = 0;
        for pair in pairs {
            let (smaller, larger) = pair.into_parts();
            while pos < self.entries.len() && *self.entries[pos].external_ref() < smaller {
                pos += 1;
            }
            match self.entries.get_mut(pos) {
                Some(entry) if *entry.external_ref() == smaller => entry.prepend_sbd(larger),
                _ => debug!(%smaller, %larger, "no entry for similar_but_different pair"),
            }
        }
    }
}

impl<'a> IntoIterator for &'a ImageIndex {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
