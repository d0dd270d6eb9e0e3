//! The in-memory image index: an ordered, owning collection of miniatures
//! keyed by external reference, each carrying a similar-but-different
//! exclusion set.
//!
//! The sort order is load-bearing, not cosmetic: the all-pairs comparison
//! visits each unordered pair exactly once by only looking at entries after
//! its own position, and the exclusion refresh merge-walks two sorted
//! sequences in a single pass.

mod entry;
mod index;

pub use entry::{Entry, SbdPair, SbdSet};
pub use index::{DeleteOutcome, ImageIndex};
