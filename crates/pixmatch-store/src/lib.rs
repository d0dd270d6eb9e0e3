//! Persistence for miniatures and similar-but-different pairs.
//!
//! The core consumes the narrow [`MiniatureStore`] interface; the SQLite
//! implementation in [`sqlite`] is the one the `pixmatchd` binary wires in.
//! Pixel data crosses the persistence boundary in the interoperable hex
//! encoding implemented in [`hex`].

pub mod hex;
mod sqlite;

pub use sqlite::SqliteStore;

use pixmatch_error::Result;
use pixmatch_index::SbdPair;
use pixmatch_types::{ExternalRef, Miniature};

/// The persistence operations the core depends on.
///
/// Implementations must return [`load_all`](Self::load_all) rows ascending
/// by external ref and [`sbd_pairs`](Self::sbd_pairs) ascending by smaller
/// ref: both consumers are single-pass merge walks over the sorted index.
pub trait MiniatureStore {
    /// Every stored miniature, ascending by external ref.
    fn load_all(&self) -> Result<Vec<(ExternalRef, Miniature)>>;

    /// Persist one miniature under `external_ref`.
    ///
    /// Refs are unique; inserting an existing ref is an error.
    fn insert(&self, external_ref: &ExternalRef, miniature: &Miniature) -> Result<()>;

    /// Remove the record for `external_ref`. Removing an absent ref is not
    /// an error; the in-memory delete reports that case separately.
    fn delete(&self, external_ref: &str) -> Result<()>;

    /// Every similar-but-different pair in canonical `(smaller, larger)`
    /// form, ascending by smaller ref.
    fn sbd_pairs(&self) -> Result<Vec<SbdPair>>;
}
