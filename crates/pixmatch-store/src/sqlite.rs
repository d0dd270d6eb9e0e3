//! SQLite-backed [`MiniatureStore`].
//!
//! One connection per process. Forked comparison children never touch the
//! store; the in-memory index snapshot they inherit is all they read.

use pixmatch_error::{PixmatchError, Result};
use pixmatch_index::SbdPair;
use pixmatch_types::{ExternalRef, Miniature};
use rusqlite::Connection;
use tracing::debug;

use crate::MiniatureStore;
use crate::hex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS miniature (
    external_ref TEXT PRIMARY KEY,
    width        INTEGER NOT NULL,
    height       INTEGER NOT NULL,
    hexdata      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS similar_but_different (
    smaller_ref  TEXT NOT NULL,
    larger_ref   TEXT NOT NULL,
    PRIMARY KEY (smaller_ref, larger_ref)
);
";

/// Store over a SQLite database file. The schema is created on open.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| sql_error("open", &e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| sql_error("create schema", &e))?;
        debug!(path, "opened miniature store");
        Ok(Self { conn })
    }
}

impl MiniatureStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<(ExternalRef, Miniature)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT external_ref, width, height, hexdata \
                 FROM miniature ORDER BY external_ref",
            )
            .map_err(|e| sql_error("prepare load_all", &e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| sql_error("query load_all", &e))?;

        let mut out = Vec::new();
        for row in rows {
            let (raw_ref, width, height, hexdata) = row.map_err(|e| sql_error("load_all row", &e))?;
            let external_ref = ExternalRef::new(raw_ref)
                .map_err(|e| PixmatchError::persistence(format!("stored ref invalid: {e}")))?;
            let miniature = hex::decode_pixels(&hexdata, width, height).map_err(|e| {
                PixmatchError::persistence(format!("pixel data for {external_ref}: {e}"))
            })?;
            out.push((external_ref, miniature));
        }
        debug!(count = out.len(), "loaded miniatures");
        Ok(out)
    }

    fn insert(&self, external_ref: &ExternalRef, miniature: &Miniature) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO miniature (external_ref, width, height, hexdata) \
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    external_ref.as_str(),
                    miniature.width(),
                    miniature.height(),
                    hex::encode_pixels(miniature),
                ],
            )
            .map_err(|e| sql_error("insert miniature", &e))?;
        Ok(())
    }

    fn delete(&self, external_ref: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM miniature WHERE external_ref = ?1",
                [external_ref],
            )
            .map_err(|e| sql_error("delete miniature", &e))?;
        Ok(())
    }

    fn sbd_pairs(&self) -> Result<Vec<SbdPair>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT smaller_ref, larger_ref \
                 FROM similar_but_different ORDER BY smaller_ref",
            )
            .map_err(|e| sql_error("prepare sbd_pairs", &e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| sql_error("query sbd_pairs", &e))?;

        let mut out = Vec::new();
        for row in rows {
            let (smaller, larger) = row.map_err(|e| sql_error("sbd_pairs row", &e))?;
            let smaller = ExternalRef::new(smaller)
                .map_err(|e| PixmatchError::persistence(format!("stored sbd ref invalid: {e}")))?;
            let larger = ExternalRef::new(larger)
                .map_err(|e| PixmatchError::persistence(format!("stored sbd ref invalid: {e}")))?;
            let pair = SbdPair::new(smaller, larger).map_err(|e| {
                PixmatchError::persistence(format!("similar_but_different row out of order: {e}"))
            })?;
            out.push(pair);
        }
        Ok(out)
    }
}

fn sql_error(doing: &str, e: &rusqlite::Error) -> PixmatchError {
    PixmatchError::persistence(format!("{doing}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.db");
        let store = SqliteStore::open(path.to_str().expect("utf-8 path")).expect("open");
        (dir, store)
    }

    fn mini(fill: u8) -> Miniature {
        Miniature::from_raw(2, 2, vec![fill; 12]).expect("raw")
    }

    fn r(s: &str) -> ExternalRef {
        ExternalRef::new(s).expect("valid ref")
    }

    #[test]
    fn insert_load_delete_round_trip() {
        let (_dir, store) = open_temp();
        store.insert(&r("ref_b"), &mini(7)).expect("insert");
        store.insert(&r("ref_a"), &mini(9)).expect("insert");

        let all = store.load_all().expect("load_all");
        assert_eq!(all.len(), 2);
        // Sorted by ref regardless of insertion order.
        assert_eq!(all[0].0.as_str(), "ref_a");
        assert_eq!(all[1].0.as_str(), "ref_b");
        assert_eq!(all[0].1, mini(9));

        store.delete("ref_a").expect("delete");
        assert_eq!(store.load_all().expect("load_all").len(), 1);
        // Deleting an absent ref is not an error.
        store.delete("ref_a").expect("repeat delete");
    }

    #[test]
    fn duplicate_insert_is_a_persistence_failure() {
        let (_dir, store) = open_temp();
        store.insert(&r("ref_a"), &mini(1)).expect("insert");
        let err = store.insert(&r("ref_a"), &mini(1)).unwrap_err();
        assert!(matches!(err, PixmatchError::Persistence { .. }));
    }

    #[test]
    fn sbd_pairs_come_back_canonical_and_sorted() {
        let (_dir, store) = open_temp();
        store
            .conn
            .execute_batch(
                "INSERT INTO similar_but_different VALUES ('m', 'z');
                 INSERT INTO similar_but_different VALUES ('a', 'b');",
            )
            .expect("seed");
        let pairs = store.sbd_pairs().expect("sbd_pairs");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].smaller().as_str(), "a");
        assert_eq!(pairs[0].larger().as_str(), "b");
        assert_eq!(pairs[1].smaller().as_str(), "m");
    }

    #[test]
    fn non_canonical_rows_are_rejected() {
        let (_dir, store) = open_temp();
        store
            .conn
            .execute_batch("INSERT INTO similar_but_different VALUES ('z', 'a');")
            .expect("seed");
        assert!(matches!(
            store.sbd_pairs(),
            Err(PixmatchError::Persistence { .. })
        ));
    }
}
