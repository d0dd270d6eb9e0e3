//! The comparison engine: one-to-many quickcompare and all-pairs
//! fullcompare over the sorted miniature index.
//!
//! Fullcompare runs inside a forked child with a fixed pool of worker
//! threads pulling from a shared cursor. The index is read-only for the
//! duration, so workers only synchronize on the cursor, its progress
//! counters, and the reply stream.

mod worklist;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use pixmatch_error::{PixmatchError, Result};
use pixmatch_index::{Entry, ImageIndex, SbdSet};
use pixmatch_proto::Reply;
use pixmatch_types::{ExternalRef, Tunables};
use tracing::debug;

use worklist::Worklist;

/// Compare `pic` against every entry of `tail`, reporting each candidate
/// whose distance is strictly below `maxerr` as a `Match:` line.
///
/// The scan never stops early, not even on an exact 0: downstream fuzzy
/// deduplication wants the full near-neighbor set, not the argmin alone.
/// Exclusion happens before the distance is taken, because suppressing a
/// known false positive afterwards would also hide the next-closest
/// candidate behind the lowered ceiling.
///
/// Returns the closest entry that met the threshold, if any.
pub fn compare_to_list<'a, W: Write>(
    pic: &Entry,
    tail: &'a [Entry],
    maxerr: u32,
    reply: &Reply<W>,
) -> Result<Option<&'a Entry>> {
    let mut err_best_so_far = u32::MAX;
    let mut best_match = None;

    for candidate in tail {
        if pic.excludes(candidate.external_ref().as_str()) {
            reply.debug(format_args!(
                "ignoring previous similar_but_different: {}, {}",
                pic.external_ref(),
                candidate.external_ref()
            ))?;
            continue;
        }

        let err = pic
            .miniature()
            .distance(candidate.miniature(), err_best_so_far)?;
        if err < maxerr {
            reply.line(format_args!(
                "Match: {}, {}, {err}",
                pic.external_ref(),
                candidate.external_ref()
            ))?;
            if err < err_best_so_far {
                err_best_so_far = err;
                best_match = Some(candidate);
            }
        }
    }
    Ok(best_match)
}

/// Compare the file at `path` against every loaded miniature.
///
/// The file is decoded to a transient entry labeled `label` and never
/// inserted into the index; the threshold is the widened quickcompare one.
pub fn quickcompare<W: Write>(
    index: &ImageIndex,
    label: ExternalRef,
    path: &str,
    tunables: &Tunables,
    reply: &Reply<W>,
) -> Result<()> {
    // Surface an unreadable file before paying for a decode attempt.
    drop(File::open(path)?);

    let miniature = pixmatch_decode::miniature_from_file(Path::new(path), tunables.side)?;
    let maxerr = tunables.maxerr_quick();
    reply.debug(format_args!(
        "quickcompare maxerr {maxerr}, label '{label}', filename '{path}'"
    ))?;

    let transient = Entry::new(label, miniature, SbdSet::new());
    compare_to_list(&transient, index.entries(), maxerr, reply)?;
    reply.debug("quickcompare done")?;
    Ok(())
}

/// Compare every loaded miniature against every other, visiting each
/// unordered pair exactly once.
///
/// The sort invariant does the de-duplication: a worker holding the entry
/// at position `i` only compares against positions strictly after `i`.
pub fn fullcompare<W: Write + Send>(
    index: &ImageIndex,
    thread_count: usize,
    tunables: &Tunables,
    reply: &Reply<W>,
) -> Result<()> {
    if index.is_empty() {
        return Err(PixmatchError::internal("fullcompare on an empty index"));
    }

    let worklist = Worklist::new(index.entries(), tunables.progress_interval, reply);
    let maxerr = tunables.maxerr_base;
    let threads = thread_count.max(1);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let worklist = &worklist;
            handles.push(scope.spawn(move || worker(worker_id, worklist, maxerr)));
        }
        for handle in handles {
            handle
                .join()
                .map_err(|_| PixmatchError::internal("fullcompare worker panicked"))??;
        }
        Ok(())
    })
}

fn worker<W: Write>(worker_id: usize, worklist: &Worklist<'_, W>, maxerr: u32) -> Result<()> {
    debug!(worker_id, "fullcompare worker start");
    while let Some(pos) = worklist.pull()? {
        let (entry, tail) = worklist.split_at(pos);
        if tail.is_empty() {
            continue;
        }
        compare_to_list(entry, tail, maxerr, worklist.reply())?;
    }
    debug!(worker_id, "fullcompare worker stop");
    Ok(())
}
