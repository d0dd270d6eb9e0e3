//! The shared fullcompare worklist: a cursor over the sorted entries plus
//! progress accounting, all behind one mutex.

use std::io::Write;

use parking_lot::Mutex;
use pixmatch_error::Result;
use pixmatch_index::Entry;
use pixmatch_proto::Reply;

struct Progress {
    next: usize,
    sets_remaining: u64,
    pulls_since_report: u64,
    done_reported: bool,
}

pub(crate) struct Worklist<'a, W> {
    entries: &'a [Entry],
    sets_total: u64,
    comparisons_total: f64,
    interval: u64,
    reply: &'a Reply<W>,
    state: Mutex<Progress>,
}

impl<'a, W: Write> Worklist<'a, W> {
    pub(crate) fn new(entries: &'a [Entry], interval: u64, reply: &'a Reply<W>) -> Self {
        let sets_total = entries.len() as u64;
        Self {
            entries,
            sets_total,
            comparisons_total: comparisons_for(sets_total),
            interval,
            reply,
            state: Mutex::new(Progress {
                next: 0,
                sets_remaining: sets_total,
                // Primed so the very first pull emits a progress line.
                pulls_since_report: interval,
                done_reported: false,
            }),
        }
    }

    pub(crate) fn reply(&self) -> &'a Reply<W> {
        self.reply
    }

    /// The entry at `pos` and the tail it gets compared against.
    pub(crate) fn split_at(&self, pos: usize) -> (&'a Entry, &'a [Entry]) {
        (&self.entries[pos], &self.entries[pos + 1..])
    }

    /// Hand out the next work item and keep the progress accounting.
    ///
    /// With N sets remaining there are N*(N-1)/2 comparisons left; the
    /// percentage derives from that, not from the set count, so the early
    /// (and much larger) work items weigh in proportionally. The terminal
    /// 100% line is emitted exactly once, by whichever worker first finds
    /// the cursor exhausted.
    pub(crate) fn pull(&self) -> Result<Option<usize>> {
        let mut state = self.state.lock();
        if state.next >= self.entries.len() {
            if !state.done_reported {
                state.done_reported = true;
                self.reply.line("fullcompare_progress: 100.00% complete")?;
            }
            return Ok(None);
        }

        let item = state.next;
        state.next += 1;
        state.sets_remaining -= 1;
        state.pulls_since_report = state.pulls_since_report.saturating_add(1);

        if state.pulls_since_report >= self.interval {
            state.pulls_since_report = 0;
            let remaining = comparisons_for(state.sets_remaining);
            let percent = if self.comparisons_total > 0.0 {
                100.0 * (1.0 - remaining / self.comparisons_total)
            } else {
                100.0
            };
            self.reply.line(format_args!(
                "fullcompare_progress: {percent:6.2}% complete, sets remaining={}/{}",
                state.sets_remaining, self.sets_total
            ))?;
        }
        Ok(Some(item))
    }
}

fn comparisons_for(sets: u64) -> f64 {
    (sets * sets.saturating_sub(1) / 2) as f64
}
