//! Mutable server state, threaded through the loop as one value.
//!
//! Forked children observe only their captured copy; nothing here is
//! shared between processes.

use pixmatch_error::Result;
use pixmatch_index::{Entry, ImageIndex, SbdSet};
use pixmatch_store::MiniatureStore;
use pixmatch_types::Tunables;
use tracing::{debug, info};

/// Everything a command needs: the store, the index, the knobs, and the
/// counters the `info` command reports.
pub struct ServerState<S> {
    store: S,
    index: ImageIndex,
    tunables: Tunables,
    cpu_count: usize,
    listener_count: usize,
    active_clients: usize,
    child_count: u64,
    shutdown: bool,
}

impl<S: MiniatureStore> ServerState<S> {
    #[must_use]
    pub fn new(store: S, tunables: Tunables, cpu_count: usize) -> Self {
        Self {
            store,
            index: ImageIndex::new(),
            tunables,
            cpu_count,
            listener_count: 0,
            active_clients: 0,
            child_count: 0,
            shutdown: false,
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    #[must_use]
    pub fn index_mut(&mut self) -> &mut ImageIndex {
        &mut self.index
    }

    #[must_use]
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    /// Pull every stored miniature into the index, then attach the
    /// similar-but-different pairs in one merge pass.
    pub fn load(&mut self) -> Result<()> {
        for (external_ref, miniature) in self.store.load_all()? {
            self.index
                .insert(Entry::new(external_ref, miniature, SbdSet::new()));
        }
        if !self.index.is_empty() {
            let pairs = self.store.sbd_pairs()?;
            self.index.attach_sbd_pairs(pairs);
        }
        info!(count = self.index.len(), "index loaded");
        Ok(())
    }

    /// Drop every miniature from memory.
    pub fn unload(&mut self) {
        debug!(count = self.index.len(), "index unloaded");
        self.index.unload();
    }

    /// Rebuild every entry's exclusion set from current store state.
    pub fn refresh_similar_but_different(&mut self) -> Result<()> {
        let pairs = self.store.sbd_pairs()?;
        self.index.clear_sbd();
        self.index.attach_sbd_pairs(pairs);
        Ok(())
    }

    pub(crate) fn set_listener_count(&mut self, count: usize) {
        self.listener_count = count;
    }

    pub(crate) fn connection_opened(&mut self) {
        self.active_clients += 1;
    }

    pub(crate) fn connection_closed(&mut self) {
        self.active_clients = self.active_clients.saturating_sub(1);
    }

    /// Listeners plus currently occupied client slots.
    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.listener_count + self.active_clients
    }

    pub(crate) fn child_forked(&mut self) {
        self.child_count += 1;
    }

    pub(crate) fn child_exited(&mut self) {
        self.child_count = self.child_count.saturating_sub(1);
    }

    #[must_use]
    pub fn child_count(&self) -> u64 {
        self.child_count
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }
}
