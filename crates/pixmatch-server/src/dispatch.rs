//! Command dispatch: map a framed command line onto the index, the store,
//! or a forked comparison child, and shape the reply.
//!
//! Every reply opens with the uppercase command name and closes with
//! `<CMD> SUCCESS` or `<CMD> FAILED, code <n>`. For forked commands the
//! child writes both lines and exits; the parent only bumps its child
//! counter and returns to the loop.

use std::io::Write;
use std::path::Path;

use nix::unistd::{ForkResult, Pid, fork};
use pixmatch_error::{PixmatchError, Result};
use pixmatch_index::{Entry, SbdSet};
use pixmatch_proto::{Command, Reply};
use pixmatch_store::MiniatureStore;
use pixmatch_types::ExternalRef;
use tracing::{debug, error, warn};

use crate::state::ServerState;

/// What the server loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Reply written; close the connection.
    Completed,
    /// A child owns the reply now; close the parent's copy of the socket.
    Forked(Pid),
    /// `quit` was accepted; finish the iteration and stop.
    Shutdown,
}

/// Execute one complete command line against the server state.
pub fn dispatch<S: MiniatureStore, W: Write + Send>(
    state: &mut ServerState<S>,
    line: &str,
    reply: &Reply<W>,
) -> DispatchOutcome {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => {
            warn!(line, "rejecting command: {e}");
            let _ = reply.error(&e);
            return DispatchOutcome::Completed;
        }
    };

    // 'load' reports its own lines, including the already-loaded case.
    if command == Command::Load {
        let _ = reply.begin("LOAD");
        if state.index().is_empty() {
            match state.load() {
                Ok(()) => {
                    let _ = reply.success("LOAD");
                }
                Err(e) => {
                    let _ = reply.error(&e);
                    let _ = reply.failed("LOAD", e.code());
                }
            }
        } else {
            let _ = reply.debug("Already loaded");
            let _ = reply.success("LOAD");
        }
        return DispatchOutcome::Completed;
    }

    // Commands that read the index trigger a transparent load first. A
    // failure here fails the command; the loop itself survives.
    if command.requires_index() && state.index().is_empty() {
        if let Err(e) = state.load() {
            let name = command.name();
            let _ = reply.begin(name);
            let _ = reply.error(format_args!("load before {name} failed: {e}"));
            let _ = reply.failed(name, e.code());
            return DispatchOutcome::Completed;
        }
    }

    if command.forks() {
        return dispatch_forked(state, &command, reply);
    }

    let name = command.name();
    let _ = reply.begin(name);
    match run_inline(state, command, reply) {
        Ok(outcome) => {
            let _ = reply.success(name);
            outcome
        }
        Err(e) => {
            let _ = reply.error(&e);
            let _ = reply.failed(name, e.code());
            DispatchOutcome::Completed
        }
    }
}

fn run_inline<S: MiniatureStore, W: Write>(
    state: &mut ServerState<S>,
    command: Command,
    reply: &Reply<W>,
) -> Result<DispatchOutcome> {
    match command {
        Command::Unload => state.unload(),
        Command::Add { external_ref, path } => add(state, external_ref, &path, reply)?,
        Command::Del { external_ref } => del(state, &external_ref, reply)?,
        Command::RefreshSimilarButDifferent => state.refresh_similar_but_different()?,
        Command::Info => info_properties(state, reply)?,
        Command::DebugShowTree => show_tree(state, reply)?,
        Command::Quit => {
            state.request_shutdown();
            return Ok(DispatchOutcome::Shutdown);
        }
        Command::Load | Command::Quickcompare { .. } | Command::Fullcompare | Command::DebugSleep => {
            return Err(PixmatchError::internal("command dispatched on the wrong path"));
        }
    }
    Ok(DispatchOutcome::Completed)
}

/// Decode, persist, then insert in memory, in that order: a store failure
/// must leave the index untouched.
fn add<S: MiniatureStore, W: Write>(
    state: &mut ServerState<S>,
    external_ref: ExternalRef,
    path: &str,
    reply: &Reply<W>,
) -> Result<()> {
    reply.debug(format_args!("add external_ref '{external_ref}'"))?;
    let miniature = pixmatch_decode::miniature_from_file(Path::new(path), state.tunables().side)?;
    state.store().insert(&external_ref, &miniature)?;
    state
        .index_mut()
        .insert(Entry::new(external_ref, miniature, SbdSet::new()));
    Ok(())
}

/// Remove from the store first, then from memory. A record that was in the
/// store but not in memory is a diagnostic, not a failure.
fn del<S: MiniatureStore, W: Write>(
    state: &mut ServerState<S>,
    external_ref: &ExternalRef,
    reply: &Reply<W>,
) -> Result<()> {
    reply.debug(format_args!("del external_ref '{external_ref}'"))?;
    state.store().delete(external_ref.as_str())?;
    let outcome = state.index_mut().delete(external_ref.as_str());
    if !outcome.removed() {
        debug!(%external_ref, ?outcome, "delete found nothing in memory");
        reply.debug(format_args!(
            "del could not find external_ref '{external_ref}'"
        ))?;
    }
    Ok(())
}

fn info_properties<S: MiniatureStore, W: Write>(
    state: &ServerState<S>,
    reply: &Reply<W>,
) -> Result<()> {
    reply.line(format_args!(
        "property: version: {}",
        env!("CARGO_PKG_VERSION")
    ))?;
    reply.line(format_args!(
        "property: image_loaded_count: {}",
        state.index().len()
    ))?;
    reply.line(format_args!("property: cpu_count: {}", state.cpu_count()))?;
    reply.line(format_args!(
        "property: child_process_count: {}",
        state.child_count()
    ))?;
    reply.line(format_args!(
        "property: active_connection_count: {}",
        state.active_connection_count()
    ))?;
    Ok(())
}

fn show_tree<S: MiniatureStore, W: Write>(
    state: &ServerState<S>,
    reply: &Reply<W>,
) -> Result<()> {
    for entry in state.index() {
        reply.line(format_args!("ref: '{}'", entry.external_ref()))?;
        for sbd in entry.sbd() {
            reply.line(format_args!("   sbd: '{sbd}'"))?;
        }
    }
    Ok(())
}

fn dispatch_forked<S: MiniatureStore, W: Write + Send>(
    state: &mut ServerState<S>,
    command: &Command,
    reply: &Reply<W>,
) -> DispatchOutcome {
    // SAFETY: the server process is single-threaded at this point. The
    // child reads its snapshot of the state, writes to its copy of the
    // socket, and exits without returning into the loop.
    match unsafe { fork() } {
        Err(e) => {
            let io = PixmatchError::Io(std::io::Error::from(e));
            let _ = reply.error(format_args!("{} fork failed: {io}", command.name()));
            let _ = reply.failed(command.name(), io.code());
            DispatchOutcome::Completed
        }
        Ok(ForkResult::Child) => {
            let code = run_forked(state, command, reply);
            // _exit, not exit: the child must not run the parent's atexit
            // machinery on inherited state. Every reply line was flushed.
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => {
            debug!(%child, command = command.name(), "forked comparison child");
            state.child_forked();
            DispatchOutcome::Forked(child)
        }
    }
}

/// Body of a forked child. Writes the whole reply, returns the exit code.
fn run_forked<S: MiniatureStore, W: Write + Send>(
    state: &ServerState<S>,
    command: &Command,
    reply: &Reply<W>,
) -> i32 {
    let name = command.name();
    if reply.begin(name).is_err() {
        return 1;
    }
    let result = match command {
        Command::Quickcompare { label, path } => {
            let _ = reply.debug(format_args!("'{path}'"));
            pixmatch_compare::quickcompare(
                state.index(),
                label.clone(),
                path,
                state.tunables(),
                reply,
            )
        }
        Command::Fullcompare => pixmatch_compare::fullcompare(
            state.index(),
            state.tunables().worker_threads(state.cpu_count()),
            state.tunables(),
            reply,
        ),
        Command::DebugSleep => {
            // Long enough to outlive the listen timeout under test.
            std::thread::sleep(state.tunables().listen_timeout * 2);
            Ok(())
        }
        _ => Err(PixmatchError::internal("non-forking command on the fork path")),
    };
    match result {
        Ok(()) => i32::from(reply.success(name).is_err()),
        Err(e) => {
            error!(command = name, "forked command failed: {e}");
            let _ = reply.error(&e);
            let _ = reply.failed(name, e.code());
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixmatch_index::SbdPair;
    use pixmatch_types::{Miniature, Tunables};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// In-memory store double.
    #[derive(Default)]
    struct MemStore {
        rows: RefCell<BTreeMap<String, Miniature>>,
        pairs: RefCell<Vec<(String, String)>>,
        fail_load: bool,
    }

    impl MiniatureStore for MemStore {
        fn load_all(&self) -> Result<Vec<(ExternalRef, Miniature)>> {
            if self.fail_load {
                return Err(PixmatchError::persistence("synthetic load failure"));
            }
            Ok(self
                .rows
                .borrow()
                .iter()
                .map(|(k, v)| (ExternalRef::new(k.clone()).unwrap(), v.clone()))
                .collect())
        }

        fn insert(&self, external_ref: &ExternalRef, miniature: &Miniature) -> Result<()> {
            let mut rows = self.rows.borrow_mut();
            if rows.contains_key(external_ref.as_str()) {
                return Err(PixmatchError::persistence("duplicate external_ref"));
            }
            rows.insert(external_ref.as_str().to_owned(), miniature.clone());
            Ok(())
        }

        fn delete(&self, external_ref: &str) -> Result<()> {
            self.rows.borrow_mut().remove(external_ref);
            Ok(())
        }

        fn sbd_pairs(&self) -> Result<Vec<SbdPair>> {
            self.pairs
                .borrow()
                .iter()
                .map(|(a, b)| {
                    SbdPair::new(
                        ExternalRef::new(a.clone()).unwrap(),
                        ExternalRef::new(b.clone()).unwrap(),
                    )
                })
                .collect()
        }
    }

    fn state_with(store: MemStore) -> ServerState<MemStore> {
        ServerState::new(store, Tunables::default(), 2)
    }

    fn run(state: &mut ServerState<MemStore>, line: &str) -> (String, DispatchOutcome) {
        let reply = Reply::new(Vec::new());
        let outcome = dispatch(state, line, &reply);
        (String::from_utf8(reply.into_inner()).unwrap(), outcome)
    }

    fn seeded_store(refs: &[&str]) -> MemStore {
        let store = MemStore::default();
        for (i, name) in refs.iter().enumerate() {
            store
                .rows
                .borrow_mut()
                .insert((*name).to_owned(), Miniature::from_raw(1, 1, vec![i as u8; 3]).unwrap());
        }
        store
    }

    #[test]
    fn load_on_an_empty_store() {
        let mut state = state_with(MemStore::default());
        let (out, outcome) = run(&mut state, "load");
        assert_eq!(out, "LOAD\nLOAD SUCCESS\n");
        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(state.index().len(), 0);
    }

    #[test]
    fn second_load_reports_already_loaded() {
        let mut state = state_with(seeded_store(&["ref_a"]));
        let (out, _) = run(&mut state, "load");
        assert_eq!(out, "LOAD\nLOAD SUCCESS\n");
        let (out, _) = run(&mut state, "load");
        assert_eq!(out, "LOAD\nDEBUG: Already loaded\nLOAD SUCCESS\n");
    }

    #[test]
    fn load_attaches_sbd_pairs() {
        let store = seeded_store(&["a", "b"]);
        *store.pairs.borrow_mut() = vec![("a".into(), "b".into())];
        let mut state = state_with(store);
        run(&mut state, "load");
        assert!(state.index().find("a").unwrap().excludes("b"));
        assert!(!state.index().find("b").unwrap().excludes("a"));
    }

    #[test]
    fn failed_lazy_load_fails_the_command_not_the_loop() {
        let mut state = state_with(MemStore {
            fail_load: true,
            ..MemStore::default()
        });
        let (out, outcome) = run(&mut state, "fullcompare");
        assert!(out.starts_with("FULLCOMPARE\n"));
        assert!(out.contains("Error: "));
        assert!(out.ends_with("FULLCOMPARE FAILED, code 3\n"));
        assert_eq!(outcome, DispatchOutcome::Completed);
    }

    #[test]
    fn add_decodes_persists_and_inserts_sorted() {
        use image::{Rgb, RgbImage};
        let dir = tempfile::tempdir().expect("tempdir");
        let mut paths = Vec::new();
        for (i, name) in ["one.png", "two.png"].iter().enumerate() {
            let mut img = RgbImage::new(32, 32);
            for p in img.pixels_mut() {
                *p = Rgb([(i * 90) as u8, 10, 10]);
            }
            let path = dir.path().join(name);
            img.save(&path).expect("save png");
            paths.push(path);
        }

        let mut state = state_with(MemStore::default());
        let (out, _) = run(
            &mut state,
            &format!("add ref_b {}", paths[0].display()),
        );
        assert!(out.starts_with("ADD\nDEBUG: add external_ref 'ref_b'\n"));
        assert!(out.ends_with("ADD SUCCESS\n"));
        let (out, _) = run(
            &mut state,
            &format!("add ref_a {}", paths[1].display()),
        );
        assert!(out.ends_with("ADD SUCCESS\n"));

        let refs: Vec<_> = state
            .index()
            .iter()
            .map(|e| e.external_ref().as_str().to_owned())
            .collect();
        assert_eq!(refs, ["ref_a", "ref_b"]);
        assert_eq!(state.store().rows.borrow().len(), 2);

        // A duplicate add fails in the store before touching the index.
        let (out, _) = run(
            &mut state,
            &format!("add ref_a {}", paths[1].display()),
        );
        assert!(out.ends_with("ADD FAILED, code 3\n"));
        assert_eq!(state.index().len(), 2);
    }

    #[test]
    fn add_with_a_missing_file_fails_with_decode_code() {
        let mut state = state_with(MemStore::default());
        let (out, _) = run(&mut state, "add ref_a /nowhere/missing.png");
        assert!(out.contains("Error: "));
        assert!(out.ends_with("ADD FAILED, code 2\n"));
        assert!(state.index().is_empty());
    }

    #[test]
    fn del_reports_a_memory_miss_as_a_diagnostic() {
        let mut state = state_with(seeded_store(&["ref_a"]));
        run(&mut state, "load");
        // In the store and in memory: plain success.
        let (out, _) = run(&mut state, "del ref_a");
        assert_eq!(out, "DEL\nDEBUG: del external_ref 'ref_a'\nDEL SUCCESS\n");
        // Gone from both: still success, with the diagnostic line.
        let (out, _) = run(&mut state, "del ref_a");
        assert!(out.contains("DEBUG: del could not find external_ref 'ref_a'"));
        assert!(out.ends_with("DEL SUCCESS\n"));
    }

    #[test]
    fn unload_empties_the_index() {
        let mut state = state_with(seeded_store(&["ref_a", "ref_b"]));
        run(&mut state, "load");
        assert_eq!(state.index().len(), 2);
        let (out, _) = run(&mut state, "unload");
        assert_eq!(out, "UNLOAD\nUNLOAD SUCCESS\n");
        assert!(state.index().is_empty());
    }

    #[test]
    fn refresh_rebuilds_exclusions_from_the_store() {
        let store = seeded_store(&["a", "b", "c"]);
        *store.pairs.borrow_mut() = vec![("a".into(), "b".into())];
        let mut state = state_with(store);
        run(&mut state, "load");
        assert!(state.index().find("a").unwrap().excludes("b"));

        *state.store().pairs.borrow_mut() = vec![("b".into(), "c".into())];
        let (out, _) = run(&mut state, "refresh_similar_but_different");
        assert_eq!(
            out,
            "REFRESH_SIMILAR_BUT_DIFFERENT\nREFRESH_SIMILAR_BUT_DIFFERENT SUCCESS\n"
        );
        assert!(!state.index().find("a").unwrap().excludes("b"));
        assert!(state.index().find("b").unwrap().excludes("c"));
    }

    #[test]
    fn info_reports_every_property() {
        let mut state = state_with(seeded_store(&["ref_a"]));
        run(&mut state, "load");
        let (out, _) = run(&mut state, "info");
        assert!(out.starts_with("INFO\n"));
        assert!(out.contains(&format!(
            "property: version: {}\n",
            env!("CARGO_PKG_VERSION")
        )));
        assert!(out.contains("property: image_loaded_count: 1\n"));
        assert!(out.contains("property: cpu_count: 2\n"));
        assert!(out.contains("property: child_process_count: 0\n"));
        assert!(out.contains("property: active_connection_count: 0\n"));
        assert!(out.ends_with("INFO SUCCESS\n"));
    }

    #[test]
    fn show_tree_prints_entries_and_exclusions() {
        let store = seeded_store(&["a", "b"]);
        *store.pairs.borrow_mut() = vec![("a".into(), "b".into())];
        let mut state = state_with(store);
        run(&mut state, "load");
        let (out, _) = run(&mut state, "debug_show_tree");
        assert_eq!(
            out,
            "DEBUG_SHOW_TREE\nref: 'a'\n   sbd: 'b'\nref: 'b'\nDEBUG_SHOW_TREE SUCCESS\n"
        );
    }

    #[test]
    fn quit_requests_shutdown() {
        let mut state = state_with(MemStore::default());
        let (out, outcome) = run(&mut state, "quit");
        assert_eq!(out, "QUIT\nQUIT SUCCESS\n");
        assert_eq!(outcome, DispatchOutcome::Shutdown);
        assert!(state.shutdown_requested());
    }

    #[test]
    fn bad_commands_get_an_error_line_only() {
        let mut state = state_with(MemStore::default());
        let (out, outcome) = run(&mut state, "transmogrify all");
        assert_eq!(out, "Error: protocol failure: BAD COMMAND: transmogrify all\n");
        assert_eq!(outcome, DispatchOutcome::Completed);
        let (out, _) = run(&mut state, "");
        assert!(out.starts_with("Error: "));
    }
}
