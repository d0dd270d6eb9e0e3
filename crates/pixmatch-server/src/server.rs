//! The readiness-driven accept loop.
//!
//! One thread, one `poll` per iteration over the listeners and every open
//! client socket. Housekeeping (child reaping, idle sweeping) runs every
//! iteration whether or not anything was ready, which is why the wait has
//! a timeout at all.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, TcpListener};
use std::os::fd::AsFd;
use std::time::Instant;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use pixmatch_error::{PixmatchError, Result};
use pixmatch_proto::{Reply, find_terminator};
use pixmatch_store::MiniatureStore;
use pixmatch_types::Tunables;
use tracing::{debug, error, info, warn};

use crate::conn::ClientSlot;
use crate::dispatch::{DispatchOutcome, dispatch};
use crate::state::ServerState;

/// Which table entry a ready poll descriptor belongs to.
#[derive(Debug, Clone, Copy)]
enum Source {
    Listener(usize),
    Client(usize),
}

/// The command server: listeners, client table, and state.
pub struct Server<S> {
    state: ServerState<S>,
    listeners: Vec<TcpListener>,
    clients: Vec<ClientSlot>,
}

impl<S: MiniatureStore> Server<S> {
    /// Bind the loopback listeners and size the connection table.
    ///
    /// IPv4 and IPv6 are each optional; binding fails only when neither
    /// family is available. The listeners occupy the leading share of the
    /// connection capacity; the rest are client slots.
    pub fn bind(store: S, tunables: Tunables, cpu_count: usize, port: u16) -> Result<Self> {
        let mut listeners = Vec::new();
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => listeners.push(listener),
            Err(e) => warn!("ipv4 listener unavailable: {e}"),
        }
        match TcpListener::bind((Ipv6Addr::LOCALHOST, port)) {
            Ok(listener) => listeners.push(listener),
            Err(e) => warn!("ipv6 listener unavailable: {e}"),
        }
        if listeners.is_empty() {
            return Err(PixmatchError::internal(format!(
                "no loopback listener could bind port {port}"
            )));
        }

        let client_capacity = tunables.max_connections.saturating_sub(listeners.len());
        let clients = (0..client_capacity)
            .map(|_| ClientSlot::empty(tunables.buffer_capacity))
            .collect();

        let mut state = ServerState::new(store, tunables, cpu_count);
        state.set_listener_count(listeners.len());
        Ok(Self {
            state,
            listeners,
            clients,
        })
    }

    /// The port the first listener actually bound (useful with port 0).
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.listeners[0]
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    /// Run until a `quit` command lands, then tear everything down.
    pub fn run(&mut self) -> Result<()> {
        for listener in &self.listeners {
            if let Ok(addr) = listener.local_addr() {
                info!(%addr, "listening");
            }
        }
        while !self.state.shutdown_requested() {
            self.iterate();
        }

        for slot in &mut self.clients {
            if slot.release().is_some() {
                self.state.connection_closed();
            }
        }
        self.listeners.clear();
        self.state.unload();
        info!("server loop finished");
        Ok(())
    }

    fn occupied_clients(&self) -> usize {
        self.clients.iter().filter(|s| !s.is_free()).count()
    }

    fn iterate(&mut self) {
        // Leave the listeners out of the set when the table is full so the
        // kernel queues newcomers instead of us churning accept/BUSY.
        let accepting = self.occupied_clients() < self.clients.len();

        let ready = {
            let mut sources = Vec::new();
            let mut poll_fds = Vec::new();
            if accepting {
                for (pos, listener) in self.listeners.iter().enumerate() {
                    sources.push(Source::Listener(pos));
                    poll_fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
                }
            }
            for (pos, slot) in self.clients.iter().enumerate() {
                if let Some(stream) = &slot.stream {
                    sources.push(Source::Client(pos));
                    poll_fds.push(PollFd::new(stream.as_fd(), PollFlags::POLLIN));
                }
            }

            let timeout_millis = self
                .state
                .tunables()
                .listen_timeout
                .as_millis()
                .min(i32::MAX as u128) as i32;
            let timeout = PollTimeout::try_from(timeout_millis).unwrap_or(PollTimeout::MAX);

            match poll(&mut poll_fds, timeout) {
                // Interrupted by a signal: just run housekeeping and rebuild.
                Err(Errno::EINTR) => Vec::new(),
                Err(e) => {
                    error!("poll failed: {e}");
                    Vec::new()
                }
                Ok(_) => poll_fds
                    .iter()
                    .zip(&sources)
                    .filter(|(fd, _)| fd.revents().is_some_and(|r| !r.is_empty()))
                    .map(|(_, source)| *source)
                    .collect::<Vec<_>>(),
            }
        };

        self.reap_children();
        self.sweep_idle();

        for source in ready {
            match source {
                Source::Listener(pos) => self.accept_one(pos),
                Source::Client(pos) => self.service_client(pos),
            }
        }
    }

    /// Non-blocking wait for any exited child; keeps the `info` counter
    /// honest and clears the slot the child was forked from.
    fn reap_children(&mut self) {
        loop {
            match waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(status) => {
                    let Some(pid) = status.pid() else { break };
                    self.state.child_exited();
                    debug!(%pid, "reaped comparison child");
                    if let Some(slot) =
                        self.clients.iter_mut().find(|s| s.child_pid == Some(pid))
                    {
                        slot.child_pid = None;
                    }
                }
                Err(e) => {
                    warn!("waitpid failed: {e}");
                    break;
                }
            }
        }
    }

    /// Close client slots that have sat idle past the deadline. Half-open
    /// peers would otherwise hold their slot forever.
    fn sweep_idle(&mut self) {
        let deadline = self.state.tunables().idle_deadline;
        let now = Instant::now();
        for slot in &mut self.clients {
            if !slot.is_free() && now.duration_since(slot.last_activity) > deadline {
                warn!("closing idle connection");
                drop(slot.release());
                self.state.connection_closed();
            }
        }
    }

    fn accept_one(&mut self, listener_pos: usize) {
        let (stream, peer) = match self.listeners[listener_pos].accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                return;
            }
        };
        match self.clients.iter_mut().find(|slot| slot.is_free()) {
            Some(slot) => {
                debug!(%peer, "accepted connection");
                slot.occupy(stream);
                self.state.connection_opened();
            }
            None => {
                // The listener was in the poll set, so a race filled the
                // table between the readiness report and now.
                error!("more connections than we can handle");
                let mut stream = stream;
                if stream.write_all(b"BUSY: Please come back later").is_err() {
                    warn!("failed to tell client to go away");
                }
            }
        }
    }

    fn service_client(&mut self, pos: usize) {
        let slot = &mut self.clients[pos];
        let Some(stream) = slot.stream.as_mut() else {
            return;
        };

        let read = match stream.read(&mut slot.buffer[slot.filled..]) {
            Ok(0) => {
                debug!("client closed the connection");
                drop(slot.release());
                self.state.connection_closed();
                return;
            }
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return,
            Err(e) => {
                warn!("failed to read from client, closing: {e}");
                drop(slot.release());
                self.state.connection_closed();
                return;
            }
        };
        slot.filled += read;
        slot.last_activity = Instant::now();

        let Some(terminator) = find_terminator(&slot.buffer[..slot.filled]) else {
            if slot.filled == slot.buffer.len() {
                // No terminator fits anymore; the line can never complete.
                if let Some(stream) = slot.release() {
                    let reply = Reply::new(stream);
                    let _ = reply.error("command line too long");
                    self.state.connection_closed();
                }
            }
            return;
        };

        let line_bytes = slot.buffer[..terminator].to_vec();
        let Some(stream) = slot.release() else { return };
        let reply = Reply::new(stream);
        match std::str::from_utf8(&line_bytes) {
            Err(_) => {
                let _ = reply.error("command line is not valid UTF-8");
            }
            Ok(line) => {
                debug!(line, "dispatching command");
                if let DispatchOutcome::Forked(pid) = dispatch(&mut self.state, line, &reply) {
                    self.clients[pos].child_pid = Some(pid);
                }
            }
        }
        // Dropping the reply closes the parent's copy of the socket; a
        // forked child holds its own descriptor and keeps writing.
        self.state.connection_closed();
    }
}
