//! Per-connection slot state.

use std::net::TcpStream;
use std::time::Instant;

use nix::unistd::Pid;

/// One client slot: empty, or a socket with its partial command buffer.
///
/// The child pid outlives the socket on purpose: a forked command frees
/// the slot for reuse immediately, but the reaper still wants to associate
/// the exit with where it came from.
pub(crate) struct ClientSlot {
    pub(crate) stream: Option<TcpStream>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) filled: usize,
    pub(crate) child_pid: Option<Pid>,
    pub(crate) last_activity: Instant,
}

impl ClientSlot {
    pub(crate) fn empty(buffer_capacity: usize) -> Self {
        Self {
            stream: None,
            buffer: vec![0; buffer_capacity],
            filled: 0,
            child_pid: None,
            last_activity: Instant::now(),
        }
    }

    pub(crate) fn is_free(&self) -> bool {
        self.stream.is_none()
    }

    /// Store a fresh connection with a zeroed buffer.
    pub(crate) fn occupy(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
        self.buffer.fill(0);
        self.filled = 0;
        self.child_pid = None;
        self.last_activity = Instant::now();
    }

    /// Drop the socket and reset the buffer; keeps any pending child pid.
    pub(crate) fn release(&mut self) -> Option<TcpStream> {
        self.filled = 0;
        self.stream.take()
    }
}
