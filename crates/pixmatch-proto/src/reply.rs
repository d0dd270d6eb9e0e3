//! The reply stream: line-atomic formatted writes to a client socket.
//!
//! Several comparison workers may share one stream, so every line is
//! formatted first and pushed with a single locked write, then flushed:
//! a peer reading to EOF must see the terminal line before the socket
//! closes, and lines from different workers must never interleave.

use std::fmt::Display;
use std::io::Write;

use parking_lot::Mutex;
use pixmatch_error::Result;

/// Shared writer for one client connection.
pub struct Reply<W> {
    inner: Mutex<W>,
}

impl<W: Write> Reply<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Recover the writer, e.g. to inspect captured output in tests.
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }

    fn push(&self, line: &str) -> Result<()> {
        let mut w = self.inner.lock();
        w.write_all(line.as_bytes())?;
        w.flush()?;
        Ok(())
    }

    /// An informational line, no prefix.
    pub fn line(&self, text: impl Display) -> Result<()> {
        self.push(&format!("{text}\n"))
    }

    /// A `DEBUG: `-prefixed narration line.
    pub fn debug(&self, text: impl Display) -> Result<()> {
        self.push(&format!("DEBUG: {text}\n"))
    }

    /// An `Error: `-prefixed line, also logged server-side.
    pub fn error(&self, text: impl Display) -> Result<()> {
        let detail = text.to_string();
        tracing::error!("{detail}");
        self.push(&format!("Error: {detail}\n"))
    }

    /// The opening line of a reply: the uppercase command name.
    pub fn begin(&self, command: &str) -> Result<()> {
        self.push(&format!("{command}\n"))
    }

    /// The terminal success line.
    pub fn success(&self, command: &str) -> Result<()> {
        self.push(&format!("{command} SUCCESS\n"))
    }

    /// The terminal failure line.
    pub fn failed(&self, command: &str, code: u32) -> Result<()> {
        self.push(&format!("{command} FAILED, code {code}\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(build: impl FnOnce(&Reply<Vec<u8>>)) -> String {
        let reply = Reply::new(Vec::new());
        build(&reply);
        String::from_utf8(reply.into_inner()).expect("ascii reply")
    }

    #[test]
    fn success_reply_shape() {
        let out = rendered(|r| {
            r.begin("LOAD").unwrap();
            r.success("LOAD").unwrap();
        });
        assert_eq!(out, "LOAD\nLOAD SUCCESS\n");
    }

    #[test]
    fn failure_reply_shape() {
        let out = rendered(|r| {
            r.begin("ADD").unwrap();
            r.error("add - decode failed").unwrap();
            r.failed("ADD", 2).unwrap();
        });
        assert_eq!(out, "ADD\nError: add - decode failed\nADD FAILED, code 2\n");
    }

    #[test]
    fn prefixes() {
        let out = rendered(|r| {
            r.debug("quickcompare done").unwrap();
            r.line(format_args!("Match: {}, {}, {}", "a", "b", 17)).unwrap();
        });
        assert_eq!(out, "DEBUG: quickcompare done\nMatch: a, b, 17\n");
    }
}
