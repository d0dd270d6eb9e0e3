//! The command grammar.
//!
//! Parsing is a single pass over an immutable line: the first space ends
//! the keyword, and for commands taking a filename only the first space
//! after the leading token delimits, because filenames may contain spaces.

use pixmatch_error::{PixmatchError, Result};
use pixmatch_types::ExternalRef;

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ensure the index is loaded from the store.
    Load,
    /// Drop the index from memory.
    Unload,
    /// Learn a new image: decode, persist, insert in memory.
    Add {
        external_ref: ExternalRef,
        path: String,
    },
    /// Forget an image from the store and from memory.
    Del { external_ref: ExternalRef },
    /// Compare one file against every loaded miniature, widened threshold.
    Quickcompare { label: ExternalRef, path: String },
    /// Compare every loaded miniature against every other.
    Fullcompare,
    /// Rebuild every entry's exclusion set from the store.
    RefreshSimilarButDifferent,
    /// Report service statistics.
    Info,
    /// Dump every entry and its exclusion set.
    DebugShowTree,
    /// Fork a child that sleeps past the listen timeout.
    DebugSleep,
    /// Stop the server loop.
    Quit,
}

impl Command {
    /// Parse one complete command line (terminator already stripped).
    pub fn parse(line: &str) -> Result<Self> {
        if line.is_empty() {
            return Err(PixmatchError::protocol("empty command"));
        }
        let (keyword, rest) = match line.split_once(' ') {
            Some((keyword, rest)) => (keyword, Some(rest)),
            None => (line, None),
        };

        match (keyword, rest) {
            ("load", None) => Ok(Self::Load),
            ("unload", None) => Ok(Self::Unload),
            ("fullcompare", None) => Ok(Self::Fullcompare),
            ("refresh_similar_but_different", None) => Ok(Self::RefreshSimilarButDifferent),
            ("info", None) => Ok(Self::Info),
            ("debug_show_tree", None) => Ok(Self::DebugShowTree),
            ("debug_sleep", None) => Ok(Self::DebugSleep),
            ("quit", None) => Ok(Self::Quit),
            ("add", Some(args)) => {
                let (external_ref, path) = args.split_once(' ').ok_or_else(|| {
                    PixmatchError::protocol(format!("add needs a ref and a filename: {line:?}"))
                })?;
                if path.is_empty() {
                    return Err(PixmatchError::protocol(format!(
                        "add needs a filename: {line:?}"
                    )));
                }
                Ok(Self::Add {
                    external_ref: ExternalRef::new(external_ref)?,
                    path: path.to_owned(),
                })
            }
            ("del", Some(args)) => Ok(Self::Del {
                external_ref: ExternalRef::new(args)?,
            }),
            ("quickcompare", Some(args)) => {
                // A lone argument is the filename and doubles as the match
                // label; with two, the leading token is the label.
                match args.split_once(' ') {
                    Some((label, path)) if !path.is_empty() => Ok(Self::Quickcompare {
                        label: ExternalRef::new(label)?,
                        path: path.to_owned(),
                    }),
                    _ => Ok(Self::Quickcompare {
                        label: ExternalRef::new(args)?,
                        path: args.to_owned(),
                    }),
                }
            }
            _ => Err(PixmatchError::protocol(format!("BAD COMMAND: {line}"))),
        }
    }

    /// Uppercase name used to open and close every reply.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::Unload => "UNLOAD",
            Self::Add { .. } => "ADD",
            Self::Del { .. } => "DEL",
            Self::Quickcompare { .. } => "QUICKCOMPARE",
            Self::Fullcompare => "FULLCOMPARE",
            Self::RefreshSimilarButDifferent => "REFRESH_SIMILAR_BUT_DIFFERENT",
            Self::Info => "INFO",
            Self::DebugShowTree => "DEBUG_SHOW_TREE",
            Self::DebugSleep => "DEBUG_SLEEP",
            Self::Quit => "QUIT",
        }
    }

    /// Whether the command needs the index populated before it runs.
    #[must_use]
    pub fn requires_index(&self) -> bool {
        matches!(
            self,
            Self::Add { .. } | Self::Quickcompare { .. } | Self::Fullcompare
        )
    }

    /// Whether the dispatcher executes the command in a forked child.
    #[must_use]
    pub fn forks(&self) -> bool {
        matches!(
            self,
            Self::Quickcompare { .. } | Self::Fullcompare | Self::DebugSleep
        )
    }
}
