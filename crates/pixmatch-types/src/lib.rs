//! Core type definitions for pixmatch.
//!
//! The miniature raster lives in [`miniature`]; service-wide knobs live in
//! [`tunables`]. This crate root defines [`ExternalRef`], the opaque string
//! key external systems use to identify an image.

pub mod miniature;
pub mod tunables;

pub use miniature::Miniature;
pub use tunables::Tunables;

use std::borrow::Borrow;
use std::fmt;

use pixmatch_error::{PixmatchError, Result};

/// Externally assigned identifier for an image.
///
/// A non-empty printable byte string with no whitespace and no CR/LF. The
/// service never interprets it beyond byte-wise ordering, which the index
/// and the comparison engine both rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExternalRef(String);

impl ExternalRef {
    /// Validate and wrap an external reference.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(PixmatchError::protocol("empty external_ref"));
        }
        if raw
            .bytes()
            .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
        {
            return Err(PixmatchError::protocol(format!(
                "external_ref {raw:?} contains whitespace or control bytes"
            )));
        }
        Ok(Self(raw))
    }

    /// The reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExternalRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ExternalRef {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_printable_refs() {
        let r = ExternalRef::new("sha1:00beef").expect("valid ref");
        assert_eq!(r.as_str(), "sha1:00beef");
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(ExternalRef::new("").is_err());
        assert!(ExternalRef::new("a b").is_err());
        assert!(ExternalRef::new("a\nb").is_err());
        assert!(ExternalRef::new("a\rb").is_err());
        assert!(ExternalRef::new("a\tb").is_err());
    }

    #[test]
    fn orders_byte_wise() {
        let a = ExternalRef::new("ref_0").unwrap();
        let b = ExternalRef::new("ref_1").unwrap();
        assert!(a < b);
    }
}
