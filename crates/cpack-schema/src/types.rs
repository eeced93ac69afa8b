//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so manifests stay readable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string without validation.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Lowercase hex sha256 of a model file. The sole identity of a model.
    Digest
);

string_newtype!(
    /// Full 64-character blake3 fingerprint of a canonical manifest.
    PackId
);

string_newtype!(
    /// Truncated 12-character prefix of a [`PackId`] or [`Digest`], used for display.
    ShortId
);

/// Length of a hex-encoded sha256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

impl Digest {
    /// Parse and validate a digest. Uppercase hex is accepted and lowered.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix("sha256:").unwrap_or(s);
        if s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Whether this digest is 64 lowercase hex characters.
    pub fn is_valid(&self) -> bool {
        self.0.len() == DIGEST_HEX_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    pub fn short(&self) -> ShortId {
        ShortId::new(&self.0[..12.min(self.0.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn digest_parse_accepts_valid_hex() {
        let d = Digest::parse(SAMPLE).unwrap();
        assert_eq!(d.as_str(), SAMPLE);
        assert!(d.is_valid());
    }

    #[test]
    fn digest_parse_lowercases_and_strips_prefix() {
        let upper = format!("sha256:{}", SAMPLE.to_uppercase());
        let d = Digest::parse(&upper).unwrap();
        assert_eq!(d, SAMPLE);
    }

    #[test]
    fn digest_parse_rejects_bad_input() {
        assert!(Digest::parse("abc").is_none());
        assert!(Digest::parse(&"z".repeat(64)).is_none());
        assert!(!Digest::new("ABC").is_valid());
    }

    #[test]
    fn digest_short_is_twelve_chars() {
        let d = Digest::new(SAMPLE);
        assert_eq!(d.short().as_str(), &SAMPLE[..12]);
    }

    #[test]
    fn digest_serde_is_transparent() {
        let d = Digest::new(SAMPLE);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{SAMPLE}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn pack_id_equality() {
        assert_eq!(PackId::new("same"), PackId::new("same"));
        assert_ne!(PackId::new("same"), PackId::new("diff"));
    }
}
