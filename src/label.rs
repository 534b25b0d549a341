//! Label sequences (domain names) as value types.
//!
//! A [`Name`] owns its labels; there is no shared/reference-counted name
//! table. Compression lookups key off the label slice itself (see
//! `codec::writer`), not off pointer identity, so two `Name`s built
//! independently still compress against each other.

use std::fmt;

/// Maximum encoded length of a name, including length-prefix bytes and the
/// terminating zero, per RFC 1035 §3.1.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a single label, per RFC 1035 §3.1.
pub const MAX_LABEL_LEN: usize = 63;

/// An ordered sequence of non-empty ASCII labels, e.g. `["MyPrinter",
/// "_printer", "_tcp", "local"]`. Compared case-insensitively throughout.
#[derive(Clone, Debug, Default, Eq)]
pub struct Name {
    labels: Vec<Box<str>>,
}

impl Name {
    pub fn root() -> Name {
        Name { labels: Vec::new() }
    }

    pub fn from_labels<I, S>(labels: I) -> Name
    where
        I: IntoIterator<Item = S>,
        S: Into<Box<str>>,
    {
        Name {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn labels(&self) -> &[Box<str>] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Appends `suffix`'s labels after this name's labels, returning a new,
    /// longer name (e.g. `instance-name + type-name + "local"`).
    pub fn joined(&self, suffix: &Name) -> Name {
        let mut labels = self.labels.clone();
        labels.extend(suffix.labels.iter().cloned());
        Name { labels }
    }

    pub fn prepend(&self, label: &str) -> Name {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(Box::from(label));
        labels.extend(self.labels.iter().cloned());
        Name { labels }
    }

    /// True if `self` is `suffix` with zero or more labels prepended, e.g.
    /// `_sub._type._tcp.local` has suffix `_type._tcp.local`.
    pub fn has_suffix(&self, suffix: &Name) -> bool {
        if suffix.labels.len() > self.labels.len() {
            return false;
        }
        let offset = self.labels.len() - suffix.labels.len();
        self.labels[offset..]
            .iter()
            .zip(suffix.labels.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Encoded length in bytes, including the length-prefix of each label
    /// and the final zero-length terminator (assuming no compression).
    pub fn encoded_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.labels.len().hash(state);
        for label in &self.labels {
            for b in label.as_bytes() {
                b.to_ascii_lowercase().hash(state);
            }
            0u8.hash(state); // separator, so "ab"+"c" != "a"+"bc"
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, ".");
        }
        for label in &self.labels {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

impl From<&str> for Name {
    /// Parses a dotted name like `"MyPrinter._printer._tcp.local"` into its
    /// labels. Does not validate label length; callers that need strict
    /// validation should check `encoded_len()` / per-label length themselves.
    fn from(s: &str) -> Name {
        let s = s.trim_end_matches('.');
        if s.is_empty() {
            return Name::root();
        }
        Name::from_labels(s.split('.'))
    }
}
