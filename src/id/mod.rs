use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Segment type of every engine root.
pub const ENGINE_SEGMENT: &str = "engine";

const SEGMENT_SEPARATOR: char = '/';
const TYPE_SEPARATOR: char = ':';
const OPEN: char = '[';
const CLOSE: char = ']';
const ESCAPE: char = '%';

/// One `(type, value)` pair of a [`UniqueId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub segment_type: String,
    pub value: String,
}

impl Segment {
    pub fn new(segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            segment_type: segment_type.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{OPEN}{}{TYPE_SEPARATOR}{}{CLOSE}",
            encode(&self.segment_type),
            encode(&self.value)
        )
    }
}

/// Hierarchical identifier addressing one node, from its engine root down.
///
/// Rendered as `[engine:demo]/[package:com.example]/[class:LoginTests]`.
/// The reserved characters `[ ] : / %` are percent-encoded inside types and
/// values, so `UniqueId::parse(&id.to_string())` always yields `id` again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId {
    segments: Vec<Segment>,
}

impl UniqueId {
    /// Create a single-segment id.
    pub fn root(segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::new(segment_type, value)],
        }
    }

    /// Create the root id of the engine named `engine_id`.
    pub fn for_engine(engine_id: impl Into<String>) -> Self {
        Self::root(ENGINE_SEGMENT, engine_id)
    }

    /// Return a new id one segment longer than `self`.
    #[must_use]
    pub fn append(&self, segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(Segment::new(segment_type, value));
        Self { segments }
    }

    /// Parse the textual form produced by `Display`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] if `text` is empty, a segment is not bracketed,
    /// lacks a type separator, or contains a bad escape. Empty types and
    /// values are accepted, since `root` and `append` can produce them.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let fail = |kind: FormatErrorKind| FormatError {
            text: text.to_owned(),
            kind,
        };
        if text.is_empty() {
            return Err(fail(FormatErrorKind::Empty));
        }

        let mut segments = Vec::new();
        for (index, raw) in text.split(SEGMENT_SEPARATOR).enumerate() {
            let inner = raw
                .strip_prefix(OPEN)
                .and_then(|r| r.strip_suffix(CLOSE))
                .ok_or_else(|| fail(FormatErrorKind::Unbracketed { index }))?;
            let (segment_type, value) = inner
                .split_once(TYPE_SEPARATOR)
                .ok_or_else(|| fail(FormatErrorKind::MissingTypeSeparator { index }))?;
            if [segment_type, value]
                .iter()
                .any(|part| part.contains([OPEN, CLOSE]))
            {
                return Err(fail(FormatErrorKind::UnescapedReserved { index }));
            }
            let segment_type = decode(segment_type, index).map_err(fail)?;
            let value = decode(value, index).map_err(fail)?;
            segments.push(Segment {
                segment_type,
                value,
            });
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; ids have at least one segment.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last_segment(&self) -> &Segment {
        // Non-empty by construction.
        &self.segments[self.segments.len() - 1]
    }

    /// Value of the first segment when it is an engine segment.
    pub fn engine_id(&self) -> Option<&str> {
        let first = &self.segments[0];
        (first.segment_type == ENGINE_SEGMENT).then_some(first.value.as_str())
    }

    /// The id with the last segment removed, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        (self.segments.len() > 1).then(|| Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `self` is a proper prefix of `other`.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Whether `other` is exactly one segment longer and starts with `self`.
    pub fn is_parent_of(&self, other: &Self) -> bool {
        other.segments.len() == self.segments.len() + 1 && self.is_ancestor_of(other)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEGMENT_SEPARATOR}")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for UniqueId {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for UniqueId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UniqueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Malformed textual unique id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed unique id \"{text}\": {kind}")]
pub struct FormatError {
    pub text: String,
    pub kind: FormatErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatErrorKind {
    #[error("text is empty")]
    Empty,
    #[error("segment {index} is not enclosed in '[' and ']'")]
    Unbracketed { index: usize },
    #[error("segment {index} has no ':' between type and value")]
    MissingTypeSeparator { index: usize },
    #[error("segment {index} contains an unescaped '[' or ']'")]
    UnescapedReserved { index: usize },
    #[error("segment {index} contains an invalid escape sequence")]
    InvalidEscape { index: usize },
    #[error("segment {index} does not decode to UTF-8")]
    InvalidUtf8 { index: usize },
}

fn is_reserved(c: char) -> bool {
    matches!(
        c,
        SEGMENT_SEPARATOR | TYPE_SEPARATOR | OPEN | CLOSE | ESCAPE
    )
}

fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if is_reserved(c) {
            out.push_str(&format!("{ESCAPE}{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn decode(encoded: &str, index: usize) -> Result<String, FormatErrorKind> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or(FormatErrorKind::InvalidEscape { index })?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| FormatErrorKind::InvalidUtf8 { index })
}
