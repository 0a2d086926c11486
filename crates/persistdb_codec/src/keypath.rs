//! Dot-separated key paths into documents.

use crate::error::{CodecError, CodecResult};
use std::fmt;
use std::str::FromStr;

/// One step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A map key.
    Key(String),
    /// A numeric segment: an array index, or a map key spelled with digits.
    Index(usize, String),
}

impl Segment {
    /// The segment as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Key(k) | Segment::Index(_, k) => k,
        }
    }
}

/// A parsed key path such as `"address.city"` or `"tags.0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    /// Parses a dot-separated key path.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyPath`] for an empty path or a path
    /// with an empty segment (`"a..b"`, `".a"`, `"a."`).
    pub fn parse(text: &str) -> CodecResult<Self> {
        if text.is_empty() {
            return Err(CodecError::invalid_key_path(text, "path is empty"));
        }
        let mut segments = Vec::new();
        for part in text.split('.') {
            if part.is_empty() {
                return Err(CodecError::invalid_key_path(text, "empty segment"));
            }
            let segment = match part.parse::<usize>() {
                Ok(i) if part.bytes().all(|b| b.is_ascii_digit()) => {
                    Segment::Index(i, part.to_string())
                }
                _ => Segment::Key(part.to_string()),
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// Builds a single-segment path for a top-level attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is empty or contains a dot.
    pub fn attribute(name: &str) -> CodecResult<Self> {
        if name.contains('.') {
            return Err(CodecError::invalid_key_path(
                name,
                "attribute names cannot contain '.'",
            ));
        }
        Self::parse(name)
    }

    /// Builds a single-segment path selecting `name` as a map key.
    ///
    /// No parsing happens, so `name` may contain any character.
    #[must_use]
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Key(name.into())],
        }
    }

    /// The parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// First segment (the top-level attribute this path starts from).
    #[must_use]
    pub fn root(&self) -> &str {
        self.segments[0].as_str()
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false: parsing rejects empty paths.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment.as_str())?;
        }
        Ok(())
    }
}

impl FromStr for KeyPath {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = CodecError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = CodecError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

/// Conversion into a [`KeyPath`], accepting either parsed paths or text.
pub trait IntoKeyPath {
    /// Performs the conversion, parsing text if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKeyPath`] if the text does not parse.
    fn into_key_path(self) -> CodecResult<KeyPath>;
}

impl IntoKeyPath for KeyPath {
    fn into_key_path(self) -> CodecResult<KeyPath> {
        Ok(self)
    }
}

impl IntoKeyPath for &KeyPath {
    fn into_key_path(self) -> CodecResult<KeyPath> {
        Ok(self.clone())
    }
}

impl IntoKeyPath for &str {
    fn into_key_path(self) -> CodecResult<KeyPath> {
        KeyPath::parse(self)
    }
}

impl IntoKeyPath for String {
    fn into_key_path(self) -> CodecResult<KeyPath> {
        KeyPath::parse(&self)
    }
}

impl IntoKeyPath for &String {
    fn into_key_path(self) -> CodecResult<KeyPath> {
        KeyPath::parse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let p = KeyPath::parse("a.b.c").unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.root(), "a");
        assert_eq!(p.to_string(), "a.b.c");
    }

    #[test]
    fn numeric_segments_are_indexes() {
        let p = KeyPath::parse("items.10").unwrap();
        assert_eq!(p.segments()[1], Segment::Index(10, "10".into()));
    }

    #[test]
    fn signed_digits_are_keys() {
        let p = KeyPath::parse("+1").unwrap();
        assert_eq!(p.segments()[0], Segment::Key("+1".into()));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(KeyPath::parse("").is_err());
        assert!(KeyPath::parse("a..b").is_err());
        assert!(KeyPath::parse(".a").is_err());
        assert!(KeyPath::parse("a.").is_err());
    }

    #[test]
    fn into_key_path_accepts_text_and_paths() {
        let parsed = KeyPath::parse("a.b").unwrap();
        assert_eq!("a.b".into_key_path().unwrap(), parsed);
        assert_eq!((&parsed).into_key_path().unwrap(), parsed);
        assert!("a..b".into_key_path().is_err());
    }

    #[test]
    fn attribute_rejects_dots() {
        assert!(KeyPath::attribute("name").is_ok());
        assert!(KeyPath::attribute("a.b").is_err());
    }
}
