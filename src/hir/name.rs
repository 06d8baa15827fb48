//! Qualified identifiers (`A\B\C`).

use std::fmt;

use smol_str::SmolStr;

/// A namespace-separated identifier.
///
/// Segments never contain `\` and are never empty. Equality is exact; case
/// folding is applied by the caller through [`QualifiedIdentifier::folded`]
/// according to the kind of declaration being looked up.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedIdentifier {
    segments: Vec<SmolStr>,
}

impl QualifiedIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `A\B\C`; a leading `\` and empty segments are ignored.
    pub fn parse(text: &str) -> Self {
        Self {
            segments: text
                .split('\\')
                .filter(|s| !s.is_empty())
                .map(SmolStr::new)
                .collect(),
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &SmolStr| !s.is_empty())
                .collect(),
        }
    }

    pub fn segments(&self) -> &[SmolStr] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> Option<&SmolStr> {
        self.segments.first()
    }

    pub fn last(&self) -> Option<&SmolStr> {
        self.segments.last()
    }

    pub fn push(&mut self, segment: impl Into<SmolStr>) {
        let segment = segment.into();
        if !segment.is_empty() {
            self.segments.push(segment);
        }
    }

    /// `self\other`.
    pub fn join(&self, other: &QualifiedIdentifier) -> Self {
        let mut segments = Vec::with_capacity(self.len() + other.len());
        segments.extend(self.segments.iter().cloned());
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// `self\segment`.
    pub fn child(&self, segment: impl Into<SmolStr>) -> Self {
        let mut out = self.clone();
        out.push(segment);
        out
    }

    /// All segments but the last.
    pub fn parent(&self) -> Self {
        let end = self.segments.len().saturating_sub(1);
        Self {
            segments: self.segments[..end].to_vec(),
        }
    }

    /// The first `n` segments.
    pub fn prefix(&self, n: usize) -> Self {
        Self {
            segments: self.segments[..n.min(self.len())].to_vec(),
        }
    }

    /// Everything after the first `n` segments.
    pub fn suffix(&self, n: usize) -> Self {
        Self {
            segments: self.segments[n.min(self.len())..].to_vec(),
        }
    }

    /// Lowercase the namespace part, and the last segment as well unless
    /// `keep_last_case` is set (constants and variables are case-sensitive).
    pub fn folded(&self, keep_last_case: bool) -> Self {
        let last = self.segments.len().saturating_sub(1);
        Self {
            segments: self
                .segments
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    if keep_last_case && i == last {
                        s.clone()
                    } else {
                        fold(s)
                    }
                })
                .collect(),
        }
    }
}

/// ASCII lowercase, reusing the original when it is already lowercase.
pub fn fold(segment: &SmolStr) -> SmolStr {
    if segment.bytes().any(|b| b.is_ascii_uppercase()) {
        SmolStr::new(segment.to_ascii_lowercase())
    } else {
        segment.clone()
    }
}

impl fmt::Display for QualifiedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("\\")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for QualifiedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QualifiedIdentifier({self})")
    }
}

impl From<&str> for QualifiedIdentifier {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let id = QualifiedIdentifier::parse("\\Foo\\Bar\\Baz");
        assert_eq!(id.len(), 3);
        assert_eq!(id.to_string(), "Foo\\Bar\\Baz");
        assert_eq!(id.parent().to_string(), "Foo\\Bar");
        assert_eq!(id.suffix(1).to_string(), "Bar\\Baz");
    }

    #[test]
    fn test_folding_keeps_constant_case() {
        let id = QualifiedIdentifier::parse("App\\Config\\MAX_SIZE");
        assert_eq!(id.folded(true).to_string(), "app\\config\\MAX_SIZE");
        assert_eq!(id.folded(false).to_string(), "app\\config\\max_size");
    }

    #[test]
    fn test_join() {
        let ns = QualifiedIdentifier::parse("a\\b");
        let joined = ns.join(&QualifiedIdentifier::parse("c"));
        assert_eq!(joined, QualifiedIdentifier::parse("a\\b\\c"));
        assert_eq!(QualifiedIdentifier::new().join(&ns), ns);
    }
}
