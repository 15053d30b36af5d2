/*!
Dotted-path addressing into the metadata tree.

A path like `dc.title.none` names the `none` elements reached through
`dc` and `title`; the occurrences of that path are the values of their
`<field name="value">` leaves. The syntax:

* `*` as a segment matches any element name at that level.
* A trailing `.$` truncates navigation there, selecting the elements
  themselves rather than their leaf fields.
* A `:leaf` suffix names the leaf field to read, default `value`, so
  `dc.title.none` is equivalent to `dc.title.none:value`.
*/

use std::fmt;

/// Leaf field name used when a path carries no `:leaf` suffix.
pub const DEFAULT_LEAF: &str = "value";

#[derive(Debug, Clone, PartialEq, Eq)]
/// One navigation step of a [FieldPath].
pub enum Segment {
    /// Matches elements with exactly this name.
    Name(String),
    /// Matches any element name at this level.
    Any,
}

impl Segment {
    /// Whether an element with the given name matches this segment.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Segment::Name(expected) => expected == name,
            Segment::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A parsed dotted path into the metadata tree.
pub struct FieldPath {
    segments: Vec<Segment>,
    element_only: bool,
    leaf: String,
}

impl FieldPath {
    /// Parse a dotted path, e.g. `dc.title.none`, `dc.*.none:lang` or
    /// `dc.subject.$`.
    pub fn parse(path: &str) -> Self {
        let (path, leaf) = match path.rsplit_once(':') {
            Some((head, leaf)) if !leaf.is_empty() && !leaf.contains('.') => {
                (head, leaf.to_owned())
            }
            _ => (path, DEFAULT_LEAF.to_owned()),
        };
        let mut segments: Vec<Segment> = path
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment {
                "*" => Segment::Any,
                name => Segment::Name(name.to_owned()),
            })
            .collect();
        let element_only = matches!(segments.last(), Some(Segment::Name(name)) if name == "$");
        if element_only {
            segments.pop();
        }
        FieldPath {
            segments,
            element_only,
            leaf,
        }
    }

    /// The navigation segments, root first.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the path selects elements instead of leaf fields.
    pub fn element_only(&self) -> bool {
        self.element_only
    }

    /// Name of the leaf field to read or write.
    pub fn leaf(&self) -> &str {
        &self.leaf
    }

    /// True when no segment is a wildcard, so the path can be created.
    pub fn is_concrete(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Name(_)))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::parse(path)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, ".")?;
            }
            match segment {
                Segment::Name(name) => write!(f, "{}", name)?,
                Segment::Any => write!(f, "*")?,
            }
            first = false;
        }
        if self.element_only {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "$")?;
        }
        if self.leaf != DEFAULT_LEAF {
            write!(f, ":{}", self.leaf)?;
        }
        Ok(())
    }
}
