//! Structured document paths
//!
//! Paths address values inside the document tree with dot-separated keys and
//! bracketed list indices: `findings.abc.data.title`, `list.[0].name` and
//! `list[0].name` all parse the same way.

/// Path segment for navigating document structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

impl<'a> PathSegment<'a> {
    /// Parse a path string into segments
    /// Examples: "foo.bar", "items[0]", "items.[0].name"
    pub fn parse(path: &'a str) -> impl Iterator<Item = PathSegment<'a>> {
        PathParser { path, pos: 0 }
    }
}

struct PathParser<'a> {
    path: &'a str,
    pos: usize,
}

impl<'a> Iterator for PathParser<'a> {
    type Item = PathSegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.path.len() {
            return None;
        }

        let remaining = &self.path[self.pos..];

        // Skip leading dot
        let remaining = remaining.strip_prefix('.').unwrap_or(remaining);
        if remaining.is_empty() {
            return None;
        }
        self.pos = self.path.len() - remaining.len();

        if remaining.starts_with('[') {
            if let Some(end) = remaining.find(']') {
                let idx_str = &remaining[1..end];
                if let Ok(idx) = idx_str.parse::<usize>() {
                    self.pos += end + 1;
                    return Some(PathSegment::Index(idx));
                }
            }
        }

        let end = remaining
            .find(|c| c == '.' || c == '[')
            .unwrap_or(remaining.len());
        // A '[' that did not open a valid index is part of the key
        let end = if end == 0 {
            remaining[1..]
                .find(|c| c == '.' || c == '[')
                .map_or(remaining.len(), |i| i + 1)
        } else {
            end
        };

        let key = &remaining[..end];
        self.pos += end;

        if key.is_empty() {
            self.next()
        } else {
            Some(PathSegment::Key(key))
        }
    }
}

/// Returns true if `path` equals `ancestor` or lies below it.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with('['),
        None => false,
    }
}

/// Returns true if `path` lies strictly below `ancestor`.
pub fn is_strict_descendant(path: &str, ancestor: &str) -> bool {
    path != ancestor && is_same_or_descendant(path, ancestor)
}

/// Split a path into its parent path and final segment.
pub fn split_last(path: &str) -> Option<(&str, PathSegment<'_>)> {
    let last = PathSegment::parse(path).last()?;
    let cut = match last {
        PathSegment::Key(key) => path.len() - key.len(),
        PathSegment::Index(_) => path.rfind('[')?,
    };
    let parent = path[..cut].trim_end_matches('.');
    Some((parent, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parsing() {
        let segments: Vec<_> = PathSegment::parse("foo.bar[0].baz").collect();
        assert_eq!(
            segments,
            vec![
                PathSegment::Key("foo"),
                PathSegment::Key("bar"),
                PathSegment::Index(0),
                PathSegment::Key("baz"),
            ]
        );
    }

    #[test]
    fn test_dotted_index() {
        let segments: Vec<_> = PathSegment::parse("list.[12].name").collect();
        assert_eq!(
            segments,
            vec![PathSegment::Key("list"), PathSegment::Index(12), PathSegment::Key("name")]
        );
    }

    #[test]
    fn test_descendants() {
        assert!(is_same_or_descendant("a", "a"));
        assert!(is_same_or_descendant("a.b", "a"));
        assert!(is_same_or_descendant("a.[0]", "a"));
        assert!(is_same_or_descendant("a[0]", "a"));
        assert!(!is_same_or_descendant("ab", "a"));
        assert!(!is_strict_descendant("a", "a"));
        assert!(is_strict_descendant("a.b.c", "a.b"));
    }

    #[test]
    fn test_split_last() {
        assert_eq!(split_last("a.b"), Some(("a", PathSegment::Key("b"))));
        assert_eq!(split_last("a.[3]"), Some(("a", PathSegment::Index(3))));
        assert_eq!(split_last("a[3]"), Some(("a", PathSegment::Index(3))));
        assert_eq!(split_last("top"), Some(("", PathSegment::Key("top"))));
        assert_eq!(split_last(""), None);
    }
}
