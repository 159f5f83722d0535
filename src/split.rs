//! deterministic path splitting
//!
//! maps a logical path onto a physical path whose leading region is chopped into
//! fixed-length directory chunks, so that a directory holding many siblings
//! (e.g. `/users/<email>`) fans out into a bounded tree instead of one huge listing.
//!
//! ```text
//! include = ["/users/"], parts = 3, part_length = 3, escape = '%'
//!
//! /users/alice@example.org.xml  ->  /users/ali/ce@/exa/mple.org.xml
//! /users/a/b                    ->  /users/a%-/b
//! /docs/readme.txt              ->  /docs/readme.txt   (not included)
//! ```
//!
//! inside the split region (the first `parts * part_length` characters of the
//! included remainder) every `/` becomes `escape + '-'` and every literal escape
//! character is doubled, so the transform can be inverted exactly. anything past
//! the region keeps its real separators.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// parameters of a path split
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// path prefixes below which splitting applies
    pub include: Vec<String>,
    /// maximum number of chunks emitted
    pub parts: usize,
    /// length of each chunk, in characters
    pub part_length: usize,
    /// escape character for `/` and for itself
    #[serde(default = "default_escape")]
    pub escape: char,
}

fn default_escape() -> char {
    '+'
}

impl SplitConfig {
    pub fn new(include: Vec<String>, parts: usize, part_length: usize) -> Self {
        Self {
            include,
            parts,
            part_length,
            escape: default_escape(),
        }
    }

    /// splitter used for revision names (decimal millisecond stamps)
    pub fn revisions() -> Self {
        Self::new(vec![String::new()], 2, 4)
    }

    pub fn with_escape(mut self, escape: char) -> Self {
        self.escape = escape;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.parts == 0 {
            return Err(Error::InvalidConfig("split parts must be positive".into()));
        }
        if self.part_length == 0 {
            return Err(Error::InvalidConfig(
                "split part_length must be positive".into(),
            ));
        }
        if matches!(self.escape, '/' | '-' | '.') {
            return Err(Error::InvalidConfig(format!(
                "split escape character cannot be '{}'",
                self.escape
            )));
        }
        Ok(())
    }

    /// longest include prefix the path starts with
    fn matching_prefix(&self, path: &str) -> Option<&str> {
        self.include
            .iter()
            .filter(|prefix| path.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())
            .map(String::as_str)
    }

    /// true if `split` would transform this path
    pub fn is_included(&self, path: &str) -> bool {
        self.matching_prefix(path).is_some()
    }

    /// map a logical path to its physical form
    ///
    /// only the first `parts * part_length` characters of the remainder are
    /// escaped and chunked; the rest keeps its own separators. a chunk is
    /// followed by `/` only when something comes after it, so a remainder of
    /// exactly `parts * part_length` characters ends without a trailing slash.
    pub fn split(&self, path: &str) -> String {
        let Some(prefix) = self.matching_prefix(path) else {
            return path.to_string();
        };
        let rest = &path[prefix.len()..];
        if rest.is_empty() {
            return path.to_string();
        }

        let (base, extension) = self.split_extension(rest);
        let (region, tail) = self.split_region(base);
        let escaped: Vec<char> = self.escape(region).chars().collect();

        let mut out = String::with_capacity(path.len() + self.parts * 2);
        out.push_str(prefix);

        let mut pos = 0;
        let mut emitted = 0;
        while emitted < self.parts && escaped.len() - pos >= self.part_length {
            let more = escaped.len() - pos > self.part_length || !tail.is_empty();
            if !more {
                break;
            }
            out.extend(&escaped[pos..pos + self.part_length]);
            out.push('/');
            pos += self.part_length;
            emitted += 1;
        }
        out.extend(&escaped[pos..]);
        out.push_str(tail);
        out.push_str(extension);
        out
    }

    /// exact inverse of `split`
    pub fn unsplit(&self, path: &str) -> String {
        let Some(prefix) = self.matching_prefix(path) else {
            return path.to_string();
        };
        let rest = &path[prefix.len()..];

        // the first slashes are the chunk separators; the region holds no others
        let mut joined = String::with_capacity(rest.len());
        let mut removed = 0;
        for c in rest.chars() {
            if c == '/' && removed < self.parts {
                removed += 1;
                continue;
            }
            joined.push(c);
        }

        let mut out = String::with_capacity(path.len());
        out.push_str(prefix);
        out.push_str(&self.unescape_region(&joined));
        out
    }

    /// leading region that gets escaped and chunked, and the literal tail
    ///
    /// a tail never starts with `/` or the escape character: those are pulled
    /// into the region, so the region's end stays recognizable after escaping.
    fn split_region<'a>(&self, base: &'a str) -> (&'a str, &'a str) {
        let limit = self.parts * self.part_length;
        let mut end = base
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(base.len());
        for c in base[end..].chars() {
            if c != '/' && c != self.escape {
                break;
            }
            end += c.len_utf8();
        }
        base.split_at(end)
    }

    /// separate the extension of the last segment, if it needs no escaping
    fn split_extension<'a>(&self, rest: &'a str) -> (&'a str, &'a str) {
        let segment_start = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let segment = &rest[segment_start..];
        match segment.rfind('.') {
            Some(dot) if dot > 0 && !segment[dot..].contains(self.escape) => {
                rest.split_at(segment_start + dot)
            }
            _ => (rest, ""),
        }
    }

    fn escape(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            if c == self.escape {
                out.push(self.escape);
                out.push(self.escape);
            } else if c == '/' {
                out.push(self.escape);
                out.push('-');
            } else {
                out.push(c);
            }
        }
        out
    }

    /// undo `escape` over the region, copying the tail verbatim
    fn unescape_region(&self, s: &str) -> String {
        let limit = self.parts * self.part_length;
        let mut out = String::with_capacity(s.len());
        let mut decoded = 0;
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            let in_region = decoded < limit || c == self.escape;
            if !in_region {
                out.push(c);
                out.extend(chars);
                break;
            }
            decoded += 1;
            if c != self.escape {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some(&next) if next == self.escape => {
                    chars.next();
                    out.push(self.escape);
                }
                Some('-') => {
                    chars.next();
                    out.push('/');
                }
                // dangling escape: keep it verbatim
                _ => out.push(c),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn users() -> SplitConfig {
        SplitConfig::new(vec!["/users/".into()], 3, 3).with_escape('%')
    }

    #[test]
    fn test_split_basic() {
        let cfg = users();
        assert_eq!(
            cfg.split("/users/alice@example.org.xml"),
            "/users/ali/ce@/exa/mple.org.xml"
        );
        assert_eq!(
            cfg.unsplit("/users/ali/ce@/exa/mple.org.xml"),
            "/users/alice@example.org.xml"
        );
    }

    #[test]
    fn test_not_included_passes_through() {
        let cfg = users();
        assert!(!cfg.is_included("/docs/readme.txt"));
        assert_eq!(cfg.split("/docs/readme.txt"), "/docs/readme.txt");
        assert_eq!(cfg.unsplit("/docs/readme.txt"), "/docs/readme.txt");
    }

    #[test]
    fn test_short_path_not_padded() {
        let cfg = users();
        assert_eq!(cfg.split("/users/bob"), "/users/bob");
        assert_eq!(cfg.split("/users/bobby"), "/users/bob/by");
        assert_eq!(cfg.split("/users/bob.xml"), "/users/bob.xml");
    }

    #[test]
    fn test_slashes_and_escape_are_escaped() {
        let cfg = SplitConfig::new(vec!["/users/".into()], 3, 8).with_escape('%');
        assert_eq!(cfg.split("/users/a/b"), "/users/a%-b");
        assert_eq!(cfg.split("/users/a%b"), "/users/a%%b");
        // a double slash never reaches the physical path
        let split = cfg.split("/users/a//b");
        assert_eq!(split, "/users/a%-%-b");
        assert_eq!(cfg.unsplit(&split), "/users/a//b");
    }

    #[test]
    fn test_escape_token_across_chunk_boundary() {
        let cfg = users();
        let path = "/users/ab/cdefghijk";
        let split = cfg.split(path);
        assert_eq!(split, "/users/ab%/-cd/efg/hijk");
        assert_eq!(cfg.unsplit(&split), path);
    }

    #[test]
    fn test_extension_with_escape_is_not_separated() {
        let cfg = users();
        let path = "/users/abcdefg.x%y";
        let split = cfg.split(path);
        assert!(!split.ends_with(".x%y"));
        assert_eq!(cfg.unsplit(&split), path);
    }

    #[test]
    fn test_tail_past_region_keeps_separators() {
        let cfg = SplitConfig::new(vec!["/users/".into()], 1, 2);
        let path = "/users/abcdef/x.txt";
        assert_eq!(cfg.split(path), "/users/ab/cdef/x.txt");
        assert_eq!(cfg.unsplit("/users/ab/cdef/x.txt"), path);

        let cfg = SplitConfig::new(vec!["/users/".into()], 2, 3);
        let path = "/users/alice/docs/report.pdf";
        assert_eq!(cfg.split(path), "/users/ali/ce+/-docs/report.pdf");
        assert_eq!(cfg.unsplit(&cfg.split(path)), path);
    }

    #[test]
    fn test_region_of_exact_length() {
        let cfg = SplitConfig::new(vec!["/users/".into()], 2, 3);
        // nothing follows the last full chunk: no trailing separator
        assert_eq!(cfg.split("/users/abcdef"), "/users/abc/def");
        assert_eq!(cfg.split("/users/abcdef.txt"), "/users/abc/def.txt");
        assert_eq!(cfg.split("/users/abcdefg"), "/users/abc/def/g");
        for path in ["/users/abcdef", "/users/abcdef.txt", "/users/abcdefg"] {
            assert_eq!(cfg.unsplit(&cfg.split(path)), path);
        }
    }

    #[test]
    fn test_slash_right_after_region() {
        let cfg = SplitConfig::new(vec!["/users/".into()], 2, 3);
        // the slash joins the region so no empty path segment appears
        let path = "/users/abcdef/x";
        assert_eq!(cfg.split(path), "/users/abc/def/+-x");
        assert_eq!(cfg.unsplit("/users/abc/def/+-x"), path);

        let path = "/users/abcdef+-x";
        let split = cfg.split(path);
        assert_eq!(split, "/users/abc/def/++-x");
        assert_eq!(cfg.unsplit(&split), path);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let cfg = SplitConfig::new(vec!["/a/".into(), "/a/b/".into()], 1, 2);
        assert_eq!(cfg.split("/a/b/cdef"), "/a/b/cd/ef");
        assert_eq!(cfg.split("/a/cdef"), "/a/cd/ef");
    }

    #[test]
    fn test_revision_names() {
        let cfg = SplitConfig::revisions();
        assert_eq!(cfg.split("1700000000123"), "1700/0000/00123");
        assert_eq!(cfg.unsplit("1700/0000/00123"), "1700000000123");
    }

    #[test]
    fn test_validate() {
        assert!(users().validate().is_ok());
        assert!(SplitConfig::new(vec![], 0, 3).validate().is_err());
        assert!(SplitConfig::new(vec![], 3, 0).validate().is_err());
        assert!(SplitConfig::new(vec![], 3, 3).with_escape('/').validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_split_roundtrip(
            rest in "[a-c%/.@-]{0,80}",
            parts in 1usize..5,
            part_length in 1usize..6,
        ) {
            let cfg = SplitConfig::new(vec!["/users/".into()], parts, part_length).with_escape('%');
            let path = format!("/users/{}", rest);
            prop_assert_eq!(cfg.unsplit(&cfg.split(&path)), path);
        }

        #[test]
        fn prop_bounded_fanout(
            rest in "[a-z]{0,80}",
            parts in 1usize..5,
            part_length in 1usize..6,
        ) {
            let cfg = SplitConfig::new(vec!["/users/".into()], parts, part_length);
            let split = cfg.split(&format!("/users/{}", rest));
            let tail = &split["/users/".len().min(split.len())..];
            prop_assert!(tail.matches('/').count() <= parts);
        }

        #[test]
        fn prop_tail_is_verbatim(
            parts in 1usize..4,
            part_length in 1usize..5,
            head in "[a-z]{16}",
            tail in "[a-z][a-z/]{0,20}",
        ) {
            let cfg = SplitConfig::new(vec!["/users/".into()], parts, part_length);
            let head = &head[..parts * part_length];
            let chunks: Vec<&str> = (0..parts)
                .map(|i| &head[i * part_length..(i + 1) * part_length])
                .collect();
            let path = format!("/users/{}{}", head, tail);
            let expected = format!("/users/{}/{}", chunks.join("/"), tail);
            prop_assert_eq!(cfg.split(&path), expected);
            prop_assert_eq!(cfg.unsplit(&cfg.split(&path)), path);
        }
    }
}
