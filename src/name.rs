//! Hierarchical names: the unit of addressing the transport operates on.
//!
//! A [`Name`] is an ordered sequence of opaque byte components, mirroring how the carrier
//! protocol this core targets addresses both requests and responses. The core never
//! interprets a component's bytes except where a wire layout (see `iblt`/`bloom`) says to.

use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Vec<Vec<u8>>);

impl Name {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses a `/`-separated URI-style string into components. Leading/trailing/empty
    /// components are skipped, matching conventional name-URI rendering.
    pub fn from_uri(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|c| !c.is_empty())
                .map(|c| c.as_bytes().to_vec())
                .collect(),
        )
    }

    pub fn push_str(mut self, component: &str) -> Self {
        self.0.push(component.as_bytes().to_vec());
        self
    }

    pub fn push_bytes(mut self, component: Vec<u8>) -> Self {
        self.0.push(component);
        self
    }

    /// Appends an unsigned integer as its own component, LEB128-varint encoded (see
    /// `wire::encode_varint`). Used for explicit length fields in request/response name
    /// layouts.
    pub fn push_varint(mut self, n: u64) -> Self {
        self.0.push(crate::wire::encode_varint(n));
        self
    }

    pub fn append(mut self, other: &Name) -> Self {
        self.0.extend_from_slice(&other.0);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&[u8]> {
        self.0.get(i).map(|v| v.as_slice())
    }

    /// The last `n` components, in order. Empty if the name has fewer than `n` components.
    pub fn last_n(&self, n: usize) -> &[Vec<u8>] {
        if self.0.len() < n {
            &[]
        } else {
            &self.0[self.0.len() - n..]
        }
    }

    /// All but the last `n` components.
    pub fn drop_last_n(&self, n: usize) -> Name {
        let keep = self.0.len().saturating_sub(n);
        Name(self.0[..keep].to_vec())
    }

    /// True if `self`'s components are an exact prefix of `other`'s.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    pub fn to_uri(&self) -> String {
        let mut s = String::new();
        for c in &self.0 {
            s.push('/');
            match std::str::from_utf8(c) {
                Ok(printable) if printable.chars().all(|ch| !ch.is_control()) => {
                    s.push_str(printable)
                }
                _ => s.push_str(&hex::encode(c)),
            }
        }
        s
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::from_uri(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_uri() {
        let n = Name::from_uri("/test/memphis/1");
        assert_eq!(n.len(), 3);
        assert_eq!(n.to_uri(), "/test/memphis/1");
    }

    #[test]
    fn last_n_and_drop_last_n() {
        let n = Name::from_uri("/a/b/c/d");
        let tail = n.last_n(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0], b"c".to_vec());
        assert_eq!(tail[1], b"d".to_vec());
        assert_eq!(n.drop_last_n(2), Name::from_uri("/a/b"));
    }

    #[test]
    fn prefix_matching() {
        let hello = Name::from_uri("/sync/hello");
        let sync = Name::from_uri("/sync/sync");
        let request = Name::from_uri("/sync/hello").push_bytes(vec![1]);
        assert!(hello.is_prefix_of(&request));
        assert!(!sync.is_prefix_of(&request));
    }

    #[test]
    fn push_and_append() {
        let a = Name::from_uri("/sync").push_varint(42).push_bytes(vec![1, 2, 3]);
        let b = Name::new().push_str("peer-iblt");
        let full = a.append(&b);
        assert_eq!(full.len(), 4);
    }
}
