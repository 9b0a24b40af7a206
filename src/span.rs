//! A small byte-rope type for packet payloads (§3, "payload bytes (opaque to
//! the core)"). Trimmed from the base crate's `span.rs`: a sync, single-file
//! engine never needs the `Many` zero-copy-concatenation variant, because a
//! block payload is always flattened into one contiguous slice before the
//! cluster builder serializes it — so only the two leaf variants survive.

use bytes::Bytes;
use std::fmt;

/// An opaque, cheaply-cloneable buffer of packet payload bytes.
#[derive(Clone)]
pub enum Span {
    Owned(Bytes),
    Static(&'static [u8]),
}

impl Span {
    pub fn len(&self) -> usize {
        match self {
            Span::Owned(b) => b.len(),
            Span::Static(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Span::Owned(b) => b,
            Span::Static(b) => b,
        }
    }
}

impl From<Vec<u8>> for Span {
    fn from(bytes: Vec<u8>) -> Self {
        Span::Owned(Bytes::from(bytes))
    }
}

impl From<Bytes> for Span {
    fn from(bytes: Bytes) -> Self {
        Span::Owned(bytes)
    }
}

impl From<&'static [u8]> for Span {
    fn from(bytes: &'static [u8]) -> Self {
        Span::Static(bytes)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span[{}]", self.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn owned_and_static_report_same_contents() {
        let owned = Span::from(vec![1u8, 2, 3]);
        let borrowed = Span::from(&[1u8, 2, 3][..]);

        assert_eq!(owned.as_slice(), borrowed.as_slice());
        assert_eq!(owned.len(), 3);
    }
}
