//! Single-owner payload buffers cached on a session until consumed.
//!
//! A proxy holds one of these for the start message, the requirements list,
//! and the query sequence counter. Replacement drops the previous contents;
//! consumption moves the buffer out, so a payload is never resent stale.

/// An owned byte payload with exclusive ownership semantics.
///
/// Constructed either by adopting an already-built `Vec` or by copying a
/// borrowed slice when the caller keeps its original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadBuffer {
    data: Vec<u8>,
}

impl PayloadBuffer {
    /// Takes ownership of an externally built buffer without copying.
    pub fn adopt(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Makes a private copy of a borrowed buffer.
    pub fn copied(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the holder, yielding the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Wire form: a big-endian u32 length prefix followed by the bytes.
    pub fn framed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adopt_keeps_bytes() {
        let buf = PayloadBuffer::adopt(vec![10, 20, 30]);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.as_slice(), &[10, 20, 30]);
    }

    #[test]
    fn test_copied_is_independent_of_source() {
        let mut source = vec![1, 2, 3];
        let buf = PayloadBuffer::copied(&source);
        source[0] = 99;
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_framed_prefixes_length() {
        let buf = PayloadBuffer::copied(b"abc");
        let framed = buf.framed();
        assert_eq!(&framed[..4], &3u32.to_be_bytes());
        assert_eq!(&framed[4..], b"abc");
    }

    #[test]
    fn test_empty_buffer_is_well_formed() {
        let buf = PayloadBuffer::adopt(Vec::new());
        assert!(buf.is_empty());
        assert_eq!(buf.framed(), 0u32.to_be_bytes().to_vec());
    }
}
