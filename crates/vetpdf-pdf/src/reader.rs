//! Bounds-checked access to the raw file bytes.
//!
//! Every offset is validated against the real buffer length. Offsets and
//! lengths read from the file itself (xref offsets, `/Length`, object stream
//! headers) are never trusted before passing through here.

use thiserror::Error;

/// Default per-call read cap.
pub const DEFAULT_MAX_READ_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("read of {length} bytes at offset {offset} is outside a {size} byte buffer")]
    OutOfBounds { offset: u64, length: u64, size: u64 },
    #[error("read of {length} bytes exceeds the per-call cap of {cap} bytes")]
    ReadTooLarge { length: u64, cap: usize },
}

/// The file under scan: the bytes plus the length the caller claims it has.
#[derive(Debug, Clone, Copy)]
pub struct RawDocument<'a> {
    bytes: &'a [u8],
    declared_len: Option<u64>,
}

impl<'a> RawDocument<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, declared_len: None }
    }

    pub fn with_declared_len(bytes: &'a [u8], declared_len: u64) -> Self {
        Self { bytes, declared_len: Some(declared_len) }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn declared_len(&self) -> Option<u64> {
        self.declared_len
    }

    /// `(declared, actual)` when the caller's length claim is wrong.
    pub fn length_mismatch(&self) -> Option<(u64, u64)> {
        let declared = self.declared_len?;
        let actual = self.bytes.len() as u64;
        (declared != actual).then_some((declared, actual))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    max_read: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], max_read: usize) -> Self {
        Self { bytes, pos: 0, max_read }
    }

    pub fn from_document(doc: &RawDocument<'a>, max_read: usize) -> Self {
        Self::new(doc.bytes(), max_read)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The whole underlying buffer, for bounded pattern searches.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn max_read(&self) -> usize {
        self.max_read
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, offset: usize) -> Result<(), ReadError> {
        if offset > self.bytes.len() {
            return Err(self.out_of_bounds(offset, 0));
        }
        self.pos = offset;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    /// Borrow `length` bytes at `offset`. Allocates nothing.
    pub fn read(&self, offset: usize, length: usize) -> Result<&'a [u8], ReadError> {
        if length > self.max_read {
            return Err(ReadError::ReadTooLarge { length: length as u64, cap: self.max_read });
        }
        let end = offset.checked_add(length).ok_or_else(|| self.out_of_bounds(offset, length))?;
        if end > self.bytes.len() {
            return Err(self.out_of_bounds(offset, length));
        }
        Ok(&self.bytes[offset..end])
    }

    /// Read at the cursor and advance past the bytes read.
    pub fn read_next(&mut self, length: usize) -> Result<&'a [u8], ReadError> {
        let out = self.read(self.pos, length)?;
        self.pos += length;
        Ok(out)
    }

    /// Up to `max_len` bytes from `offset`, clamped to the end of the buffer.
    /// Used for bounded searches; fails only when `offset` is past the end.
    pub fn window(&self, offset: usize, max_len: usize) -> Result<&'a [u8], ReadError> {
        if offset > self.bytes.len() {
            return Err(self.out_of_bounds(offset, max_len));
        }
        let end = offset.saturating_add(max_len).min(self.bytes.len());
        Ok(&self.bytes[offset..end])
    }

    fn out_of_bounds(&self, offset: usize, length: usize) -> ReadError {
        ReadError::OutOfBounds {
            offset: offset as u64,
            length: length as u64,
            size: self.bytes.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_rejects_lengths_past_the_buffer() {
        let reader = ByteReader::new(b"%PDF-1.7", 1024);
        assert_eq!(reader.read(0, 4).unwrap(), b"%PDF");
        assert!(matches!(reader.read(6, 10), Err(ReadError::OutOfBounds { size: 8, .. })));
        assert!(matches!(reader.read(usize::MAX, 2), Err(ReadError::OutOfBounds { .. })));
    }

    #[test]
    fn read_enforces_per_call_cap() {
        let data = vec![0u8; 64];
        let reader = ByteReader::new(&data, 16);
        assert!(reader.read(0, 16).is_ok());
        assert_eq!(
            reader.read(0, 17),
            Err(ReadError::ReadTooLarge { length: 17, cap: 16 })
        );
    }

    #[test]
    fn read_next_advances_and_tracks_remaining() {
        let mut reader = ByteReader::new(b"abcdef", 1024);
        assert_eq!(reader.read_next(2).unwrap(), b"ab");
        assert_eq!(reader.remaining(), 4);
        reader.seek(6).unwrap();
        assert_eq!(reader.remaining(), 0);
        assert!(reader.seek(7).is_err());
    }

    #[test]
    fn window_clamps_to_buffer_end() {
        let reader = ByteReader::new(b"abc", 1024);
        assert_eq!(reader.window(1, 100).unwrap(), b"bc");
        assert!(reader.window(4, 1).is_err());
    }

    #[test]
    fn declared_length_mismatch_is_reported() {
        let doc = RawDocument::with_declared_len(b"abc", 10);
        assert_eq!(doc.length_mismatch(), Some((10, 3)));
        assert_eq!(RawDocument::new(b"abc").length_mismatch(), None);
    }
}
