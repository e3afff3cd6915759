/// Forward-only reader over a byte slice that tracks its own position.
///
/// Every read either consumes exactly the requested bytes or returns `None`
/// on underrun, leaving no way to mis-track an offset across nested parsing
/// branches.
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the underlying buffer.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        let bytes = self.read_bytes(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Skips `n` bytes, failing if fewer remain.
    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.read_bytes(n).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_primitives_in_order() {
        let mut cursor = ByteCursor::new(&[0x01, 0x00, 0x35, 0xAA, 0xBB]);
        assert_eq!(cursor.read_u8(), Some(0x01));
        assert_eq!(cursor.read_u16_be(), Some(53));
        assert_eq!(cursor.read_bytes(2), Some([0xAA, 0xBB].as_slice()));
        assert_eq!(cursor.position(), 5);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn underrun_returns_none_without_advancing() {
        let mut cursor = ByteCursor::new(&[0x01]);
        assert_eq!(cursor.read_u16_be(), None);
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.read_u8(), Some(0x01));
        assert_eq!(cursor.read_u8(), None);
    }

    #[test]
    fn skip_consumes_exactly_n() {
        let mut cursor = ByteCursor::new(&[0; 4]);
        assert_eq!(cursor.skip(3), Some(()));
        assert_eq!(cursor.position(), 3);
        assert_eq!(cursor.skip(2), None);
        assert_eq!(cursor.position(), 3);
    }
}
