use super::error::PeerError;
use super::message::MessageId;
use bytes::Bytes;

/// Piece availability, one bit per piece.
///
/// Piece 0 is the high bit of the first byte. Spare bits past the last
/// piece are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// An empty bitfield for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// A bitfield with every piece set.
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        let mask = bf.spare_mask();
        if let Some(last) = bf.bits.last_mut() {
            *last &= mask;
        }
        bf
    }

    /// Parses the payload of a `bitfield` message.
    ///
    /// The payload must be exactly `ceil(piece_count / 8)` bytes with every
    /// spare bit clear.
    pub fn try_from_bytes(bytes: &[u8], piece_count: usize) -> Result<Self, PeerError> {
        let expected = piece_count.div_ceil(8);
        if bytes.len() != expected {
            return Err(PeerError::InvalidLength {
                id: MessageId::Bitfield as u8,
                expected,
                actual: bytes.len(),
            });
        }

        let bf = Self {
            bits: bytes.to_vec(),
            piece_count,
        };
        if let Some(last) = bf.bits.last() {
            if last & !bf.spare_mask() != 0 {
                return Err(PeerError::Protocol("bitfield has spare bits set".into()));
            }
        }
        Ok(bf)
    }

    /// Byte index and bit mask of `index`, or `None` past the last piece.
    fn locate(&self, index: usize) -> Option<(usize, u8)> {
        (index < self.piece_count).then(|| (index / 8, 0x80 >> (index % 8)))
    }

    /// Returns true if the piece at the given index is available.
    pub fn has_piece(&self, index: usize) -> bool {
        self.locate(index)
            .is_some_and(|(byte, mask)| self.bits[byte] & mask != 0)
    }

    /// Sets the bit for `index`. Out-of-range indices are ignored.
    pub fn set_piece(&mut self, index: usize) {
        if let Some((byte, mask)) = self.locate(index) {
            self.bits[byte] |= mask;
        }
    }

    pub fn clear_piece(&mut self, index: usize) {
        if let Some((byte, mask)) = self.locate(index) {
            self.bits[byte] &= !mask;
        }
    }

    /// Number of pieces set.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Wire representation, high bit first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Returns true if this bitfield has any piece `ours` lacks.
    pub fn has_missing_from(&self, ours: &Bitfield) -> bool {
        self.bits
            .iter()
            .zip(ours.bits.iter().chain(std::iter::repeat(&0)))
            .any(|(theirs, ours)| theirs & !ours != 0)
    }

    /// Mask of the valid bits in the last byte.
    fn spare_mask(&self) -> u8 {
        let spare = self.bits.len() * 8 - self.piece_count;
        0xFFu8 << spare
    }
}
