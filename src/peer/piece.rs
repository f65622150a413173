use bytes::Bytes;

/// A block within a piece, as carried by `request` and `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockAddress {
    pub piece_index: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockAddress {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Block data received from, or sent to, a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub piece: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl Block {
    pub fn new(piece: u32, offset: u32, data: Bytes) -> Self {
        Self {
            piece,
            offset,
            data,
        }
    }

    pub fn address(&self) -> BlockAddress {
        BlockAddress {
            piece_index: self.piece,
            offset: self.offset,
            length: self.data.len() as u32,
        }
    }
}
