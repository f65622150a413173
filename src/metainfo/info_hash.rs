use super::error::MetainfoError;
use std::fmt;

/// The SHA-1 hash of a torrent's info dictionary.
///
/// Identifies the torrent in handshakes and tracker announces.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, MetainfoError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| MetainfoError::InvalidInfoHashLength)
    }

    /// Parses 40 hex digits, either case.
    pub fn from_hex(s: &str) -> Result<Self, MetainfoError> {
        if s.len() != 40 || !s.is_ascii() {
            return Err(MetainfoError::InvalidInfoHashLength);
        }
        let mut bytes = [0u8; 20];
        for (byte, pair) in bytes.iter_mut().zip(s.as_bytes().chunks_exact(2)) {
            let digits = std::str::from_utf8(pair).map_err(|_| MetainfoError::InvalidInfoHashLength)?;
            *byte = u8::from_str_radix(digits, 16).map_err(|_| MetainfoError::InvalidInfoHashLength)?;
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{:02x}", b))
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self)
    }
}
