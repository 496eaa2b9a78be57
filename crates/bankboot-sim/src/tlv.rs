//! Image TLV trailer
//!
//! After the image body come an optional protected TLV area (covered by the
//! image hash) and the unprotected TLV area holding the hash itself. Each
//! area starts with an info header `{magic u16, total_len u16}`, where the
//! total includes the info header, followed by entries
//! `{type u8, pad u8, len u16}` and their values. All fields are little
//! endian.

use bankboot_core::flash::AreaReader;
use bankboot_core::image::ImageHeader;

/// Magic of the unprotected TLV info header
pub const TLV_INFO_MAGIC: u16 = 0x6907;
/// Magic of the protected TLV info header
pub const TLV_PROT_INFO_MAGIC: u16 = 0x6908;
/// Size of a TLV info header
pub const TLV_INFO_SIZE: usize = 4;
/// Size of a TLV entry header
pub const TLV_ENTRY_HDR_SIZE: usize = 4;

/// SHA-256 of header, body and protected TLVs
pub const TLV_SHA256: u8 = 0x10;
/// Image encryption key wrapped with the device key
pub const TLV_ENC_KW128: u8 = 0x31;

/// Errors while walking or checking TLVs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    /// The flash map failed a read
    #[error("flash read failed")]
    Read,
    /// Info header magic is wrong
    #[error("bad TLV info magic 0x{0:04x}")]
    BadMagic(u16),
    /// Lengths do not add up
    #[error("TLV area is malformed")]
    Malformed,
    /// No entry of the requested type
    #[error("TLV 0x{0:02x} not found")]
    Missing(u8),
    /// Entry has an unexpected length
    #[error("TLV 0x{kind:02x} has length {len}, expected {expected}")]
    BadLength {
        /// Entry type
        kind: u8,
        /// Actual length
        len: u16,
        /// Required length
        expected: u16,
    },
    /// Computed hash differs from the stored one
    #[error("image hash mismatch")]
    HashMismatch,
    /// Header, body and trailer do not fit the area
    #[error("image does not fit its area")]
    TooLarge,
    /// An encoded area would not fit its 16-bit length field
    #[error("TLV area of {0} bytes exceeds the 65535 byte limit")]
    AreaTooLong(usize),
}

/// Location of one TLV entry within the area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvEntry {
    /// Entry type
    pub kind: u8,
    /// Area offset of the value
    pub off: u32,
    /// Length of the value
    pub len: u16,
}

/// Iterator over the entries of one TLV area
pub struct TlvIter<'r> {
    reader: &'r mut dyn AreaReader,
    off: u32,
    end: u32,
}

impl<'r> TlvIter<'r> {
    /// Start walking the protected or unprotected TLV area of an image
    pub fn new(
        hdr: &ImageHeader,
        reader: &'r mut dyn AreaReader,
        protected: bool,
    ) -> Result<Self, TlvError> {
        let base = hdr.tlv_offset().ok_or(TlvError::TooLarge)?;
        let (base, magic) = if protected {
            if hdr.protect_tlv_size == 0 {
                return Ok(Self {
                    reader,
                    off: base,
                    end: base,
                });
            }
            (base, TLV_PROT_INFO_MAGIC)
        } else {
            (hdr.protected_end().ok_or(TlvError::TooLarge)?, TLV_INFO_MAGIC)
        };

        let mut info = [0u8; TLV_INFO_SIZE];
        reader.read(base, &mut info).map_err(|_| TlvError::Read)?;
        let found = u16::from_le_bytes([info[0], info[1]]);
        let total = u16::from_le_bytes([info[2], info[3]]);
        if found != magic {
            return Err(TlvError::BadMagic(found));
        }
        if (total as usize) < TLV_INFO_SIZE
            || (protected && total != hdr.protect_tlv_size)
        {
            return Err(TlvError::Malformed);
        }

        let end = base
            .checked_add(total as u32)
            .filter(|&end| end <= reader.area().size)
            .ok_or(TlvError::TooLarge)?;

        Ok(Self {
            reader,
            off: base + TLV_INFO_SIZE as u32,
            end,
        })
    }

    /// Find the first entry of type `kind`
    pub fn find(mut self, kind: u8) -> Result<TlvEntry, TlvError> {
        for entry in &mut self {
            let entry = entry?;
            if entry.kind == kind {
                return Ok(entry);
            }
        }
        Err(TlvError::Missing(kind))
    }

    /// Read the value of `entry`, which must be exactly `buf.len()` bytes
    pub fn read_value(&mut self, entry: &TlvEntry, buf: &mut [u8]) -> Result<(), TlvError> {
        read_value(self.reader, entry, buf)
    }
}

impl Iterator for TlvIter<'_> {
    type Item = Result<TlvEntry, TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.off >= self.end {
            return None;
        }

        let result = self.next_entry();
        if result.is_err() {
            self.off = self.end;
        }
        Some(result)
    }
}

impl TlvIter<'_> {
    fn next_entry(&mut self) -> Result<TlvEntry, TlvError> {
        let value_off = self
            .off
            .checked_add(TLV_ENTRY_HDR_SIZE as u32)
            .filter(|&off| off <= self.end)
            .ok_or(TlvError::Malformed)?;

        let mut hdr = [0u8; TLV_ENTRY_HDR_SIZE];
        self.reader
            .read(self.off, &mut hdr)
            .map_err(|_| TlvError::Read)?;
        let len = u16::from_le_bytes([hdr[2], hdr[3]]);
        let next = value_off
            .checked_add(len as u32)
            .filter(|&next| next <= self.end)
            .ok_or(TlvError::Malformed)?;

        self.off = next;
        Ok(TlvEntry {
            kind: hdr[0],
            off: value_off,
            len,
        })
    }
}

/// Read the value of `entry`, which must be exactly `buf.len()` bytes
pub fn read_value(
    reader: &mut dyn AreaReader,
    entry: &TlvEntry,
    buf: &mut [u8],
) -> Result<(), TlvError> {
    if entry.len as usize != buf.len() {
        return Err(TlvError::BadLength {
            kind: entry.kind,
            len: entry.len,
            expected: buf.len() as u16,
        });
    }
    reader.read(entry.off, buf).map_err(|_| TlvError::Read)
}

/// Encode a TLV area from `(type, value)` pairs
///
/// Fails if the area, including its info header, exceeds `u16::MAX` bytes.
pub fn encode_area(magic: u16, entries: &[(u8, &[u8])]) -> Result<Vec<u8>, TlvError> {
    let total: usize = TLV_INFO_SIZE
        + entries
            .iter()
            .map(|(_, v)| TLV_ENTRY_HDR_SIZE + v.len())
            .sum::<usize>();
    let total_len = u16::try_from(total).map_err(|_| TlvError::AreaTooLong(total))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&total_len.to_le_bytes());
    for (kind, value) in entries {
        // Bounded by the total checked above
        let len = u16::try_from(value.len()).map_err(|_| TlvError::AreaTooLong(total))?;
        out.push(*kind);
        out.push(0);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(value);
    }
    Ok(out)
}
