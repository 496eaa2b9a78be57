//! SHA-256 image integrity check

use sha2::{Digest, Sha256};

use bankboot_core::flash::AreaReader;
use bankboot_core::image::{ImageHeader, ImageValidator};

use crate::tlv::{self, TlvError, TlvIter, TLV_SHA256};

/// Length of a SHA-256 digest
pub const SHA256_LEN: usize = 32;

/// Validator comparing the image hash against its `SHA256` TLV
///
/// The hash covers the header, the body and the protected TLV area. It is
/// streamed through the caller's scratch buffer.
#[derive(Debug, Default)]
pub struct HashValidator {
    checked: usize,
}

impl HashValidator {
    /// Create a validator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of images checked so far
    pub fn checked(&self) -> usize {
        self.checked
    }

    /// Check an image, reporting why it is rejected
    pub fn check(
        &mut self,
        hdr: &ImageHeader,
        image: &mut dyn AreaReader,
        tmp: &mut [u8],
    ) -> Result<(), TlvError> {
        self.checked += 1;
        let computed = image_hash(hdr, image, tmp)?;

        let mut stored = [0u8; SHA256_LEN];
        let entry = TlvIter::new(hdr, image, false)?.find(TLV_SHA256)?;
        tlv::read_value(image, &entry, &mut stored)?;

        if computed != stored {
            return Err(TlvError::HashMismatch);
        }
        Ok(())
    }
}

impl ImageValidator for HashValidator {
    fn validate(&mut self, hdr: &ImageHeader, image: &mut dyn AreaReader, tmp: &mut [u8]) -> bool {
        match self.check(hdr, image, tmp) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Image in area {} failed integrity check: {}", image.area().id, e);
                false
            }
        }
    }
}

/// Hash header, body and protected TLVs of an image
pub fn image_hash(
    hdr: &ImageHeader,
    image: &mut dyn AreaReader,
    tmp: &mut [u8],
) -> Result<[u8; SHA256_LEN], TlvError> {
    if tmp.is_empty() {
        return Err(TlvError::Malformed);
    }

    let len = hdr.protected_end().ok_or(TlvError::TooLarge)?;
    if len > image.area().size {
        return Err(TlvError::TooLarge);
    }

    let mut hasher = Sha256::new();
    let mut off = 0u32;
    while off < len {
        let n = core::cmp::min(tmp.len() as u32, len - off) as usize;
        image
            .read(off, &mut tmp[..n])
            .map_err(|_| TlvError::Read)?;
        hasher.update(&tmp[..n]);
        off += n as u32;
    }
    Ok(hasher.finalize().into())
}
