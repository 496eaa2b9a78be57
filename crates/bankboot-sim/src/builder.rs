//! Image builder
//!
//! Produces images in the layout the bootloader reads: header, optional
//! header padding, body, protected TLVs, then the unprotected TLVs holding
//! the SHA-256 hash and, for encrypted images, the wrapped key.

use sha2::{Digest, Sha256};

use bankboot_core::image::{
    ImageFlags, ImageHeader, ImageVersion, KeyMaterial, IMAGE_HEADER_SIZE,
};

use crate::keys::wrap_key;
use crate::tlv::{
    encode_area, TlvError, TLV_ENC_KW128, TLV_INFO_MAGIC, TLV_PROT_INFO_MAGIC, TLV_SHA256,
};

/// Errors while assembling an image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The body does not fit the 32-bit size field
    #[error("image body of {0} bytes is too large")]
    BodyTooLarge(usize),
    /// A TLV area could not be encoded
    #[error(transparent)]
    Tlv(#[from] TlvError),
}

/// Builder for bootable images
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    version: ImageVersion,
    flags: ImageFlags,
    load_addr: u32,
    hdr_size: u16,
    body: Vec<u8>,
    protected: Vec<(u8, Vec<u8>)>,
    wrapped_key: Option<[u8; 16]>,
    hash: bool,
}

impl ImageBuilder {
    /// Start an image with an empty body
    pub fn new(version: ImageVersion) -> Self {
        Self {
            version,
            flags: ImageFlags::empty(),
            load_addr: 0,
            hdr_size: IMAGE_HEADER_SIZE as u16,
            body: Vec::new(),
            protected: Vec::new(),
            wrapped_key: None,
            hash: true,
        }
    }

    /// Set the image body
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Add header flags
    pub fn flags(mut self, flags: ImageFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Set the load address
    pub fn load_addr(mut self, addr: u32) -> Self {
        self.load_addr = addr;
        self
    }

    /// Reserve `size` bytes for the header; the body starts after them
    ///
    /// Sizes below the fixed header size are ignored.
    pub fn header_size(mut self, size: u16) -> Self {
        self.hdr_size = size.max(IMAGE_HEADER_SIZE as u16);
        self
    }

    /// Add a protected TLV, covered by the image hash
    pub fn protected_tlv(mut self, kind: u8, value: &[u8]) -> Self {
        self.protected.push((kind, value.to_vec()));
        self
    }

    /// Mark the image encrypted and embed `key` wrapped with `kek`
    pub fn encryption_key(mut self, key: &KeyMaterial, kek: &KeyMaterial) -> Self {
        self.flags |= ImageFlags::ENCRYPTED;
        self.wrapped_key = Some(wrap_key(key.as_bytes(), kek));
        self
    }

    /// Leave out the hash TLV
    pub fn without_hash(mut self) -> Self {
        self.hash = false;
        self
    }

    /// Header the built image will carry
    pub fn header(&self) -> Result<ImageHeader, BuildError> {
        let img_size =
            u32::try_from(self.body.len()).map_err(|_| BuildError::BodyTooLarge(self.body.len()))?;
        let protected = self.protected_area()?;

        let mut hdr = ImageHeader::new(img_size, self.version);
        hdr.flags = self.flags;
        hdr.load_addr = self.load_addr;
        hdr.hdr_size = self.hdr_size;
        hdr.protect_tlv_size = u16::try_from(protected.len())
            .map_err(|_| TlvError::AreaTooLong(protected.len()))?;
        if hdr.protected_end().is_none() {
            return Err(BuildError::BodyTooLarge(self.body.len()));
        }
        Ok(hdr)
    }

    fn protected_area(&self) -> Result<Vec<u8>, TlvError> {
        if self.protected.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<(u8, &[u8])> = self
            .protected
            .iter()
            .map(|(k, v)| (*k, v.as_slice()))
            .collect();
        encode_area(TLV_PROT_INFO_MAGIC, &entries)
    }

    /// Assemble the image
    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        let mut image = Vec::new();
        image.extend_from_slice(&self.header()?.to_bytes());
        image.resize(self.hdr_size as usize, 0);
        image.extend_from_slice(&self.body);
        image.extend_from_slice(&self.protected_area()?);

        let digest: [u8; 32] = Sha256::digest(&image).into();
        let mut entries: Vec<(u8, &[u8])> = Vec::new();
        if self.hash {
            entries.push((TLV_SHA256, &digest[..]));
        }
        if let Some(wrapped) = &self.wrapped_key {
            entries.push((TLV_ENC_KW128, &wrapped[..]));
        }
        image.extend_from_slice(&encode_area(TLV_INFO_MAGIC, &entries)?);

        log::debug!(
            "Built image {}: {} byte body, {} bytes total",
            self.version,
            self.body.len(),
            image.len()
        );
        Ok(image)
    }
}
