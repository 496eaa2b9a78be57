//! Image header format
//!
//! Every image starts with a fixed 32-byte little-endian header:
//!
//! | Offset | Size | Field              |
//! |--------|------|--------------------|
//! | 0      | 4    | magic              |
//! | 4      | 4    | load address       |
//! | 8      | 2    | header size        |
//! | 10     | 2    | protected TLV size |
//! | 12     | 4    | image (body) size  |
//! | 16     | 4    | flags              |
//! | 20     | 8    | version            |
//! | 28     | 4    | padding            |

use core::fmt;

use bitflags::bitflags;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};

/// Magic value identifying a valid image header
pub const IMAGE_MAGIC: u32 = 0x96f3_b83d;

/// Size of the on-flash image header in bytes
pub const IMAGE_HEADER_SIZE: usize = 32;

bitflags! {
    /// Image header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageFlags: u32 {
        /// Position independent image
        const PIC          = 0x0000_0001;
        /// Image body is encrypted
        const ENCRYPTED    = 0x0000_0004;
        /// Image must not be booted directly (e.g. split image)
        const NON_BOOTABLE = 0x0000_0010;
        /// Image is copied to RAM before execution
        const RAM_LOAD     = 0x0000_0020;
    }
}

/// Image version: `major.minor.revision+build`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ImageVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Revision
    pub revision: u16,
    /// Build number
    pub build_num: u32,
}

impl ImageVersion {
    /// Create a version
    pub const fn new(major: u8, minor: u8, revision: u16, build_num: u32) -> Self {
        Self {
            major,
            minor,
            revision,
            build_num,
        }
    }
}

impl core::str::FromStr for ImageVersion {
    type Err = Error;

    /// Parse `major[.minor[.revision]][+build]`
    fn from_str(s: &str) -> Result<Self> {
        let (dotted, build) = match s.trim().split_once('+') {
            Some((v, b)) => (v, Some(b)),
            None => (s.trim(), None),
        };

        let mut version = ImageVersion::default();
        let mut parts = dotted.split('.');
        version.major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(Error::BadImage)?;
        if let Some(p) = parts.next() {
            version.minor = p.parse().map_err(|_| Error::BadImage)?;
        }
        if let Some(p) = parts.next() {
            version.revision = p.parse().map_err(|_| Error::BadImage)?;
        }
        if parts.next().is_some() {
            return Err(Error::BadImage);
        }
        if let Some(b) = build {
            version.build_num = b.parse().map_err(|_| Error::BadImage)?;
        }
        Ok(version)
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}+{}",
            self.major, self.minor, self.revision, self.build_num
        )
    }
}

/// Raw on-flash layout
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RawHeader {
    magic: U32,
    load_addr: U32,
    hdr_size: U16,
    protect_tlv_size: U16,
    img_size: U32,
    flags: U32,
    ver_major: u8,
    ver_minor: u8,
    ver_revision: U16,
    ver_build_num: U32,
    pad: U32,
}

/// Decoded image header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Must equal [`IMAGE_MAGIC`] for the image to be considered
    pub magic: u32,
    /// Load address for RAM-loaded images
    pub load_addr: u32,
    /// Size of the header; the body starts at this offset
    pub hdr_size: u16,
    /// Size of the protected TLV area following the body
    pub protect_tlv_size: u16,
    /// Size of the image body, excluding header and TLVs
    pub img_size: u32,
    /// Image flags
    pub flags: ImageFlags,
    /// Image version
    pub version: ImageVersion,
}

impl ImageHeader {
    /// Create a header for a body of `img_size` bytes
    pub fn new(img_size: u32, version: ImageVersion) -> Self {
        Self {
            magic: IMAGE_MAGIC,
            load_addr: 0,
            hdr_size: IMAGE_HEADER_SIZE as u16,
            protect_tlv_size: 0,
            img_size,
            flags: ImageFlags::empty(),
            version,
        }
    }

    /// Decode a header from its on-flash bytes
    ///
    /// Decoding never judges the content; see [`has_valid_magic`] and
    /// [`magic_is_erased`] for that.
    ///
    /// [`has_valid_magic`]: ImageHeader::has_valid_magic
    /// [`magic_is_erased`]: ImageHeader::magic_is_erased
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw = RawHeader::read_from_bytes(bytes.get(..IMAGE_HEADER_SIZE).ok_or(Error::BadImage)?)
            .map_err(|_| Error::BadImage)?;

        Ok(Self {
            magic: raw.magic.get(),
            load_addr: raw.load_addr.get(),
            hdr_size: raw.hdr_size.get(),
            protect_tlv_size: raw.protect_tlv_size.get(),
            img_size: raw.img_size.get(),
            flags: ImageFlags::from_bits_retain(raw.flags.get()),
            version: ImageVersion {
                major: raw.ver_major,
                minor: raw.ver_minor,
                revision: raw.ver_revision.get(),
                build_num: raw.ver_build_num.get(),
            },
        })
    }

    /// Encode the header into its on-flash bytes
    pub fn to_bytes(&self) -> [u8; IMAGE_HEADER_SIZE] {
        let raw = RawHeader {
            magic: U32::new(self.magic),
            load_addr: U32::new(self.load_addr),
            hdr_size: U16::new(self.hdr_size),
            protect_tlv_size: U16::new(self.protect_tlv_size),
            img_size: U32::new(self.img_size),
            flags: U32::new(self.flags.bits()),
            ver_major: self.version.major,
            ver_minor: self.version.minor,
            ver_revision: U16::new(self.version.revision),
            ver_build_num: U32::new(self.version.build_num),
            pad: U32::new(0),
        };

        let mut out = [0u8; IMAGE_HEADER_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// True if the magic field reads back as erased flash
    pub fn magic_is_erased(&self, erased_val: u8) -> bool {
        self.magic.to_le_bytes().iter().all(|&b| b == erased_val)
    }

    /// True if the magic field holds [`IMAGE_MAGIC`]
    pub fn has_valid_magic(&self) -> bool {
        self.magic == IMAGE_MAGIC
    }

    /// True unless the header is flagged [`ImageFlags::NON_BOOTABLE`]
    pub fn is_bootable(&self) -> bool {
        !self.flags.contains(ImageFlags::NON_BOOTABLE)
    }

    /// Offset of the first byte after header and body
    ///
    /// `None` if the sizes overflow the 32-bit flash offset space.
    pub fn tlv_offset(&self) -> Option<u32> {
        (self.hdr_size as u32).checked_add(self.img_size)
    }

    /// Offset of the first byte after the protected TLV area
    ///
    /// This is the extent covered by the image hash.
    pub fn protected_end(&self) -> Option<u32> {
        self.tlv_offset()?.checked_add(self.protect_tlv_size as u32)
    }

    /// True if header, body and protected TLVs fit in `area_size` bytes
    pub fn fits(&self, area_size: u32) -> bool {
        self.protected_end().is_some_and(|end| end <= area_size)
    }
}
