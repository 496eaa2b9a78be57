//! Flash area access
//!
//! The bootloader never talks to a flash driver directly. Boards provide a
//! [`FlashMap`], which opens areas by id and performs area-relative I/O. All
//! failures surface as [`Error::FlashIo`](crate::Error::FlashIo).

use core::fmt;

use crate::error::Result;

/// Identifier of a flash area in the board's flash map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(transparent))]
pub struct AreaId(pub u8);

impl AreaId {
    /// The bootloader itself
    pub const BOOTLOADER: AreaId = AreaId(0);
    /// Image bank 0 (primary)
    pub const IMAGE_0: AreaId = AreaId(1);
    /// Image bank 1 (secondary)
    pub const IMAGE_1: AreaId = AreaId(2);
    /// Scratch / configuration area
    pub const SCRATCH: AreaId = AreaId(3);
    /// Key-value storage partition
    pub const STORAGE: AreaId = AreaId(4);
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opened flash area
///
/// Returned by [`FlashMap::open`] and handed back to [`FlashMap::close`].
/// Offsets passed to the I/O methods are relative to the start of the area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashArea {
    /// Area id this handle was opened for
    pub id: AreaId,
    /// Flash device holding the area
    pub device_id: u8,
    /// Byte offset of the area within its device
    pub offset: u32,
    /// Size of the area in bytes
    pub size: u32,
}

/// One erase sector of an area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    /// Offset of the sector relative to the start of its area
    pub offset: u32,
    /// Size of the sector in bytes
    pub size: u32,
}

/// Board flash map
///
/// Every area opened with [`open`](FlashMap::open) must be released with
/// [`close`](FlashMap::close) exactly once.
pub trait FlashMap {
    /// Open an area by id
    fn open(&mut self, id: AreaId) -> Result<FlashArea>;

    /// Release an area opened with `open`
    fn close(&mut self, area: &FlashArea);

    /// Read `buf.len()` bytes starting at `off`
    fn read(&mut self, area: &FlashArea, off: u32, buf: &mut [u8]) -> Result<()>;

    /// Program `data` at `off`. The target must be erased.
    fn write(&mut self, area: &FlashArea, off: u32, data: &[u8]) -> Result<()>;

    /// Erase `len` bytes at `off`; both must be sector aligned
    fn erase(&mut self, area: &FlashArea, off: u32, len: u32) -> Result<()>;

    /// Minimum write granularity of the area in bytes
    fn align(&self, area: &FlashArea) -> u8;

    /// Value every byte reads back as after an erase
    fn erased_val(&self, area: &FlashArea) -> u8;

    /// Number of erase sectors in the area
    fn sector_count(&mut self, area: &FlashArea) -> Result<usize>;

    /// Describe sector `index` of the area
    fn sector(&mut self, area: &FlashArea, index: usize) -> Result<Sector>;
}

/// Read access to a single opened area
///
/// This is what the integrity validator and key manager see of an image:
/// they can read it, nothing else.
pub trait AreaReader {
    /// The area being read
    fn area(&self) -> &FlashArea;

    /// Read `buf.len()` bytes at `off` within the area
    fn read(&mut self, off: u32, buf: &mut [u8]) -> Result<()>;
}

/// [`AreaReader`] over an area of a [`FlashMap`]
pub struct AreaView<'a, F: FlashMap + ?Sized> {
    flash: &'a mut F,
    area: FlashArea,
}

impl<'a, F: FlashMap + ?Sized> AreaView<'a, F> {
    /// Create a reader for an already opened area
    pub fn new(flash: &'a mut F, area: FlashArea) -> Self {
        Self { flash, area }
    }
}

impl<F: FlashMap + ?Sized> AreaReader for AreaView<'_, F> {
    fn area(&self) -> &FlashArea {
        &self.area
    }

    fn read(&mut self, off: u32, buf: &mut [u8]) -> Result<()> {
        self.flash.read(&self.area, off, buf)
    }
}
