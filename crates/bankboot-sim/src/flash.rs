//! Emulated flash map
//!
//! [`SimFlash`] backs every area of a [`BoardLayout`] with one in-memory
//! image holding all flash devices back to back. Like real NOR flash, erased
//! bytes read back as the device's erased value and programming can only
//! clear bits.

use std::collections::BTreeMap;

use bankboot_core::error::{Error, Result};
use bankboot_core::flash::{AreaId, FlashArea, FlashMap, Sector};
use bankboot_core::layout::{AreaLayout, BoardLayout};

/// Open/close event recorded by [`SimFlash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashEvent {
    /// An area was opened
    Open(AreaId),
    /// An area was closed
    Close(AreaId),
}

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlashOp {
    /// `open`
    Open,
    /// `read`
    Read,
    /// `write` and `erase`
    Program,
    /// `sector_count` and `sector`
    Geometry,
}

/// In-memory flash device laid out by a board layout
pub struct SimFlash {
    layout: BoardLayout,
    data: Vec<u8>,
    open: BTreeMap<AreaId, usize>,
    events: Vec<FlashEvent>,
    faults: Vec<(AreaId, FlashOp)>,
    sector_override: BTreeMap<AreaId, Vec<Sector>>,
}

impl SimFlash {
    /// Create an erased flash device for `layout`
    pub fn new(layout: BoardLayout) -> Self {
        let data = vec![layout.device.erased_value; layout.flash_size() as usize];
        Self {
            layout,
            data,
            open: BTreeMap::new(),
            events: Vec::new(),
            faults: Vec::new(),
            sector_override: BTreeMap::new(),
        }
    }

    /// Create a flash device with pre-filled data
    ///
    /// Data beyond the flash size is ignored; a shorter image leaves the
    /// rest of the flash erased.
    pub fn with_data(layout: BoardLayout, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(layout);
        let len = core::cmp::min(initial_data.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Get the board layout
    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Contents of an area
    pub fn area_data(&self, id: AreaId) -> Option<&[u8]> {
        let area = self.layout.area(id)?;
        let start = self.layout.flash_offset(area) as usize;
        self.data.get(start..start + area.size as usize)
    }

    /// Erase an area and program `image` at its start
    ///
    /// The image is padded with the erased value up to the write alignment.
    pub fn load_image(&mut self, id: AreaId, image: &[u8]) -> Result<()> {
        let area = self.open(id)?;
        let result = self.load_into(&area, image);
        self.close(&area);
        result
    }

    fn load_into(&mut self, area: &FlashArea, image: &[u8]) -> Result<()> {
        self.erase(area, 0, area.size)?;

        let align = self.align(area) as usize;
        let mut padded = image.to_vec();
        let rem = padded.len() % align;
        if rem != 0 {
            padded.resize(padded.len() + align - rem, self.erased_val(area));
        }
        self.write(area, 0, &padded)
    }

    /// Make `op` fail on area `id`
    pub fn inject_fault(&mut self, id: AreaId, op: FlashOp) {
        self.faults.push((id, op));
    }

    /// Remove all injected faults
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Report a custom sector table for area `id`
    ///
    /// Lets tests model boards whose geometry does not match the layout,
    /// such as banks with mismatched or too many sectors.
    pub fn override_sectors(&mut self, id: AreaId, sectors: Vec<Sector>) {
        self.sector_override.insert(id, sectors);
    }

    /// Open/close events in order
    pub fn events(&self) -> &[FlashEvent] {
        &self.events
    }

    /// Forget recorded events
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Number of times `id` was opened
    pub fn opens(&self, id: AreaId) -> usize {
        self.events
            .iter()
            .filter(|e| **e == FlashEvent::Open(id))
            .count()
    }

    /// Number of times `id` was closed
    pub fn closes(&self, id: AreaId) -> usize {
        self.events
            .iter()
            .filter(|e| **e == FlashEvent::Close(id))
            .count()
    }

    /// True if no area is currently open
    pub fn all_closed(&self) -> bool {
        self.open.values().all(|&n| n == 0)
    }

    fn faulty(&self, id: AreaId, op: FlashOp) -> bool {
        self.faults.contains(&(id, op))
    }

    fn check(&self, area: &FlashArea, op: FlashOp) -> Result<&AreaLayout> {
        if self.faulty(area.id, op) {
            log::debug!("Injected {:?} fault on area {}", op, area.id);
            return Err(Error::FlashIo);
        }
        if self.open.get(&area.id).copied().unwrap_or(0) == 0 {
            log::error!("Access to area {} which is not open", area.id);
            return Err(Error::FlashIo);
        }
        self.layout.area(area.id).ok_or(Error::FlashIo)
    }

    fn range(
        board: &BoardLayout,
        area: &AreaLayout,
        off: u32,
        len: usize,
    ) -> Result<core::ops::Range<usize>> {
        let start = board.flash_offset(area) + off as u64;
        let end = start + len as u64;
        if off as u64 + len as u64 > area.size as u64 {
            log::error!(
                "Access at 0x{:x}+{} beyond area {} ({} bytes)",
                off,
                len,
                area.id,
                area.size
            );
            return Err(Error::FlashIo);
        }
        Ok(start as usize..end as usize)
    }
}

impl FlashMap for SimFlash {
    fn open(&mut self, id: AreaId) -> Result<FlashArea> {
        if self.faulty(id, FlashOp::Open) {
            log::debug!("Injected open fault on area {}", id);
            return Err(Error::FlashIo);
        }
        let area = self.layout.area(id).ok_or_else(|| {
            log::error!("No area {} in the board layout", id);
            Error::FlashIo
        })?;
        let handle = FlashArea {
            id,
            device_id: area.device_id,
            offset: area.offset,
            size: area.size,
        };

        *self.open.entry(id).or_insert(0) += 1;
        self.events.push(FlashEvent::Open(id));
        Ok(handle)
    }

    fn close(&mut self, area: &FlashArea) {
        match self.open.get_mut(&area.id) {
            Some(n) if *n > 0 => *n -= 1,
            _ => log::warn!("Area {} closed while not open", area.id),
        }
        self.events.push(FlashEvent::Close(area.id));
    }

    fn read(&mut self, area: &FlashArea, off: u32, buf: &mut [u8]) -> Result<()> {
        let layout = self.check(area, FlashOp::Read)?;
        let range = Self::range(&self.layout, layout, off, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, area: &FlashArea, off: u32, data: &[u8]) -> Result<()> {
        let layout = self.check(area, FlashOp::Program)?;
        let range = Self::range(&self.layout, layout, off, data.len())?;

        let align = self.layout.device.write_align as u32;
        if off % align != 0 || data.len() as u32 % align != 0 {
            log::error!(
                "Unaligned write at 0x{:x}+{} (alignment {})",
                off,
                data.len(),
                align
            );
            return Err(Error::FlashIo);
        }

        // Programming can only clear bits
        for (dst, src) in self.data[range].iter_mut().zip(data) {
            *dst &= *src;
        }
        Ok(())
    }

    fn erase(&mut self, area: &FlashArea, off: u32, len: u32) -> Result<()> {
        let layout = self.check(area, FlashOp::Program)?;
        let sector_size = layout.sector_size;
        let range = Self::range(&self.layout, layout, off, len as usize)?;
        if off % sector_size != 0 || len % sector_size != 0 {
            log::error!("Erase of 0x{:x}+{} is not sector aligned", off, len);
            return Err(Error::FlashIo);
        }

        let erased = self.layout.device.erased_value;
        self.data[range].fill(erased);
        Ok(())
    }

    fn align(&self, _area: &FlashArea) -> u8 {
        self.layout.device.write_align
    }

    fn erased_val(&self, _area: &FlashArea) -> u8 {
        self.layout.device.erased_value
    }

    fn sector_count(&mut self, area: &FlashArea) -> Result<usize> {
        let layout = self.check(area, FlashOp::Geometry)?;
        if let Some(sectors) = self.sector_override.get(&area.id) {
            return Ok(sectors.len());
        }
        Ok(layout.sector_count())
    }

    fn sector(&mut self, area: &FlashArea, index: usize) -> Result<Sector> {
        let layout = self.check(area, FlashOp::Geometry)?;
        if let Some(sectors) = self.sector_override.get(&area.id) {
            return sectors.get(index).copied().ok_or(Error::FlashIo);
        }
        if index >= layout.sector_count() {
            return Err(Error::FlashIo);
        }
        Ok(Sector {
            offset: index as u32 * layout.sector_size,
            size: layout.sector_size,
        })
    }
}
