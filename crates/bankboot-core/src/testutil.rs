//! Mock collaborators shared by the unit tests

use std::vec;
use std::vec::Vec;

use crate::error::{Error, Result};
use crate::flash::{AreaId, AreaReader, FlashArea, FlashMap, Sector};
use crate::image::{ImageHeader, ImageValidator, IMAGE_HEADER_SIZE};
use crate::storage::{KvStore, StoreError};

/// Open/close event recorded by [`MockFlash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Open(AreaId),
    Close(AreaId),
}

/// Description of one emulated area
#[derive(Debug, Clone)]
pub struct MockArea {
    pub id: AreaId,
    pub offset: u32,
    pub sectors: Vec<Sector>,
    pub align: u8,
    pub erased: u8,
}

impl MockArea {
    pub fn uniform(id: AreaId, offset: u32, count: usize, size: u32) -> Self {
        Self {
            id,
            offset,
            sectors: (0..count)
                .map(|i| Sector {
                    offset: i as u32 * size,
                    size,
                })
                .collect(),
            align: 4,
            erased: 0xFF,
        }
    }

    fn size(&self) -> u32 {
        self.sectors.iter().map(|s| s.size).sum()
    }
}

/// A mock flash map that simulates flash areas for testing
///
/// - Memory starts as the area's erased value
/// - Every open and close is recorded in order
/// - Individual areas can be made to fail open, read or geometry queries
pub struct MockFlash {
    areas: Vec<(MockArea, Vec<u8>)>,
    pub events: Vec<Event>,
    fail_open: Vec<AreaId>,
    fail_read: Vec<AreaId>,
    fail_geometry: Vec<AreaId>,
}

impl MockFlash {
    pub fn new(areas: &[MockArea]) -> Self {
        Self {
            areas: areas
                .iter()
                .map(|a| (a.clone(), vec![a.erased; a.size() as usize]))
                .collect(),
            events: Vec::new(),
            fail_open: Vec::new(),
            fail_read: Vec::new(),
            fail_geometry: Vec::new(),
        }
    }

    /// Standard board: two 8-sector banks plus an 8-sector scratch area
    pub fn board() -> Self {
        Self::new(&[
            MockArea::uniform(AreaId::IMAGE_0, 0x0000_C000, 8, 4096),
            MockArea::uniform(AreaId::IMAGE_1, 0x0001_4000, 8, 4096),
            MockArea::uniform(AreaId::SCRATCH, 0x0001_C000, 8, 4096),
        ])
    }

    pub fn open_area(&mut self, id: AreaId) -> FlashArea {
        self.open(id).unwrap()
    }

    pub fn program(&mut self, id: AreaId, off: usize, data: &[u8]) {
        let (_, mem) = self.find_mut(id).unwrap();
        mem[off..off + data.len()].copy_from_slice(data);
    }

    pub fn put_header(&mut self, id: AreaId, header: &ImageHeader) {
        self.program(id, 0, &header.to_bytes());
    }

    pub fn fail_open(&mut self, id: AreaId) {
        self.fail_open.push(id);
    }

    pub fn fail_read(&mut self, id: AreaId) {
        self.fail_read.push(id);
    }

    pub fn fail_geometry(&mut self, id: AreaId) {
        self.fail_geometry.push(id);
    }

    pub fn opens(&self, id: AreaId) -> usize {
        self.events.iter().filter(|e| **e == Event::Open(id)).count()
    }

    pub fn closes(&self, id: AreaId) -> usize {
        self.events.iter().filter(|e| **e == Event::Close(id)).count()
    }

    /// True when every open was matched by exactly one close
    pub fn balanced(&self) -> bool {
        self.areas
            .iter()
            .all(|(a, _)| self.opens(a.id) == self.closes(a.id))
    }

    pub fn closes_in_order(&self) -> Vec<AreaId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Close(id) => Some(*id),
                Event::Open(_) => None,
            })
            .collect()
    }

    fn find(&self, id: AreaId) -> Result<&(MockArea, Vec<u8>)> {
        self.areas.iter().find(|(a, _)| a.id == id).ok_or(Error::FlashIo)
    }

    fn find_mut(&mut self, id: AreaId) -> Result<&mut (MockArea, Vec<u8>)> {
        self.areas
            .iter_mut()
            .find(|(a, _)| a.id == id)
            .ok_or(Error::FlashIo)
    }
}

impl FlashMap for MockFlash {
    fn open(&mut self, id: AreaId) -> Result<FlashArea> {
        if self.fail_open.contains(&id) {
            return Err(Error::FlashIo);
        }
        let (area, _) = self.find(id)?;
        let handle = FlashArea {
            id,
            device_id: 0,
            offset: area.offset,
            size: area.size(),
        };
        self.events.push(Event::Open(id));
        Ok(handle)
    }

    fn close(&mut self, area: &FlashArea) {
        self.events.push(Event::Close(area.id));
    }

    fn read(&mut self, area: &FlashArea, off: u32, buf: &mut [u8]) -> Result<()> {
        if self.fail_read.contains(&area.id) {
            return Err(Error::FlashIo);
        }
        let (_, mem) = self.find(area.id)?;
        let start = off as usize;
        let end = start + buf.len();
        if end > mem.len() {
            return Err(Error::FlashIo);
        }
        buf.copy_from_slice(&mem[start..end]);
        Ok(())
    }

    fn write(&mut self, area: &FlashArea, off: u32, data: &[u8]) -> Result<()> {
        let (_, mem) = self.find_mut(area.id)?;
        let start = off as usize;
        if start + data.len() > mem.len() {
            return Err(Error::FlashIo);
        }
        for (dst, src) in mem[start..].iter_mut().zip(data) {
            *dst &= *src;
        }
        Ok(())
    }

    fn erase(&mut self, area: &FlashArea, off: u32, len: u32) -> Result<()> {
        let (desc, mem) = self.find_mut(area.id)?;
        let erased = desc.erased;
        let start = off as usize;
        let end = start + len as usize;
        if end > mem.len() {
            return Err(Error::FlashIo);
        }
        mem[start..end].fill(erased);
        Ok(())
    }

    fn align(&self, area: &FlashArea) -> u8 {
        self.find(area.id).map(|(a, _)| a.align).unwrap_or(1)
    }

    fn erased_val(&self, area: &FlashArea) -> u8 {
        self.find(area.id).map(|(a, _)| a.erased).unwrap_or(0xFF)
    }

    fn sector_count(&mut self, area: &FlashArea) -> Result<usize> {
        if self.fail_geometry.contains(&area.id) {
            return Err(Error::FlashIo);
        }
        Ok(self.find(area.id)?.0.sectors.len())
    }

    fn sector(&mut self, area: &FlashArea, index: usize) -> Result<Sector> {
        self.find(area.id)?
            .0
            .sectors
            .get(index)
            .copied()
            .ok_or(Error::FlashIo)
    }
}

/// Validator accepting images whose first body byte matches `good_marker`
pub struct MarkerValidator {
    pub good_marker: u8,
    pub calls: usize,
}

impl MarkerValidator {
    pub fn new() -> Self {
        Self {
            good_marker: 0xA5,
            calls: 0,
        }
    }
}

impl ImageValidator for MarkerValidator {
    fn validate(&mut self, hdr: &ImageHeader, image: &mut dyn AreaReader, tmp: &mut [u8]) -> bool {
        self.calls += 1;
        let off = hdr.hdr_size as u32;
        let marker = &mut tmp[..1];
        image.read(off.max(IMAGE_HEADER_SIZE as u32), marker).is_ok() && marker[0] == self.good_marker
    }
}

/// In-memory key-value store with injectable failures
#[derive(Default)]
pub struct MockStore {
    pub entries: Vec<(u16, Vec<u8>)>,
    pub fail_init: bool,
    pub fail_read: bool,
    pub fail_write: bool,
    pub writes: usize,
}

impl KvStore for MockStore {
    fn init(&mut self) -> core::result::Result<(), StoreError> {
        if self.fail_init {
            return Err(StoreError::Io);
        }
        Ok(())
    }

    fn read(&mut self, key: u16, buf: &mut [u8]) -> core::result::Result<usize, StoreError> {
        if self.fail_read {
            return Err(StoreError::Io);
        }
        let (_, value) = self
            .entries
            .iter()
            .find(|(k, _)| *k == key)
            .ok_or(StoreError::NotFound)?;
        let len = value.len().min(buf.len());
        buf[..len].copy_from_slice(&value[..len]);
        Ok(value.len())
    }

    fn write(&mut self, key: u16, data: &[u8]) -> core::result::Result<(), StoreError> {
        if self.fail_write {
            return Err(StoreError::Io);
        }
        self.writes += 1;
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, data.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: u16) -> core::result::Result<(), StoreError> {
        self.entries.retain(|(k, _)| *k != key);
        Ok(())
    }
}
