//! Key-value stores for the slot preference
//!
//! [`MemStore`] keeps values in a map and is handy for tests. [`NvsStore`]
//! emulates the on-flash store that occupies the last two erase blocks of the
//! storage partition: an append-only log of records in one active sector,
//! compacted into the other sector when full.
//!
//! # On-flash format
//!
//! Each sector starts with an 8-byte header (`magic u32`, `sequence u32`,
//! little endian). Records follow back to back, each an 8-byte header
//! (`key u16`, `len u16`, `kind u8`, reserved `u8`, `check u16`) and `len`
//! data bytes padded to a multiple of 4. A record header whose bytes all
//! equal the erased value ends the log. The active sector is the one with a
//! valid header and the highest sequence number.

use std::collections::BTreeMap;

use bankboot_core::storage::{KvStore, StoreError};

/// In-memory store with injectable failures
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    entries: BTreeMap<u16, Vec<u8>>,
    fail_init: bool,
    fail_read: bool,
    fail_write: bool,
    writes: usize,
}

impl MemStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `init` fail
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Make `read` fail
    pub fn fail_read(mut self) -> Self {
        self.fail_read = true;
        self
    }

    /// Make `write` and `delete` fail
    pub fn fail_write(mut self) -> Self {
        self.fail_write = true;
        self
    }

    /// Raw value stored under `key`
    pub fn get_raw(&self, key: u16) -> Option<&[u8]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    /// Store a raw value, bypassing failure injection
    pub fn put_raw(&mut self, key: u16, value: &[u8]) {
        self.entries.insert(key, value.to_vec());
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl KvStore for MemStore {
    fn init(&mut self) -> Result<(), StoreError> {
        if self.fail_init {
            return Err(StoreError::Io);
        }
        Ok(())
    }

    fn read(&mut self, key: u16, buf: &mut [u8]) -> Result<usize, StoreError> {
        if self.fail_read {
            return Err(StoreError::Io);
        }
        let value = self.entries.get(&key).ok_or(StoreError::NotFound)?;
        let len = value.len().min(buf.len());
        buf[..len].copy_from_slice(&value[..len]);
        Ok(value.len())
    }

    fn write(&mut self, key: u16, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_write {
            return Err(StoreError::Io);
        }
        self.entries.insert(key, data.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, key: u16) -> Result<(), StoreError> {
        if self.fail_write {
            return Err(StoreError::Io);
        }
        self.entries.remove(&key);
        Ok(())
    }
}

const SECTOR_MAGIC: u32 = 0x3153_564E; // "NVS1"
const SECTOR_HDR_SIZE: usize = 8;
const RECORD_HDR_SIZE: usize = 8;
const RECORD_ALIGN: usize = 4;

const KIND_VALUE: u8 = 0x01;
const KIND_TOMBSTONE: u8 = 0x02;

fn padded(len: usize) -> usize {
    len.div_ceil(RECORD_ALIGN) * RECORD_ALIGN
}

/// Fletcher-16 over the record header fields and data
fn record_check(key: u16, kind: u8, data: &[u8]) -> u16 {
    let len = data.len() as u16;
    let mut a: u16 = 0;
    let mut b: u16 = 0;
    let fields = key
        .to_le_bytes()
        .into_iter()
        .chain(len.to_le_bytes())
        .chain([kind]);
    for byte in fields.chain(data.iter().copied()) {
        a = (a + byte as u16) % 255;
        b = (b + a) % 255;
    }
    (b << 8) | a
}

/// Log-structured key-value store over two erase blocks
pub struct NvsStore {
    data: Vec<u8>,
    sector_size: usize,
    erased: u8,
    active: usize,
    seq: u32,
    write_off: usize,
    /// key -> (data offset, length) in the active sector
    index: BTreeMap<u16, (usize, usize)>,
    mounted: bool,
}

impl NvsStore {
    /// Create an erased store of two sectors
    pub fn new(sector_size: usize, erased: u8) -> Self {
        Self::from_bytes(vec![erased; 2 * sector_size], erased)
    }

    /// Use existing storage contents (two sectors back to back)
    ///
    /// Nothing is interpreted until [`KvStore::init`] is called.
    pub fn from_bytes(data: Vec<u8>, erased: u8) -> Self {
        let sector_size = data.len() / 2;
        Self {
            data,
            sector_size,
            erased,
            active: 0,
            seq: 0,
            write_off: 0,
            index: BTreeMap::new(),
            mounted: false,
        }
    }

    /// Raw storage contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Largest value a record can hold
    pub fn max_value_len(&self) -> usize {
        self.sector_size - SECTOR_HDR_SIZE - RECORD_HDR_SIZE
    }

    /// Index of the active sector
    pub fn active_sector(&self) -> usize {
        self.active
    }

    fn sector(&self, n: usize) -> &[u8] {
        &self.data[n * self.sector_size..(n + 1) * self.sector_size]
    }

    fn sector_mut(&mut self, n: usize) -> &mut [u8] {
        let size = self.sector_size;
        &mut self.data[n * size..(n + 1) * size]
    }

    fn sector_seq(&self, n: usize) -> Option<u32> {
        let s = self.sector(n);
        let magic = u32::from_le_bytes([s[0], s[1], s[2], s[3]]);
        (magic == SECTOR_MAGIC).then(|| u32::from_le_bytes([s[4], s[5], s[6], s[7]]))
    }

    fn format(&mut self, n: usize, seq: u32) {
        let erased = self.erased;
        let sector = self.sector_mut(n);
        sector.fill(erased);
        sector[..4].copy_from_slice(&SECTOR_MAGIC.to_le_bytes());
        sector[4..8].copy_from_slice(&seq.to_le_bytes());
    }

    /// Replay the log of the active sector into the index
    fn scan(&mut self) {
        let sector = self.sector(self.active);
        let mut off = SECTOR_HDR_SIZE;
        let mut index = BTreeMap::new();

        let end = loop {
            if off + RECORD_HDR_SIZE > sector.len() {
                break sector.len();
            }
            let hdr = &sector[off..off + RECORD_HDR_SIZE];
            if hdr.iter().all(|&b| b == self.erased) {
                break off;
            }

            let key = u16::from_le_bytes([hdr[0], hdr[1]]);
            let len = u16::from_le_bytes([hdr[2], hdr[3]]) as usize;
            let kind = hdr[4];
            let check = u16::from_le_bytes([hdr[6], hdr[7]]);
            let data_off = off + RECORD_HDR_SIZE;
            let next = data_off + padded(len);
            if next > sector.len() || record_check(key, kind, &sector[data_off..data_off + len]) != check
            {
                // Torn write: nothing after this point can be trusted.
                log::warn!("Storage: damaged record at 0x{:x}, sector needs compaction", off);
                break sector.len();
            }

            match kind {
                KIND_VALUE => {
                    index.insert(key, (data_off, len));
                }
                KIND_TOMBSTONE => {
                    index.remove(&key);
                }
                _ => log::warn!("Storage: unknown record kind {} for key 0x{:04x}", kind, key),
            }
            off = next;
        };

        self.index = index;
        self.write_off = end;
    }

    fn append(&mut self, key: u16, kind: u8, data: &[u8]) -> Result<(), StoreError> {
        let total = RECORD_HDR_SIZE + padded(data.len());
        if self.write_off + total > self.sector_size {
            self.compact()?;
            if self.write_off + total > self.sector_size {
                log::error!("Storage: no room for key 0x{:04x}", key);
                return Err(StoreError::Io);
            }
        }

        let off = self.write_off;
        let check = record_check(key, kind, data);
        let erased = self.erased;
        let active = self.active;
        let sector = self.sector_mut(active);
        sector[off..off + 2].copy_from_slice(&key.to_le_bytes());
        sector[off + 2..off + 4].copy_from_slice(&(data.len() as u16).to_le_bytes());
        sector[off + 4] = kind;
        sector[off + 5] = 0;
        sector[off + 6..off + 8].copy_from_slice(&check.to_le_bytes());
        let data_off = off + RECORD_HDR_SIZE;
        sector[data_off..data_off + data.len()].copy_from_slice(data);
        sector[data_off + data.len()..off + total].fill(erased);

        match kind {
            KIND_VALUE => {
                self.index.insert(key, (data_off, data.len()));
            }
            _ => {
                self.index.remove(&key);
            }
        }
        self.write_off = off + total;
        Ok(())
    }

    /// Copy live values into the other sector and make it active
    fn compact(&mut self) -> Result<(), StoreError> {
        let live: Vec<(u16, Vec<u8>)> = self
            .index
            .iter()
            .map(|(&key, &(off, len))| (key, self.sector(self.active)[off..off + len].to_vec()))
            .collect();

        let target = 1 - self.active;
        let seq = self.seq.wrapping_add(1);
        log::debug!(
            "Storage: compacting {} values into sector {} (seq {})",
            live.len(),
            target,
            seq
        );

        self.format(target, seq);
        self.active = target;
        self.seq = seq;
        self.index.clear();
        self.write_off = SECTOR_HDR_SIZE;
        for (key, value) in live {
            self.append(key, KIND_VALUE, &value)?;
        }

        // The old sector is erased only once the new one holds everything.
        let erased = self.erased;
        self.sector_mut(1 - target).fill(erased);
        Ok(())
    }
}

impl KvStore for NvsStore {
    fn init(&mut self) -> Result<(), StoreError> {
        if self.sector_size < SECTOR_HDR_SIZE + RECORD_HDR_SIZE || self.data.len() % 2 != 0 {
            return Err(StoreError::Io);
        }

        let active = match (self.sector_seq(0), self.sector_seq(1)) {
            (Some(a), Some(b)) => Some(if b > a { (1, b) } else { (0, a) }),
            (Some(a), None) => Some((0, a)),
            (None, Some(b)) => Some((1, b)),
            (None, None) => None,
        };

        match active {
            Some((n, seq)) => {
                self.active = n;
                self.seq = seq;
            }
            None => {
                log::info!("Storage: no valid sector, formatting");
                let erased = self.erased;
                self.data.fill(erased);
                self.format(0, 1);
                self.active = 0;
                self.seq = 1;
            }
        }

        self.scan();
        self.mounted = true;
        log::debug!(
            "Storage: sector {} active, {} keys, {} bytes used",
            self.active,
            self.index.len(),
            self.write_off
        );
        Ok(())
    }

    fn read(&mut self, key: u16, buf: &mut [u8]) -> Result<usize, StoreError> {
        if !self.mounted {
            return Err(StoreError::Io);
        }
        let &(off, len) = self.index.get(&key).ok_or(StoreError::NotFound)?;
        let sector = self.sector(self.active);
        let n = len.min(buf.len());
        buf[..n].copy_from_slice(&sector[off..off + n]);
        Ok(len)
    }

    fn write(&mut self, key: u16, data: &[u8]) -> Result<(), StoreError> {
        if !self.mounted {
            return Err(StoreError::Io);
        }
        if data.len() > self.max_value_len() || data.len() > u16::MAX as usize {
            return Err(StoreError::Io);
        }
        self.append(key, KIND_VALUE, data)
    }

    fn delete(&mut self, key: u16) -> Result<(), StoreError> {
        if !self.mounted {
            return Err(StoreError::Io);
        }
        if !self.index.contains_key(&key) {
            return Ok(());
        }
        self.append(key, KIND_TOMBSTONE, &[])
    }
}
