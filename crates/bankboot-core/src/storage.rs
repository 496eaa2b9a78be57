//! Slot preference persistence
//!
//! The operator's preferred bank lives in a non-volatile key-value store
//! occupying the last two erase blocks of the storage partition. The store
//! engine itself is a collaborator ([`KvStore`]); [`PreferenceStore`] is the
//! thin façade the decision engine uses.

use core::fmt;

use crate::error::Error;

/// Number of erase blocks reserved for the key-value store
pub const STORAGE_SECTOR_COUNT: u32 = 2;

/// Size of an encoded [`PreferenceRecord`]
pub const PREFERENCE_RECORD_SIZE: usize = 8;

/// Fixed key ids of the storage partition
///
/// Only [`StorageKey::SlotPreference`] is used by the bootloader; the other
/// ids are reserved for device provisioning data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StorageKey {
    /// Device id
    Id = 0xFFFF,
    /// Device UUID
    Uuid = 0xFFFE,
    /// Cloud token
    Token = 0xFFFD,
    /// Preferred boot bank
    SlotPreference = 0xFFFA,
}

impl StorageKey {
    /// Numeric key id
    pub const fn id(self) -> u16 {
        self as u16
    }
}

/// Key-value store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// No value stored under the key
    NotFound,
    /// Key not handled by this store
    InvalidKey,
    /// Underlying flash access failed
    Io,
    /// Stored value is malformed
    Corrupt,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::Io => write!(f, "storage I/O error"),
            Self::Corrupt => write!(f, "stored value is corrupt"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StoreError {}

impl From<StoreError> for Error {
    fn from(_: StoreError) -> Self {
        Error::BadStatus
    }
}

/// Non-volatile key-value store engine
pub trait KvStore {
    /// Mount the store without clearing stored values
    fn init(&mut self) -> Result<(), StoreError>;

    /// Read the value of `key` into `buf`, returning the stored length
    fn read(&mut self, key: u16, buf: &mut [u8]) -> Result<usize, StoreError>;

    /// Store `data` under `key`, replacing any previous value
    fn write(&mut self, key: u16, data: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`
    fn delete(&mut self, key: u16) -> Result<(), StoreError>;
}

/// Who chose the stored preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceOrigin {
    /// Set explicitly by the operator
    Operator,
    /// Written by the bootloader on first boot
    Default,
}

/// Persisted bank preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceRecord {
    /// 0 prefers bank 0, any other value prefers bank 1
    pub preferred_bank: u8,
    /// Who wrote the record
    pub origin: PreferenceOrigin,
}

impl PreferenceRecord {
    /// Bank used when nothing has been stored yet
    pub const DEFAULT_BANK: u8 = 1;

    /// Record chosen by the operator
    pub fn operator(bank: u8) -> Self {
        Self {
            preferred_bank: bank,
            origin: PreferenceOrigin::Operator,
        }
    }

    /// First-boot record
    pub fn bootstrap() -> Self {
        Self {
            preferred_bank: Self::DEFAULT_BANK,
            origin: PreferenceOrigin::Default,
        }
    }

    /// Preferred slot index (0 or 1)
    pub fn preferred_slot(&self) -> usize {
        if self.preferred_bank == 0 {
            0
        } else {
            1
        }
    }

    /// Encode: bank byte, origin byte, six reserved bytes
    pub fn to_bytes(&self) -> [u8; PREFERENCE_RECORD_SIZE] {
        let mut out = [0u8; PREFERENCE_RECORD_SIZE];
        out[0] = self.preferred_bank;
        out[1] = match self.origin {
            PreferenceOrigin::Operator => 0,
            PreferenceOrigin::Default => 1,
        };
        out
    }

    /// Decode a stored record
    pub fn from_bytes(bytes: &[u8; PREFERENCE_RECORD_SIZE]) -> Result<Self, StoreError> {
        let origin = match bytes[1] {
            0 => PreferenceOrigin::Operator,
            1 => PreferenceOrigin::Default,
            _ => return Err(StoreError::Corrupt),
        };
        Ok(Self {
            preferred_bank: bytes[0],
            origin,
        })
    }
}

/// Offset of the key-value store within the storage partition's device
///
/// The store takes the last [`STORAGE_SECTOR_COUNT`] erase blocks of the
/// partition. Returns `None` if the partition is smaller than that.
pub fn storage_offset(area_offset: u32, area_size: u32, erase_block: u32) -> Option<u32> {
    let end = area_offset.checked_add(area_size)?;
    let reserved = erase_block.checked_mul(STORAGE_SECTOR_COUNT)?;
    let offset = end.checked_sub(reserved)?;
    (offset >= area_offset).then_some(offset)
}

/// Wrapper around a [`KvStore`] holding the slot preference
pub struct PreferenceStore<S> {
    store: S,
}

impl<S: KvStore> PreferenceStore<S> {
    /// Wrap a store engine
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Mount the underlying store
    pub fn init(&mut self) -> Result<(), StoreError> {
        self.store.init()
    }

    /// Read the record stored under `key`
    ///
    /// # Errors
    /// * `InvalidKey` - `key` is not [`StorageKey::SlotPreference`]
    /// * `NotFound` - Nothing stored yet
    /// * `Corrupt` - Stored length or content does not form a record
    pub fn get(&mut self, key: StorageKey) -> Result<PreferenceRecord, StoreError> {
        if key != StorageKey::SlotPreference {
            return Err(StoreError::InvalidKey);
        }

        let mut buf = [0u8; PREFERENCE_RECORD_SIZE];
        let len = self.store.read(key.id(), &mut buf)?;
        if len != PREFERENCE_RECORD_SIZE {
            return Err(StoreError::Corrupt);
        }
        PreferenceRecord::from_bytes(&buf)
    }

    /// Store `record` under `key`
    pub fn set(&mut self, key: StorageKey, record: &PreferenceRecord) -> Result<(), StoreError> {
        if key != StorageKey::SlotPreference {
            return Err(StoreError::InvalidKey);
        }
        self.store.write(key.id(), &record.to_bytes())
    }

    /// Forget the stored preference
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.store.delete(StorageKey::SlotPreference.id())
    }

    /// Get a reference to the store engine
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a mutable reference to the store engine
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Unwrap the store engine
    pub fn into_inner(self) -> S {
        self.store
    }
}
