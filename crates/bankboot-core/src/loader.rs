//! Boot decision engine
//!
//! [`BootLoader::boot_go`] turns the contents of both image banks and the
//! stored bank preference into exactly one [`BootResponse`], or an error
//! that the caller must treat as fatal. [`BootLoader::boot_or_halt`] and
//! [`BootLoader::run`] do that conversion at the boundary.
//!
//! All per-attempt state lives in a `BootState` that borrows the flash map
//! for the duration of one attempt. Dropping it closes every area it opened,
//! scratch first and then the image banks in reverse order, so the close
//! discipline holds on every return path.

use crate::config::{AreaMap, BootConfig, Capabilities};
use crate::control::{select_mode, BootMode, ControlReader};
use crate::error::{Error, Result};
use crate::flash::{AreaView, FlashArea, FlashMap};
use crate::geometry::{self, SectorTable};
use crate::halt::Halt;
use crate::image::{
    validate_slot, ImageHeader, ImageValidator, KeyManager, NoKeyManager, SlotState,
    IMAGE_HEADER_SIZE,
};
use crate::storage::{
    KvStore, PreferenceOrigin, PreferenceRecord, PreferenceStore, StorageKey, StoreError,
};

/// Number of image banks
pub const BOOT_NUM_SLOTS: usize = 2;

/// Bank 0
pub const BOOT_PRIMARY_SLOT: usize = 0;

/// Bank 1
pub const BOOT_SECONDARY_SLOT: usize = 1;

/// Hand-off descriptor for the image to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootResponse {
    /// Flash device holding the image
    pub flash_dev_id: u8,
    /// Byte offset of the image within its device
    pub image_off: u32,
    /// Validated image header
    pub header: ImageHeader,
    /// Chosen slot: a bank index, or [`BOOT_NUM_SLOTS`] for the scratch area
    pub slot: usize,
}

/// One slot of a boot attempt
#[derive(Debug, Clone)]
pub(crate) struct ImageSlot {
    pub(crate) area: Option<FlashArea>,
    pub(crate) header: Option<ImageHeader>,
    pub(crate) sectors: SectorTable,
    pub(crate) state: SlotState,
}

impl ImageSlot {
    const fn new() -> Self {
        Self {
            area: None,
            header: None,
            sectors: SectorTable::new(),
            state: SlotState::Unread,
        }
    }

    /// Hand-off descriptor for this slot
    pub(crate) fn response(&self, slot: usize) -> Result<BootResponse> {
        let (Some(area), Some(header)) = (self.area, self.header) else {
            return Err(Error::BadImage);
        };
        Ok(BootResponse {
            flash_dev_id: area.device_id,
            image_off: area.offset,
            header,
            slot,
        })
    }
}

/// State of a single boot attempt
pub(crate) struct BootState<'f, F: FlashMap + ?Sized> {
    pub(crate) flash: &'f mut F,
    pub(crate) slots: [ImageSlot; BOOT_NUM_SLOTS],
    pub(crate) scratch: ImageSlot,
    pub(crate) write_sz: u8,
    pub(crate) compatible: bool,
}

impl<'f, F: FlashMap + ?Sized> BootState<'f, F> {
    pub(crate) fn new(flash: &'f mut F) -> Self {
        Self {
            flash,
            slots: [ImageSlot::new(), ImageSlot::new()],
            scratch: ImageSlot::new(),
            write_sz: 1,
            compatible: false,
        }
    }

    /// Open both image banks and, if requested, the scratch area
    pub(crate) fn open(&mut self, areas: &AreaMap, with_scratch: bool) -> Result<()> {
        for (slot, s) in self.slots.iter_mut().enumerate() {
            let id = areas.image(slot);
            let area = self.flash.open(id).map_err(|e| {
                log::error!("Failed to open image area {} (slot {})", id, slot);
                e
            })?;
            s.area = Some(area);
        }

        if with_scratch {
            let area = self.flash.open(areas.scratch).map_err(|e| {
                log::error!("Failed to open scratch area {}", areas.scratch);
                e
            })?;
            self.scratch.area = Some(area);
        }
        Ok(())
    }

    /// Resolve the sector layout of every opened area and the write size
    pub(crate) fn read_sectors(&mut self) -> Result<()> {
        for s in self.slots.iter_mut().chain(core::iter::once(&mut self.scratch)) {
            if let Some(area) = s.area {
                s.sectors = geometry::resolve(&mut *self.flash, &area)?;
            }
        }

        let flash = &*self.flash;
        self.write_sz = geometry::write_size(
            self.slots
                .iter()
                .chain(core::iter::once(&self.scratch))
                .filter_map(|s| s.area.as_ref())
                .map(|area| flash.align(area)),
        );
        log::debug!("Write size: {}", self.write_sz);

        self.compatible = geometry::slots_compatible(
            &self.slots[BOOT_PRIMARY_SLOT].sectors,
            &self.slots[BOOT_SECONDARY_SLOT].sectors,
        );
        if self.compatible {
            log::debug!("Image banks are upgrade compatible");
        }
        Ok(())
    }

    /// Read the header of `slot`, returning whether it could be read
    pub(crate) fn read_header(&mut self, slot: usize) -> bool {
        let s = &mut self.slots[slot];
        Self::read_header_into(&mut *self.flash, s, slot)
    }

    /// Read the header of the scratch area
    pub(crate) fn read_scratch_header(&mut self) -> bool {
        Self::read_header_into(&mut *self.flash, &mut self.scratch, BOOT_NUM_SLOTS)
    }

    fn read_header_into(flash: &mut F, s: &mut ImageSlot, slot: usize) -> bool {
        let Some(area) = s.area else {
            return false;
        };

        let mut raw = [0u8; IMAGE_HEADER_SIZE];
        let header = flash
            .read(&area, 0, &mut raw)
            .and_then(|()| ImageHeader::parse(&raw));
        match header {
            Ok(hdr) => {
                s.header = Some(hdr);
                s.state = SlotState::HeaderRead;
                true
            }
            Err(e) => {
                log::error!("Failed reading image header from slot {}: {}", slot, e);
                s.state = SlotState::Unreadable;
                false
            }
        }
    }

    /// Judge `slot`; a slot without a header stays `Unreadable`
    pub(crate) fn validate<V, K>(
        &mut self,
        slot: usize,
        caps: &Capabilities,
        validator: &mut V,
        keys: &mut K,
    ) where
        V: ImageValidator + ?Sized,
        K: KeyManager + ?Sized,
    {
        let s = &mut self.slots[slot];
        let (Some(area), Some(hdr)) = (s.area, s.header) else {
            return;
        };

        let erased = self.flash.erased_val(&area);
        let mut view = AreaView::new(&mut *self.flash, area);
        s.state = validate_slot(slot, &hdr, &mut view, erased, caps, validator, keys);
    }

    pub(crate) fn states(&self) -> [SlotState; BOOT_NUM_SLOTS] {
        [self.slots[0].state, self.slots[1].state]
    }
}

impl<F: FlashMap + ?Sized> Drop for BootState<'_, F> {
    fn drop(&mut self) {
        if let Some(area) = self.scratch.area.take() {
            self.flash.close(&area);
        }
        for s in self.slots.iter_mut().rev() {
            if let Some(area) = s.area.take() {
                self.flash.close(&area);
            }
        }
    }
}

/// Pick the bank to boot given the stored preference
///
/// The preferred bank is taken if it is bootable. An operator's choice is
/// binding; a bootstrap default may fall back to the other bank.
pub fn select_slot(
    record: &PreferenceRecord,
    states: &[SlotState; BOOT_NUM_SLOTS],
) -> Option<usize> {
    let preferred = record.preferred_slot();
    if states[preferred].is_usable() {
        return Some(preferred);
    }

    match record.origin {
        PreferenceOrigin::Operator => None,
        PreferenceOrigin::Default => {
            let other = BOOT_NUM_SLOTS - 1 - preferred;
            states[other].is_usable().then_some(other)
        }
    }
}

/// Report on one bank produced by [`BootLoader::inspect`]
#[derive(Debug, Clone)]
pub struct SlotReport {
    /// Opened area
    pub area: FlashArea,
    /// Header, if it could be read
    pub header: Option<ImageHeader>,
    /// Validation outcome
    pub state: SlotState,
    /// Sector layout
    pub sectors: SectorTable,
}

/// Result of [`BootLoader::inspect`]
#[derive(Debug, Clone)]
pub struct Inspection {
    /// Both image banks
    pub slots: [Option<SlotReport>; BOOT_NUM_SLOTS],
    /// Scratch area, if the board has one
    pub scratch: Option<SlotReport>,
    /// Common write size of all areas
    pub write_sz: u8,
    /// Whether the banks could be swapped sector by sector
    pub compatible: bool,
}

/// Boot loader context
///
/// Owns the collaborators of a boot attempt: flash map, integrity
/// validator, preference store engine and key manager.
pub struct BootLoader<F, V, S, K = NoKeyManager> {
    flash: F,
    validator: V,
    prefs: PreferenceStore<S>,
    keys: K,
    config: BootConfig,
}

impl<F, V, S> BootLoader<F, V, S, NoKeyManager>
where
    F: FlashMap,
    V: ImageValidator,
    S: KvStore,
{
    /// Create a boot loader without encrypted image support
    pub fn new(flash: F, validator: V, store: S, config: BootConfig) -> Self {
        Self {
            flash,
            validator,
            prefs: PreferenceStore::new(store),
            keys: NoKeyManager,
            config,
        }
    }
}

impl<F, V, S, K> BootLoader<F, V, S, K>
where
    F: FlashMap,
    V: ImageValidator,
    S: KvStore,
    K: KeyManager,
{
    /// Replace the key manager
    pub fn with_key_manager<K2: KeyManager>(self, keys: K2) -> BootLoader<F, V, S, K2> {
        BootLoader {
            flash: self.flash,
            validator: self.validator,
            prefs: self.prefs,
            keys,
            config: self.config,
        }
    }

    /// Get the board configuration
    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Get a reference to the flash map
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Get a mutable reference to the flash map
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Get a reference to the integrity validator
    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// Get a reference to the preference store
    pub fn preferences(&self) -> &PreferenceStore<S> {
        &self.prefs
    }

    /// Get a mutable reference to the preference store
    pub fn preferences_mut(&mut self) -> &mut PreferenceStore<S> {
        &mut self.prefs
    }

    /// Tear the boot loader apart into its collaborators
    pub fn into_parts(self) -> (F, V, S, K) {
        (self.flash, self.validator, self.prefs.into_inner(), self.keys)
    }

    /// Run one normal boot attempt
    ///
    /// # Errors
    /// * `FlashIo` - An area could not be opened or described
    /// * `Geometry` - An area has too many sectors
    /// * `BadImage` - No header could be read, or no bootable bank matches
    ///   the stored preference
    /// * `BadStatus` - No bank is bootable, or the preference is unreadable
    ///   and bank 1 is not bootable
    pub fn boot_go(&mut self) -> Result<BootResponse> {
        let caps = self.config.caps;
        let mut state = BootState::new(&mut self.flash);
        state.open(&self.config.areas, caps.scratch_area)?;
        state.read_sectors()?;

        let mut headers = 0;
        for slot in 0..BOOT_NUM_SLOTS {
            if state.read_header(slot) {
                headers += 1;
            }
        }
        if headers == 0 {
            log::error!("Failed reading image headers of both banks");
            return Err(Error::BadImage);
        }

        for slot in 0..BOOT_NUM_SLOTS {
            state.validate(slot, &caps, &mut self.validator, &mut self.keys);
        }

        let states = state.states();
        if !states.iter().any(|s| s.is_usable()) {
            log::error!(
                "No bootable image: slot 0 {:?}, slot 1 {:?}",
                states[0],
                states[1]
            );
            return Err(Error::BadStatus);
        }

        let slot = match load_preference(&mut self.prefs) {
            Ok(record) => {
                log::info!(
                    "Preferred bank: {} ({:?})",
                    record.preferred_bank,
                    record.origin
                );
                select_slot(&record, &states).ok_or_else(|| {
                    log::error!(
                        "No bootable image matches preferred bank {}",
                        record.preferred_bank
                    );
                    Error::BadImage
                })?
            }
            Err(e) => {
                log::warn!("Slot preference unavailable ({}), trying slot 1", e);
                let fallback = PreferenceRecord::operator(BOOT_SECONDARY_SLOT as u8);
                select_slot(&fallback, &states).ok_or_else(|| {
                    log::error!("Slot 1 is not bootable and no preference is stored");
                    Error::BadStatus
                })?
            }
        };

        let chosen = &state.slots[slot];
        if !chosen.header.is_some_and(|h| h.has_valid_magic()) {
            log::error!("Bad image magic in slot {}", slot);
            return Err(Error::BadImage);
        }

        let rsp = chosen.response(slot)?;
        log::info!(
            "Booting slot {} at 0x{:08x} (version {})",
            slot,
            rsp.image_off,
            rsp.header.version
        );
        Ok(rsp)
    }

    /// Run one recovery boot attempt from the scratch area
    ///
    /// See [`crate::recovery`].
    pub fn recovery_go(&mut self) -> Result<BootResponse> {
        crate::recovery::recovery_go(&mut self.flash, &self.config)
    }

    /// Report geometry and validation state of every area
    ///
    /// Does not touch the preference store.
    pub fn inspect(&mut self) -> Result<Inspection> {
        let caps = self.config.caps;
        let mut state = BootState::new(&mut self.flash);
        state.open(&self.config.areas, caps.scratch_area)?;
        state.read_sectors()?;

        for slot in 0..BOOT_NUM_SLOTS {
            if state.read_header(slot) {
                state.validate(slot, &caps, &mut self.validator, &mut self.keys);
            }
        }
        state.read_scratch_header();

        let report = |s: &ImageSlot| {
            s.area.map(|area| SlotReport {
                area,
                header: s.header,
                state: s.state,
                sectors: s.sectors.clone(),
            })
        };
        Ok(Inspection {
            slots: [report(&state.slots[0]), report(&state.slots[1])],
            scratch: report(&state.scratch),
            write_sz: state.write_sz,
            compatible: state.compatible,
        })
    }

    /// Run a normal boot attempt, halting on failure
    pub fn boot_or_halt<H: Halt + ?Sized>(&mut self, halt: &mut H) -> BootResponse {
        match self.boot_go() {
            Ok(rsp) => rsp,
            Err(e) => fail(e, halt),
        }
    }

    /// Read the boot mode control and run the matching boot attempt
    ///
    /// Never returns without a hand-off: any failure ends in `halt`.
    pub fn run<C, H>(&mut self, control: &mut C, halt: &mut H) -> BootResponse
    where
        C: ControlReader + ?Sized,
        H: Halt + ?Sized,
    {
        let result = match select_mode(control) {
            BootMode::Normal => self.boot_go(),
            BootMode::Recovery => self.recovery_go(),
        };
        match result {
            Ok(rsp) => rsp,
            Err(e) => fail(e, halt),
        }
    }
}

fn fail<H: Halt + ?Sized>(err: Error, halt: &mut H) -> ! {
    log::error!("Unable to find bootable image: {}", err);
    log::error!("Panic...");
    halt.halt(err)
}

/// Read the preference, bootstrapping it on first boot
fn load_preference<S: KvStore>(
    prefs: &mut PreferenceStore<S>,
) -> core::result::Result<PreferenceRecord, StoreError> {
    prefs.init()?;
    match prefs.get(StorageKey::SlotPreference) {
        Err(StoreError::NotFound) => {
            log::info!("No slot preference stored, defaulting to slot 1");
            prefs.set(StorageKey::SlotPreference, &PreferenceRecord::bootstrap())?;
            prefs.get(StorageKey::SlotPreference)
        }
        other => other,
    }
}
