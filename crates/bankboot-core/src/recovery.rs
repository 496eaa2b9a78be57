//! Recovery boot from the scratch area
//!
//! When the boot mode control is active, the scratch area holds a
//! provisioning / configuration image that is booted on its header magic
//! alone. Neither the integrity validator nor the preference store is
//! consulted on this path.

use crate::config::BootConfig;
use crate::error::{Error, Result};
use crate::flash::FlashMap;
use crate::loader::{BootResponse, BootState, BOOT_NUM_SLOTS};

/// Select the scratch area for booting
///
/// Opens and resolves both image banks and the scratch area, reads all three
/// headers and hands off to the scratch area if its magic is valid. Every
/// opened area is closed before returning.
///
/// # Errors
/// * `Geometry` - The board has no scratch area, or an area has too many
///   sectors
/// * `FlashIo` - An area could not be opened, or the scratch header could
///   not be read
/// * `BadImage` - The scratch header magic is wrong
pub fn recovery_go<F: FlashMap + ?Sized>(flash: &mut F, config: &BootConfig) -> Result<BootResponse> {
    if !config.caps.scratch_area {
        log::error!("Recovery boot requested but the board has no scratch area");
        return Err(Error::Geometry);
    }

    let mut state = BootState::new(flash);
    state.open(&config.areas, true)?;
    state.read_sectors()?;

    // Bank headers are read for the log only.
    for slot in 0..BOOT_NUM_SLOTS {
        if state.read_header(slot) {
            if let Some(hdr) = state.slots[slot].header {
                log::debug!("Slot {}: magic 0x{:08x}", slot, hdr.magic);
            }
        }
    }

    if !state.read_scratch_header() {
        return Err(Error::FlashIo);
    }

    if !state.scratch.header.is_some_and(|h| h.has_valid_magic()) {
        log::error!("bad image magic in scratch area {}", config.areas.scratch);
        return Err(Error::BadImage);
    }

    let rsp = state.scratch.response(BOOT_NUM_SLOTS)?;
    log::info!(
        "Recovery boot from scratch area at 0x{:08x} (version {})",
        rsp.image_off,
        rsp.header.version
    );
    Ok(rsp)
}
