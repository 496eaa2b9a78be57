//! CLI command implementations
//!
//! Every command works on a flash image file: a byte-for-byte copy of the
//! flash devices described by the board layout, laid out back to back. Commands load the file into
//! a [`SimFlash`], act on it through the bootloader core, and write it back
//! when they changed something.
//!
//! The slot preference lives in the last two erase blocks of the storage
//! area and is handled by an [`NvsStore`] over a copy of those bytes.

pub mod boot;
pub mod flash;
pub mod image;
pub mod inspect;
pub mod layout;
pub mod prefs;

use bankboot_core::flash::AreaId;
use bankboot_core::layout::{AreaLayout, BoardLayout};
use bankboot_sim::{NvsStore, SimFlash};
use std::fs;
use std::path::Path;

/// Load the board layout, falling back to the demo board
pub fn load_board(path: Option<&Path>) -> Result<BoardLayout, Box<dyn std::error::Error>> {
    let layout = match path {
        Some(path) => {
            log::debug!("Loading board layout from {}", path.display());
            BoardLayout::from_toml_file(path)?
        }
        None => bankboot_sim::demo_layout()?,
    };
    Ok(layout)
}

/// Look up an area by name or numeric id
pub fn find_area<'a>(
    layout: &'a BoardLayout,
    name: &str,
) -> Result<&'a AreaLayout, Box<dyn std::error::Error>> {
    let area = match name.parse::<u8>() {
        Ok(id) => layout.area(AreaId(id)),
        Err(_) => layout.area_by_name(name),
    };
    area.ok_or_else(|| format!("No area '{}' in layout", name).into())
}

/// Load a flash image file
///
/// The file must be exactly as large as the board's flash.
pub fn open_flash(
    layout: BoardLayout,
    file: &Path,
) -> Result<SimFlash, Box<dyn std::error::Error>> {
    let data = fs::read(file)?;
    if data.len() as u64 != layout.flash_size() {
        return Err(format!(
            "{} is {} bytes, expected {} bytes for this board",
            file.display(),
            data.len(),
            layout.flash_size()
        )
        .into());
    }
    Ok(SimFlash::with_data(layout, &data))
}

/// Write the flash contents back to the image file
pub fn save_flash(flash: &SimFlash, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::write(file, flash.data())?;
    log::debug!("Wrote {} bytes to {}", flash.data().len(), file.display());
    Ok(())
}

/// Byte range of the preference store in the flash image file
fn storage_range(layout: &BoardLayout) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let missing = "Board has no storage area for the slot preference";
    let area = layout.area(AreaId::STORAGE).ok_or(missing)?;
    let offset = layout.storage_offset().ok_or(missing)?;
    let device_base = layout.flash_offset(area) - area.offset as u64;
    let len = 2 * layout.device.erase_block as usize;
    Ok(((device_base + offset as u64) as usize, len))
}

/// Take a copy of the preference store out of the flash contents
pub fn load_store(flash: &SimFlash) -> Result<NvsStore, Box<dyn std::error::Error>> {
    let (offset, len) = storage_range(flash.layout())?;
    let bytes = flash.data()[offset..offset + len].to_vec();
    Ok(NvsStore::from_bytes(bytes, flash.layout().device.erased_value))
}

/// Put the preference store back into the flash contents
pub fn store_back(flash: &mut SimFlash, store: &NvsStore) -> Result<(), Box<dyn std::error::Error>> {
    let (offset, len) = storage_range(flash.layout())?;
    flash.data_mut()[offset..offset + len].copy_from_slice(store.as_bytes());
    Ok(())
}

/// Format a byte size as a human-readable string
pub fn format_size(size: u32) -> String {
    bankboot_core::layout::format_size(size)
}
