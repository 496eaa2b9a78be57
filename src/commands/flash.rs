//! Flash image file commands

use bankboot_core::flash::FlashMap;
use bankboot_core::layout::BoardLayout;
use bankboot_sim::SimFlash;
use std::fs;
use std::path::Path;

use super::{find_area, format_size, open_flash, save_flash};

/// Create an erased flash image file
pub fn cmd_init(layout: BoardLayout, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let devices = layout.device_count();
    let flash = SimFlash::new(layout);
    save_flash(&flash, file)?;
    println!(
        "Created {} ({} bytes, {} device(s))",
        file.display(),
        flash.data().len(),
        devices
    );
    Ok(())
}

/// Write an image into an area, erasing it first
pub fn cmd_write(
    layout: BoardLayout,
    file: &Path,
    area: &str,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let area = find_area(&layout, area)?.clone();
    let image = fs::read(input)?;
    if image.len() > area.size as usize {
        return Err(format!(
            "{} is {} bytes, area '{}' holds {}",
            input.display(),
            image.len(),
            area.name,
            format_size(area.size)
        )
        .into());
    }

    let mut flash = open_flash(layout, file)?;
    flash.load_image(area.id, &image)?;
    save_flash(&flash, file)?;

    println!(
        "Wrote {} bytes to area '{}' at 0x{:08X}",
        image.len(),
        area.name,
        area.offset
    );
    Ok(())
}

/// Erase an area
pub fn cmd_erase(
    layout: BoardLayout,
    file: &Path,
    area: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let area = find_area(&layout, area)?.clone();
    let mut flash = open_flash(layout, file)?;

    let handle = flash.open(area.id)?;
    let result = flash.erase(&handle, 0, handle.size);
    flash.close(&handle);
    result?;

    save_flash(&flash, file)?;
    println!("Erased area '{}' ({})", area.name, format_size(area.size));
    Ok(())
}
