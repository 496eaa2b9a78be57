//! Layout command implementations

use bankboot_core::layout::BoardLayout;

use super::format_size;

/// Show the board layout
pub fn cmd_show(layout: &BoardLayout, toml: bool) -> Result<(), Box<dyn std::error::Error>> {
    if toml {
        print!("{}", layout.to_toml_string());
    } else {
        print_layout(layout);
    }
    Ok(())
}

/// Print layout information
pub fn print_layout(layout: &BoardLayout) {
    let device = &layout.device;

    println!("Board Layout");
    println!("============");

    if let Some(name) = &device.name {
        println!("Name:        {}", name);
    }
    println!(
        "Flash:       {} bytes ({}) x {} device(s)",
        device.size,
        format_size(device.size),
        layout.device_count()
    );
    println!("Erase block: {}", format_size(device.erase_block));
    println!("Write align: {} bytes", device.write_align);
    println!("Erased:      0x{:02X}", device.erased_value);
    println!(
        "Features:    encrypted images {}, scratch area {}",
        if layout.caps.encrypted_images { "on" } else { "off" },
        if layout.caps.scratch_area { "on" } else { "off" }
    );
    if let Some(offset) = layout.storage_offset() {
        println!("Preference:  0x{:08X}", offset);
    }

    println!("\nAreas ({}):", layout.areas.len());
    println!(
        "{:<16} {:>4} {:>4} {:>10} {:>10} {:>10} {:>8}",
        "Name", "Id", "Dev", "Start", "End", "Size", "Sectors"
    );
    println!("{:-<68}", "");

    for area in &layout.areas {
        println!(
            "{:<16} {:>4} {:>4} {:#010X} {:#010X} {:>10} {:>8}",
            area.name,
            area.id.0,
            area.device_id,
            area.offset,
            area.end() - 1,
            format_size(area.size),
            area.sector_count()
        );
    }
}
