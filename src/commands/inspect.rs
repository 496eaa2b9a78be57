//! Slot inspection

use bankboot_core::image::SlotState;
use bankboot_core::layout::BoardLayout;
use bankboot_core::loader::SlotReport;
use bankboot_core::BootLoader;
use bankboot_sim::{HashValidator, MemStore};
use std::path::Path;

use super::{format_size, open_flash};

fn state_name(state: SlotState) -> &'static str {
    match state {
        SlotState::Unread => "not checked",
        SlotState::HeaderRead => "header read",
        SlotState::Unreadable => "unreadable",
        SlotState::NotBootable => "not bootable",
        SlotState::Corrupt => "CORRUPT",
        SlotState::Bootable => "bootable",
    }
}

fn print_slot(label: &str, report: Option<&SlotReport>, erased: u8) {
    println!("\n{}:", label);
    let Some(report) = report else {
        println!("  (not opened)");
        return;
    };

    println!(
        "  Area:      {} at 0x{:08X}, {} ({} sectors)",
        report.area.id,
        report.area.offset,
        format_size(report.area.size),
        report.sectors.len()
    );
    println!("  State:     {}", state_name(report.state));

    let Some(hdr) = &report.header else {
        return;
    };
    if hdr.magic_is_erased(erased) {
        println!("  Header:    (erased)");
        return;
    }
    if !hdr.has_valid_magic() {
        println!("  Header:    bad magic 0x{:08X}", hdr.magic);
        return;
    }
    println!("  Version:   {}", hdr.version);
    println!("  Body:      {} bytes at +0x{:X}", hdr.img_size, hdr.hdr_size);
    println!("  Prot TLVs: {} bytes", hdr.protect_tlv_size);
    println!("  Flags:     {:?}", hdr.flags);
    if hdr.load_addr != 0 {
        println!("  Load addr: 0x{:08X}", hdr.load_addr);
    }
}

/// Show headers, validation state and geometry of every slot
///
/// Uses a throwaway preference store: inspection never touches the stored
/// preference.
pub fn cmd_inspect(layout: BoardLayout, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = layout.boot_config();
    let erased = layout.device.erased_value;
    let flash = open_flash(layout, file)?;
    let mut loader = BootLoader::new(flash, HashValidator::new(), MemStore::new(), config);
    let report = loader.inspect()?;

    println!("Slot Inspection");
    println!("===============");
    println!("Write size:  {} bytes", report.write_sz);
    println!(
        "Banks:       {}",
        if report.compatible {
            "upgrade compatible"
        } else {
            "NOT upgrade compatible"
        }
    );

    print_slot("Slot 0", report.slots[0].as_ref(), erased);
    print_slot("Slot 1", report.slots[1].as_ref(), erased);
    if config.caps.scratch_area {
        print_slot("Scratch", report.scratch.as_ref(), erased);
    }
    Ok(())
}
