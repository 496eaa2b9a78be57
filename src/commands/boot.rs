//! Boot attempt command

use bankboot_core::error::Error;
use bankboot_core::halt::Halt;
use bankboot_core::image::{KeyManager, KeyMaterial};
use bankboot_core::layout::BoardLayout;
use bankboot_core::loader::BOOT_NUM_SLOTS;
use bankboot_core::{BootLoader, BootResponse};
use bankboot_sim::{FixedControl, HashValidator, NvsStore, SimFlash, TlvKeyManager};
use std::path::Path;

use super::{load_store, open_flash, save_flash, store_back};

type Loader<K> = BootLoader<SimFlash, HashValidator, NvsStore, K>;

/// Halt that ends the process
///
/// The failure has already been logged by the boot loader.
pub struct ExitHalt;

impl Halt for ExitHalt {
    fn halt(&mut self, err: Error) -> ! {
        eprintln!("Boot halted: {}", err);
        std::process::exit(2)
    }
}

/// Options for [`cmd_boot`]
#[derive(Debug, Default)]
pub struct BootOptions {
    /// Request the recovery image
    pub recovery: bool,
    /// GPIO control options (`key=value,...`)
    pub gpio: Option<String>,
    /// Key-encryption key for encrypted images
    pub kek: Option<[u8; 16]>,
}

/// Run one boot attempt and report the hand-off
///
/// A first boot stores the default preference, which is written back to
/// the flash image file.
pub fn cmd_boot(
    layout: BoardLayout,
    file: &Path,
    opts: BootOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = layout.boot_config();
    let flash = open_flash(layout, file)?;
    let store = load_store(&flash)?;
    let loader = BootLoader::new(flash, HashValidator::new(), store, config);

    match opts.kek {
        Some(kek) => {
            let keys = TlvKeyManager::new(KeyMaterial::new(kek));
            attempt(loader.with_key_manager(keys), &opts, file)
        }
        None => attempt(loader, &opts, file),
    }
}

fn attempt<K: KeyManager>(
    mut loader: Loader<K>,
    opts: &BootOptions,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let rsp = match &opts.gpio {
        Some(options) => run_with_gpio(&mut loader, options)?,
        None if opts.recovery => loader.run(&mut FixedControl::active(), &mut ExitHalt),
        None => loader.run(&mut FixedControl::inactive(), &mut ExitHalt),
    };
    print_response(&rsp);

    let (mut flash, _, store, _) = loader.into_parts();
    store_back(&mut flash, &store)?;
    save_flash(&flash, file)?;
    Ok(())
}

/// Split `key=value,key=value` option strings
fn parse_pairs(options: &str) -> Result<Vec<(&str, &str)>, Box<dyn std::error::Error>> {
    options.split(',')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| format!("Expected key=value, got '{}'", pair).into())
        })
        .collect()
}

#[cfg(feature = "linux-gpio")]
fn run_with_gpio<K: KeyManager>(
    loader: &mut Loader<K>,
    options: &str,
) -> Result<BootResponse, Box<dyn std::error::Error>> {
    let pairs = parse_pairs(options)?;
    let mut control = bankboot_linux_gpio::open_gpio_control(&pairs)?;
    Ok(loader.run(&mut control, &mut ExitHalt))
}

#[cfg(not(feature = "linux-gpio"))]
fn run_with_gpio<K: KeyManager>(
    _loader: &mut Loader<K>,
    options: &str,
) -> Result<BootResponse, Box<dyn std::error::Error>> {
    parse_pairs(options)?;
    Err("GPIO control needs bankboot built with the linux-gpio feature".into())
}

fn print_response(rsp: &BootResponse) {
    let slot = if rsp.slot == BOOT_NUM_SLOTS {
        "scratch (recovery)".to_string()
    } else {
        format!("slot {}", rsp.slot)
    };
    println!("Boot hand-off");
    println!("=============");
    println!("Image:     {}", slot);
    println!("Device:    {}", rsp.flash_dev_id);
    println!("Offset:    0x{:08X}", rsp.image_off);
    println!("Version:   {}", rsp.header.version);
    println!(
        "Entry:     0x{:08X}",
        rsp.image_off + rsp.header.hdr_size as u32
    );
}
