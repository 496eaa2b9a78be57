//! Slot preference commands

use bankboot_core::layout::BoardLayout;
use bankboot_core::storage::{PreferenceOrigin, PreferenceRecord, PreferenceStore, StorageKey, StoreError};
use bankboot_sim::{NvsStore, SimFlash};
use std::path::Path;

use super::{load_store, open_flash, save_flash, store_back};

fn mount(flash: &SimFlash) -> Result<PreferenceStore<NvsStore>, Box<dyn std::error::Error>> {
    let mut prefs = PreferenceStore::new(load_store(flash)?);
    prefs.init()?;
    Ok(prefs)
}

fn describe(record: &PreferenceRecord) -> String {
    let origin = match record.origin {
        PreferenceOrigin::Operator => "set by operator",
        PreferenceOrigin::Default => "first-boot default",
    };
    format!("bank {} ({})", record.preferred_bank, origin)
}

/// Show the stored preference
pub fn cmd_show(layout: BoardLayout, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let flash = open_flash(layout, file)?;
    let mut prefs = mount(&flash)?;

    match prefs.get(StorageKey::SlotPreference) {
        Ok(record) => println!("Preferred: {}", describe(&record)),
        Err(StoreError::NotFound) => {
            println!("No preference stored; the next boot stores bank 1 as default")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Store an operator preference
pub fn cmd_set(layout: BoardLayout, file: &Path, bank: u8) -> Result<(), Box<dyn std::error::Error>> {
    let mut flash = open_flash(layout, file)?;
    let mut prefs = mount(&flash)?;

    let record = PreferenceRecord::operator(bank);
    prefs.set(StorageKey::SlotPreference, &record)?;
    store_back(&mut flash, prefs.store())?;
    save_flash(&flash, file)?;

    println!("Preferred: {}", describe(&record));
    Ok(())
}

/// Delete the stored preference
pub fn cmd_reset(layout: BoardLayout, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut flash = open_flash(layout, file)?;
    let mut prefs = mount(&flash)?;

    prefs.reset()?;
    store_back(&mut flash, prefs.store())?;
    save_flash(&flash, file)?;

    println!("Preference cleared");
    Ok(())
}
