//! End-to-end boot decisions on the emulated demo board

use std::panic::{self, AssertUnwindSafe};

use sha2::{Digest, Sha256};

use bankboot_core::error::{Error, Result};
use bankboot_core::flash::{AreaId, Sector};
use bankboot_core::geometry::MAX_IMG_SECTORS;
use bankboot_core::halt::Halt;
use bankboot_core::image::{ImageFlags, ImageHeader, ImageVersion, KeyMaterial, SlotState};
use bankboot_core::loader::BOOT_NUM_SLOTS;
use bankboot_core::storage::{KvStore, PreferenceRecord, PreferenceStore, StorageKey};
use bankboot_core::{BootConfig, BootLoader, BootResponse, Capabilities};
use bankboot_sim::{
    demo_layout, FixedControl, HashValidator, ImageBuilder, MemStore, NvsStore, SimFlash,
    TlvKeyManager,
};
use bankboot_sim::tlv::{encode_area, TLV_INFO_MAGIC, TLV_SHA256};

const BANK0_OFF: u32 = 0x0000_C000;
const BANK1_OFF: u32 = 0x0007_4000;
const SCRATCH_OFF: u32 = 0x000D_C000;

struct PanicHalt;

impl Halt for PanicHalt {
    fn halt(&mut self, err: Error) -> ! {
        panic!("halted: {}", err);
    }
}

fn flash() -> SimFlash {
    SimFlash::new(demo_layout().unwrap())
}

fn signed(major: u8) -> Vec<u8> {
    ImageBuilder::new(ImageVersion::new(major, 0, 0, 0))
        .body((0..2000).map(|i| (i % 251) as u8).collect())
        .build()
        .unwrap()
}

fn bad_magic(major: u8) -> Vec<u8> {
    let mut image = signed(major);
    image[0] ^= 0x01;
    image
}

fn bad_hash(major: u8) -> Vec<u8> {
    let mut image = signed(major);
    image[100] ^= 0x01;
    image
}

fn not_bootable(major: u8) -> Vec<u8> {
    ImageBuilder::new(ImageVersion::new(major, 0, 0, 0))
        .flags(ImageFlags::NON_BOOTABLE)
        .body(vec![0x11; 256])
        .build()
        .unwrap()
}

fn with_pref(record: PreferenceRecord) -> MemStore {
    let mut store = MemStore::new();
    store.put_raw(StorageKey::SlotPreference.id(), &record.to_bytes());
    store
}

fn loader<S: KvStore>(flash: SimFlash, store: S) -> BootLoader<SimFlash, HashValidator, S> {
    BootLoader::new(flash, HashValidator::new(), store, BootConfig::default())
}

/// Run `boot_or_halt`, returning the halt message if it halted
fn halted<S: KvStore>(bl: &mut BootLoader<SimFlash, HashValidator, S>) -> Option<String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| bl.boot_or_halt(&mut PanicHalt)));
    match result {
        Ok(_) => None,
        Err(payload) => payload.downcast_ref::<String>().cloned(),
    }
}

fn assert_closed_once(flash: &SimFlash) {
    assert!(flash.all_closed());
    for id in [AreaId::IMAGE_0, AreaId::IMAGE_1, AreaId::SCRATCH] {
        assert_eq!(flash.opens(id), flash.closes(id), "area {}", id);
    }
}

#[test]
fn scenario_a_first_boot_falls_back_to_bank_0() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    let mut bl = loader(flash, MemStore::new());

    let rsp = bl.boot_go().unwrap();
    assert_eq!(rsp.slot, 0);
    assert_eq!(rsp.image_off, BANK0_OFF);
    assert_eq!(rsp.flash_dev_id, 0);
    assert_eq!(rsp.header.version.major, 1);

    // The bootstrap default is persisted and readable afterwards.
    let stored = bl
        .preferences_mut()
        .get(StorageKey::SlotPreference)
        .unwrap();
    assert_eq!(stored, PreferenceRecord::bootstrap());
    assert_eq!(stored.preferred_slot(), 1);
    assert_closed_once(bl.flash());
}

#[test]
fn scenario_b_bank_0_corrupt_prefers_bank_1() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &bad_magic(1)).unwrap();
    flash.load_image(AreaId::IMAGE_1, &signed(2)).unwrap();
    let mut bl = loader(flash, with_pref(PreferenceRecord::operator(1)));

    let rsp = bl.boot_go().unwrap();
    assert_eq!(rsp.slot, 1);
    assert_eq!(rsp.image_off, BANK1_OFF);
    assert_eq!(rsp.header.version.major, 2);
}

#[test]
fn scenario_c_both_banks_fail_integrity() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &bad_hash(1)).unwrap();
    flash.load_image(AreaId::IMAGE_1, &bad_hash(2)).unwrap();
    let mut bl = loader(flash, with_pref(PreferenceRecord::operator(1)));

    assert_eq!(bl.boot_go(), Err(Error::BadStatus));
    assert_eq!(halted(&mut bl).as_deref(), Some("halted: bad boot status"));
    assert_closed_once(bl.flash());
}

#[test]
fn scenario_d_too_many_sectors() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    flash.load_image(AreaId::IMAGE_1, &signed(2)).unwrap();
    let sectors = (0..MAX_IMG_SECTORS as u32 + 1)
        .map(|i| Sector {
            offset: i * 512,
            size: 512,
        })
        .collect();
    flash.override_sectors(AreaId::IMAGE_0, sectors);
    let mut bl = loader(flash, MemStore::new());

    assert_eq!(bl.boot_go(), Err(Error::Geometry));
    assert_eq!(bl.validator().checked(), 0);
    assert!(bl.preferences().store().get_raw(StorageKey::SlotPreference.id()).is_none());
    assert_closed_once(bl.flash());
}

#[test]
fn scenario_e_recovery_boots_scratch() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    // No signature needed on the recovery path.
    flash.load_image(AreaId::SCRATCH, &bad_hash(9)).unwrap();
    let mut bl = loader(flash, MemStore::new());

    let rsp = bl.run(&mut FixedControl::active(), &mut PanicHalt);
    assert_eq!(rsp.slot, BOOT_NUM_SLOTS);
    assert_eq!(rsp.image_off, SCRATCH_OFF);
    assert_eq!(rsp.header.version.major, 9);
    assert_eq!(bl.validator().checked(), 0);
    assert!(bl.preferences().store().get_raw(StorageKey::SlotPreference.id()).is_none());
    assert_closed_once(bl.flash());
}

#[test]
fn scenario_e_recovery_bad_magic_halts() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    flash.load_image(AreaId::SCRATCH, &bad_magic(9)).unwrap();
    let mut bl = loader(flash, MemStore::new());

    assert_eq!(bl.recovery_go(), Err(Error::BadImage));
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        bl.run(&mut FixedControl::active(), &mut PanicHalt)
    }));
    assert!(result.is_err());
    assert_closed_once(bl.flash());
}

#[test]
fn inactive_or_broken_control_boots_normally() {
    for mut control in [FixedControl::inactive(), FixedControl::broken()] {
        let mut flash = flash();
        flash.load_image(AreaId::IMAGE_1, &signed(2)).unwrap();
        flash.load_image(AreaId::SCRATCH, &signed(9)).unwrap();
        let mut bl = loader(flash, MemStore::new());

        let rsp = bl.run(&mut control, &mut PanicHalt);
        assert_eq!(rsp.slot, 1);
    }
}

#[test]
fn no_usable_bank_is_always_fatal() {
    let images: [fn(u8) -> Option<Vec<u8>>; 4] = [
        |_| None,
        |m| Some(bad_magic(m)),
        |m| Some(bad_hash(m)),
        |m| Some(not_bootable(m)),
    ];

    for make0 in images {
        for make1 in images {
            let mut flash = flash();
            if let Some(image) = make0(1) {
                flash.load_image(AreaId::IMAGE_0, &image).unwrap();
            }
            if let Some(image) = make1(2) {
                flash.load_image(AreaId::IMAGE_1, &image).unwrap();
            }
            let mut bl = loader(flash, MemStore::new());

            assert_eq!(bl.boot_go(), Err(Error::BadStatus));
            assert!(halted(&mut bl).is_some());
            assert_closed_once(bl.flash());
        }
    }
}

#[test]
fn mismatched_sector_sizes_still_boot_directly() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_1, &signed(2)).unwrap();
    // Bank 1 keeps the board's 4 KiB sectors; bank 0 gets 8 KiB ones.
    let sectors = (0..0x68000 / 0x2000)
        .map(|i| Sector {
            offset: i * 0x2000,
            size: 0x2000,
        })
        .collect();
    flash.override_sectors(AreaId::IMAGE_0, sectors);
    let mut bl = loader(flash, MemStore::new());

    let report = bl.inspect().unwrap();
    assert!(!report.compatible);
    assert_eq!(report.slots[1].as_ref().map(|s| s.state), Some(SlotState::Bootable));

    let rsp = bl.boot_go().unwrap();
    assert_eq!(rsp.slot, 1);
    assert_eq!(rsp.image_off, BANK1_OFF);
    assert_closed_once(bl.flash());
}

#[test]
fn wrapping_image_size_is_corrupt() {
    // img_size + hdr_size wraps to 0, so an unchecked extent would cover
    // only the header and leave the body unhashed.
    let mut hdr = ImageHeader::new(0u32.wrapping_sub(32), ImageVersion::new(6, 0, 0, 0));
    hdr.protect_tlv_size = 32;
    let header = hdr.to_bytes();
    let digest: [u8; 32] = Sha256::digest(header).into();

    let mut image = header.to_vec();
    image.extend_from_slice(&encode_area(TLV_INFO_MAGIC, &[(TLV_SHA256, &digest[..])]).unwrap());
    image.extend_from_slice(&[0xDE; 512]);

    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &image).unwrap();
    let mut bl = loader(flash, MemStore::new());

    let report = bl.inspect().unwrap();
    assert_eq!(report.slots[0].as_ref().map(|s| s.state), Some(SlotState::Corrupt));
    assert_eq!(bl.boot_go(), Err(Error::BadStatus));
    assert_eq!(bl.validator().checked(), 0);
    assert_closed_once(bl.flash());
}

#[test]
fn erased_banks_are_not_bootable_never_corrupt() {
    let mut bl = loader(flash(), MemStore::new());
    let report = bl.inspect().unwrap();
    for slot in report.slots.iter().flatten() {
        assert_eq!(slot.state, SlotState::NotBootable);
    }
    assert!(report.compatible);
}

#[test]
fn operator_choice_of_invalid_bank_halts() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    flash.load_image(AreaId::IMAGE_1, &bad_hash(2)).unwrap();
    let mut bl = loader(flash, with_pref(PreferenceRecord::operator(1)));

    assert_eq!(bl.boot_go(), Err(Error::BadImage));
    assert_eq!(halted(&mut bl).as_deref(), Some("halted: bad image"));
}

#[test]
fn unreadable_preference_tries_bank_1() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    flash.load_image(AreaId::IMAGE_1, &signed(2)).unwrap();
    let store = with_pref(PreferenceRecord::operator(0)).fail_read();
    let mut bl = loader(flash, store);
    assert_eq!(bl.boot_go().map(|r| r.slot), Ok(1));

    let mut flash = self::flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    let mut bl = loader(flash, MemStore::new().fail_init());
    assert_eq!(bl.boot_go(), Err(Error::BadStatus));
}

/// Boot once with the preference store kept in `storage`
fn boot_with_nvs(image: &[u8], storage: Vec<u8>) -> (Result<BootResponse>, Vec<u8>) {
    let layout = demo_layout().unwrap();
    let erased = layout.device.erased_value;
    let mut bl = loader(SimFlash::with_data(layout, image), NvsStore::from_bytes(storage, erased));
    let rsp = bl.boot_go();
    let (_, _, store, _) = bl.into_parts();
    (rsp, store.as_bytes().to_vec())
}

#[test]
fn repeated_boots_are_idempotent() {
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_0, &signed(1)).unwrap();
    flash.load_image(AreaId::IMAGE_1, &signed(2)).unwrap();
    let image = flash.data().to_vec();

    let (first, storage) = boot_with_nvs(&image, vec![0xFF; 2 * 4096]);
    let (second, storage_after) = boot_with_nvs(&image, storage.clone());
    assert_eq!(first, second);
    assert_eq!(first.map(|r| r.slot), Ok(1));
    // The second boot found the preference and wrote nothing.
    assert_eq!(storage, storage_after);

    // An operator preference persists across boots too.
    let mut prefs = PreferenceStore::new(NvsStore::from_bytes(storage, 0xFF));
    prefs.init().unwrap();
    prefs
        .set(StorageKey::SlotPreference, &PreferenceRecord::operator(0))
        .unwrap();
    let storage = prefs.into_inner().as_bytes().to_vec();
    let (third, storage) = boot_with_nvs(&image, storage);
    let (fourth, _) = boot_with_nvs(&image, storage);
    assert_eq!(third.map(|r| r.slot), Ok(0));
    assert_eq!(third, fourth);
}

#[test]
fn encrypted_secondary_image_installs_key() {
    let kek = KeyMaterial::new([0x42; 16]);
    let key = KeyMaterial::new([0x17; 16]);
    let image = ImageBuilder::new(ImageVersion::new(3, 0, 0, 0))
        .body(vec![0x5A; 512])
        .encryption_key(&key, &kek)
        .build()
        .unwrap();

    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_1, &image).unwrap();
    let config = BootConfig {
        caps: Capabilities {
            encrypted_images: true,
            ..Capabilities::default()
        },
        ..BootConfig::default()
    };
    let mut bl = BootLoader::new(flash, HashValidator::new(), MemStore::new(), config)
        .with_key_manager(TlvKeyManager::new(kek.clone()));

    let rsp = bl.boot_go().unwrap();
    assert_eq!(rsp.slot, 1);
    let (_, _, _, keys) = bl.into_parts();
    assert_eq!(keys.installed(1).map(|k| *k.as_bytes()), Some([0x17; 16]));
}

#[test]
fn encrypted_image_without_key_manager_is_corrupt() {
    let image = ImageBuilder::new(ImageVersion::new(3, 0, 0, 0))
        .body(vec![0x5A; 512])
        .encryption_key(&KeyMaterial::new([1; 16]), &KeyMaterial::new([2; 16]))
        .build()
        .unwrap();
    let mut flash = flash();
    flash.load_image(AreaId::IMAGE_1, &image).unwrap();
    let config = BootConfig {
        caps: Capabilities {
            encrypted_images: true,
            ..Capabilities::default()
        },
        ..BootConfig::default()
    };
    let mut bl = BootLoader::new(flash, HashValidator::new(), MemStore::new(), config);

    let report = bl.inspect().unwrap();
    assert_eq!(report.slots[1].as_ref().map(|s| s.state), Some(SlotState::Corrupt));
    assert_eq!(bl.boot_go(), Err(Error::BadStatus));
}
