//! Per-slot image validation
//!
//! A slot moves through `Unread -> HeaderRead` and then settles in exactly
//! one of `Bootable`, `NotBootable` or `Corrupt`. A slot whose header could
//! not be read at all ends up `Unreadable`.
//!
//! Erased flash is checked before the magic is compared: a never-written
//! bank must read as "no image here", not as a corrupt image.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::Capabilities;
use crate::error::{Error, Result};
use crate::flash::AreaReader;

use super::header::ImageHeader;

/// Size of the scratch buffer handed to the integrity validator
pub const TMPBUF_SZ: usize = 256;

/// Size of an image encryption key
pub const ENC_KEY_SIZE: usize = 16;

/// Slot that may hold encrypted images awaiting installation
const ENCRYPTED_SLOT: usize = 1;

/// Validation state of one image slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing has been read yet
    Unread,
    /// The header was read but not judged yet
    HeaderRead,
    /// Reading the header failed
    Unreadable,
    /// The slot is erased or flagged non-bootable
    NotBootable,
    /// Bad magic, key failure or failed integrity check
    Corrupt,
    /// The image may be executed
    Bootable,
}

impl SlotState {
    /// Only a `Bootable` slot may be handed off
    pub fn is_usable(self) -> bool {
        self == SlotState::Bootable
    }
}

/// Image encryption key material, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; ENC_KEY_SIZE]);

impl KeyMaterial {
    /// Wrap raw key bytes
    pub fn new(bytes: [u8; ENC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; ENC_KEY_SIZE] {
        &self.0
    }
}

impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// Authenticity and integrity check for an image
pub trait ImageValidator {
    /// Check the hash and/or signature of the image described by `hdr`
    ///
    /// `tmp` is a caller-owned scratch buffer of [`TMPBUF_SZ`] bytes; the
    /// validator must not allocate.
    fn validate(&mut self, hdr: &ImageHeader, image: &mut dyn AreaReader, tmp: &mut [u8])
        -> bool;
}

/// Image encryption key manager
pub trait KeyManager {
    /// Recover the key the image was encrypted with
    fn load_key(&mut self, hdr: &ImageHeader, image: &mut dyn AreaReader) -> Result<KeyMaterial>;

    /// Install `key` for decrypting reads of `slot`
    fn set_key(&mut self, slot: usize, key: &KeyMaterial) -> Result<()>;
}

/// Key manager for builds without encrypted image support
///
/// Any attempt to load a key fails, so an encrypted image is `Corrupt`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeyManager;

impl KeyManager for NoKeyManager {
    fn load_key(&mut self, _hdr: &ImageHeader, _image: &mut dyn AreaReader) -> Result<KeyMaterial> {
        Err(Error::BadImage)
    }

    fn set_key(&mut self, _slot: usize, _key: &KeyMaterial) -> Result<()> {
        Err(Error::BadImage)
    }
}

/// Judge the image in `slot` whose header has already been read
///
/// `erased_val` is the erased byte value of the slot's area.
pub fn validate_slot<V, K>(
    slot: usize,
    hdr: &ImageHeader,
    image: &mut dyn AreaReader,
    erased_val: u8,
    caps: &Capabilities,
    validator: &mut V,
    keys: &mut K,
) -> SlotState
where
    V: ImageValidator + ?Sized,
    K: KeyManager + ?Sized,
{
    if hdr.magic_is_erased(erased_val) || !hdr.is_bootable() {
        log::info!("Image in slot {} is not bootable", slot);
        return SlotState::NotBootable;
    }

    if !hdr.has_valid_magic() {
        log::error!(
            "Image in slot {} is not valid: bad magic 0x{:08x}",
            slot,
            hdr.magic
        );
        return SlotState::Corrupt;
    }

    if !hdr.fits(image.area().size) {
        log::error!(
            "Image in slot {} is not valid: {} byte header, {} byte body and {} byte protected TLVs exceed the {} byte area",
            slot,
            hdr.hdr_size,
            hdr.img_size,
            hdr.protect_tlv_size,
            image.area().size
        );
        return SlotState::Corrupt;
    }

    if let Err(e) = image_check(slot, hdr, image, caps, validator, keys) {
        log::error!("Image in slot {} is not valid: {}", slot, e);
        return SlotState::Corrupt;
    }

    log::debug!("Image in slot {} is valid (version {})", slot, hdr.version);
    SlotState::Bootable
}

fn image_check<V, K>(
    slot: usize,
    hdr: &ImageHeader,
    image: &mut dyn AreaReader,
    caps: &Capabilities,
    validator: &mut V,
    keys: &mut K,
) -> Result<()>
where
    V: ImageValidator + ?Sized,
    K: KeyManager + ?Sized,
{
    if caps.encrypted_images
        && slot == ENCRYPTED_SLOT
        && hdr.flags.contains(super::ImageFlags::ENCRYPTED)
    {
        let key = keys.load_key(hdr, image)?;
        keys.set_key(slot, &key)?;
    }

    let mut tmpbuf = [0u8; TMPBUF_SZ];
    if !validator.validate(hdr, image, &mut tmpbuf) {
        return Err(Error::BadImage);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{AreaId, AreaView, FlashMap};
    use crate::image::{ImageFlags, ImageVersion, IMAGE_HEADER_SIZE, IMAGE_MAGIC};
    use crate::testutil::{MarkerValidator, MockFlash};

    /// Validator that accepts everything and counts calls
    #[derive(Default)]
    struct AcceptAll {
        calls: usize,
    }

    impl ImageValidator for AcceptAll {
        fn validate(&mut self, _hdr: &ImageHeader, _image: &mut dyn AreaReader, _tmp: &mut [u8]) -> bool {
            self.calls += 1;
            true
        }
    }

    struct RecordingKeys {
        fail_load: bool,
        installed: Option<usize>,
    }

    impl KeyManager for RecordingKeys {
        fn load_key(&mut self, _hdr: &ImageHeader, _image: &mut dyn AreaReader) -> Result<KeyMaterial> {
            if self.fail_load {
                Err(Error::BadImage)
            } else {
                Ok(KeyMaterial::new([0x11; ENC_KEY_SIZE]))
            }
        }

        fn set_key(&mut self, slot: usize, _key: &KeyMaterial) -> Result<()> {
            self.installed = Some(slot);
            Ok(())
        }
    }

    fn judge(
        flash: &mut MockFlash,
        slot: usize,
        caps: &Capabilities,
        keys: &mut dyn KeyManager,
    ) -> SlotState {
        let id = if slot == 0 { AreaId::IMAGE_0 } else { AreaId::IMAGE_1 };
        let area = flash.open_area(id);
        let mut raw = [0u8; IMAGE_HEADER_SIZE];
        flash.read(&area, 0, &mut raw).unwrap();
        let hdr = ImageHeader::parse(&raw).unwrap();
        let erased = flash.erased_val(&area);
        let mut validator = MarkerValidator::new();
        let mut view = AreaView::new(flash, area);
        validate_slot(slot, &hdr, &mut view, erased, caps, &mut validator, keys)
    }

    fn good_header() -> ImageHeader {
        ImageHeader::new(64, ImageVersion::default())
    }

    #[test]
    fn test_erased_slot_is_not_bootable() {
        let mut flash = MockFlash::board();
        let state = judge(&mut flash, 0, &Capabilities::default(), &mut NoKeyManager);
        assert_eq!(state, SlotState::NotBootable);
    }

    #[test]
    fn test_erased_magic_never_corrupt_whatever_the_rest() {
        // Only the magic bytes decide erasure; other fields may hold anything.
        for fill in [0x00u8, 0x5A, 0xA5] {
            let mut flash = MockFlash::board();
            let mut bytes = [fill; IMAGE_HEADER_SIZE];
            bytes[..4].copy_from_slice(&[0xFF; 4]);
            flash.program(AreaId::IMAGE_0, 0, &bytes);
            let state = judge(&mut flash, 0, &Capabilities::default(), &mut NoKeyManager);
            assert_eq!(state, SlotState::NotBootable);
        }
    }

    #[test]
    fn test_non_bootable_flag() {
        let mut flash = MockFlash::board();
        let mut hdr = good_header();
        hdr.flags = ImageFlags::NON_BOOTABLE;
        flash.put_header(AreaId::IMAGE_0, &hdr);
        flash.program(AreaId::IMAGE_0, IMAGE_HEADER_SIZE, &[0xA5]);
        let state = judge(&mut flash, 0, &Capabilities::default(), &mut NoKeyManager);
        assert_eq!(state, SlotState::NotBootable);
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut flash = MockFlash::board();
        let mut hdr = good_header();
        hdr.magic = IMAGE_MAGIC ^ 1;
        flash.put_header(AreaId::IMAGE_0, &hdr);
        let state = judge(&mut flash, 0, &Capabilities::default(), &mut NoKeyManager);
        assert_eq!(state, SlotState::Corrupt);
    }

    #[test]
    fn test_failed_integrity_is_corrupt() {
        let mut flash = MockFlash::board();
        flash.put_header(AreaId::IMAGE_0, &good_header());
        flash.program(AreaId::IMAGE_0, IMAGE_HEADER_SIZE, &[0x00]);
        let state = judge(&mut flash, 0, &Capabilities::default(), &mut NoKeyManager);
        assert_eq!(state, SlotState::Corrupt);
    }

    #[test]
    fn test_valid_image_is_bootable() {
        let mut flash = MockFlash::board();
        flash.put_header(AreaId::IMAGE_0, &good_header());
        flash.program(AreaId::IMAGE_0, IMAGE_HEADER_SIZE, &[0xA5]);
        let state = judge(&mut flash, 0, &Capabilities::default(), &mut NoKeyManager);
        assert_eq!(state, SlotState::Bootable);
        assert!(state.is_usable());
    }

    fn encrypted_in_slot1(flash: &mut MockFlash) {
        let mut hdr = good_header();
        hdr.flags = ImageFlags::ENCRYPTED;
        flash.put_header(AreaId::IMAGE_1, &hdr);
        flash.program(AreaId::IMAGE_1, IMAGE_HEADER_SIZE, &[0xA5]);
    }

    #[test]
    fn test_encrypted_secondary_loads_key() {
        let mut flash = MockFlash::board();
        encrypted_in_slot1(&mut flash);
        let caps = Capabilities {
            encrypted_images: true,
            ..Capabilities::default()
        };
        let mut keys = RecordingKeys {
            fail_load: false,
            installed: None,
        };
        assert_eq!(judge(&mut flash, 1, &caps, &mut keys), SlotState::Bootable);
        assert_eq!(keys.installed, Some(1));
    }

    #[test]
    fn test_key_failure_is_corrupt() {
        let mut flash = MockFlash::board();
        encrypted_in_slot1(&mut flash);
        let caps = Capabilities {
            encrypted_images: true,
            ..Capabilities::default()
        };
        let mut keys = RecordingKeys {
            fail_load: true,
            installed: None,
        };
        assert_eq!(judge(&mut flash, 1, &caps, &mut keys), SlotState::Corrupt);
        assert_eq!(keys.installed, None);
    }

    #[test]
    fn test_encryption_disabled_skips_key_manager() {
        let mut flash = MockFlash::board();
        encrypted_in_slot1(&mut flash);
        // NoKeyManager would fail; with the capability off it is never asked.
        let state = judge(&mut flash, 1, &Capabilities::default(), &mut NoKeyManager);
        assert_eq!(state, SlotState::Bootable);
    }

    #[test]
    fn test_encrypted_primary_skips_key_manager() {
        let mut flash = MockFlash::board();
        let mut hdr = good_header();
        hdr.flags = ImageFlags::ENCRYPTED;
        flash.put_header(AreaId::IMAGE_0, &hdr);
        flash.program(AreaId::IMAGE_0, IMAGE_HEADER_SIZE, &[0xA5]);
        let caps = Capabilities {
            encrypted_images: true,
            ..Capabilities::default()
        };
        let mut keys = RecordingKeys {
            fail_load: true,
            installed: None,
        };
        assert_eq!(judge(&mut flash, 0, &caps, &mut keys), SlotState::Bootable);
        assert_eq!(keys.installed, None);
    }

    #[test]
    fn test_sizes_past_area_end_are_corrupt() {
        let mut flash = MockFlash::board();
        let mut hdr = good_header();
        // Wraps to a 32 byte extent if added unchecked.
        hdr.img_size = 0u32.wrapping_sub(32);
        hdr.protect_tlv_size = 32;
        flash.put_header(AreaId::IMAGE_0, &hdr);

        let area = flash.open_area(AreaId::IMAGE_0);
        let mut validator = AcceptAll::default();
        let mut view = AreaView::new(&mut flash, area);
        let state = validate_slot(
            0,
            &hdr,
            &mut view,
            0xFF,
            &Capabilities::default(),
            &mut validator,
            &mut NoKeyManager,
        );
        assert_eq!(state, SlotState::Corrupt);
        assert_eq!(validator.calls, 0);
    }

    #[test]
    fn test_image_ending_at_area_end_is_checked() {
        let mut flash = MockFlash::board();
        let area = flash.open_area(AreaId::IMAGE_0);
        let mut hdr = good_header();
        hdr.img_size = area.size - IMAGE_HEADER_SIZE as u32;
        flash.put_header(AreaId::IMAGE_0, &hdr);

        let mut validator = AcceptAll::default();
        let mut view = AreaView::new(&mut flash, area);
        let state = validate_slot(
            0,
            &hdr,
            &mut view,
            0xFF,
            &Capabilities::default(),
            &mut validator,
            &mut NoKeyManager,
        );
        assert_eq!(state, SlotState::Bootable);
        assert_eq!(validator.calls, 1);
    }
}
