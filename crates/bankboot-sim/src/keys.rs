//! Image encryption key manager
//!
//! Encrypted images carry their key in an `ENC_KW128` TLV, wrapped with a
//! device key-encryption key. The emulation wraps by XOR; the image body
//! itself is left as is.

use zeroize::Zeroize;

use bankboot_core::error::{Error, Result};
use bankboot_core::flash::AreaReader;
use bankboot_core::image::{ImageHeader, KeyManager, KeyMaterial, ENC_KEY_SIZE};

use crate::tlv::{self, TlvError, TlvIter, TLV_ENC_KW128};

/// Wrap (or unwrap) `key` with `kek`
pub fn wrap_key(key: &[u8; ENC_KEY_SIZE], kek: &KeyMaterial) -> [u8; ENC_KEY_SIZE] {
    let mut out = [0u8; ENC_KEY_SIZE];
    for ((o, k), w) in out.iter_mut().zip(key).zip(kek.as_bytes()) {
        *o = k ^ w;
    }
    out
}

/// Key manager reading wrapped keys from the image TLVs
pub struct TlvKeyManager {
    kek: KeyMaterial,
    installed: [Option<KeyMaterial>; 2],
}

impl TlvKeyManager {
    /// Create a key manager using `kek` as the device key
    pub fn new(kek: KeyMaterial) -> Self {
        Self {
            kek,
            installed: [None, None],
        }
    }

    /// Key installed for `slot`, if any
    pub fn installed(&self, slot: usize) -> Option<&KeyMaterial> {
        self.installed.get(slot).and_then(Option::as_ref)
    }
}

impl KeyManager for TlvKeyManager {
    fn load_key(&mut self, hdr: &ImageHeader, image: &mut dyn AreaReader) -> Result<KeyMaterial> {
        let mut wrapped = [0u8; ENC_KEY_SIZE];
        if let Err(e) = read_wrapped(hdr, image, &mut wrapped) {
            log::error!("Failed to load image key: {}", e);
            return Err(Error::BadImage);
        }

        let key = KeyMaterial::new(wrap_key(&wrapped, &self.kek));
        wrapped.zeroize();
        Ok(key)
    }

    fn set_key(&mut self, slot: usize, key: &KeyMaterial) -> Result<()> {
        let entry = self.installed.get_mut(slot).ok_or(Error::BadImage)?;
        *entry = Some(key.clone());
        log::debug!("Installed image key for slot {}", slot);
        Ok(())
    }
}

fn read_wrapped(
    hdr: &ImageHeader,
    image: &mut dyn AreaReader,
    out: &mut [u8; ENC_KEY_SIZE],
) -> core::result::Result<(), TlvError> {
    let entry = TlvIter::new(hdr, image, false)?.find(TLV_ENC_KW128)?;
    tlv::read_value(image, &entry, out)
}
