//! Boot configuration
//!
//! Optional bootloader capabilities are resolved once, before a boot
//! attempt, into a [`Capabilities`] descriptor that the validator and the
//! decision engine consult.

use crate::flash::AreaId;

/// Optional bootloader capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct Capabilities {
    /// Encrypted images in the secondary bank are decrypted via the key manager
    pub encrypted_images: bool,
    /// The board has a scratch area; required for recovery boots
    pub scratch_area: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            encrypted_images: false,
            scratch_area: true,
        }
    }
}

/// Flash area ids used by the bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaMap {
    /// Areas of image bank 0 and bank 1
    pub images: [AreaId; 2],
    /// Scratch / configuration area
    pub scratch: AreaId,
}

impl AreaMap {
    /// Area id holding image `slot`
    pub fn image(&self, slot: usize) -> AreaId {
        self.images[slot]
    }
}

impl Default for AreaMap {
    fn default() -> Self {
        Self {
            images: [AreaId::IMAGE_0, AreaId::IMAGE_1],
            scratch: AreaId::SCRATCH,
        }
    }
}

/// Everything the boot loader needs to know about the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootConfig {
    /// Area ids
    pub areas: AreaMap,
    /// Enabled capabilities
    pub caps: Capabilities,
}
