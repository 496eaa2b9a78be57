//! Board layout files
//!
//! Host tools describe the flash of a board in TOML:
//!
//! ```toml
//! [device]
//! name = "devkit"
//! size = "1 MiB"
//! erase_block = "4 KiB"
//! write_align = 4
//! erased_value = 0xFF
//!
//! [capabilities]
//! encrypted_images = false
//! scratch_area = true
//!
//! [[area]]
//! name = "image-0"
//! id = 1
//! offset = 0x00C000
//! size = "32 KiB"
//! ```
//!
//! Numbers may be written in hex (`0x...`) or decimal; sizes also accept
//! `KiB`/`MiB` suffixes. An area's `sector_size` defaults to the device's
//! erase block.
//!
//! Areas sit on device 0 unless they name another with `device = N`. Every
//! device has the `[device]` parameters and its own offset space.

use std::fmt;
use std::format;
use std::fs;
use std::path::Path;
use std::string::{String, ToString};
use std::vec::Vec;

use crate::config::{AreaMap, BootConfig, Capabilities};
use crate::flash::AreaId;

/// Errors from loading or checking a board layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// A required area is not described
    MissingArea(AreaId),
    /// Two areas use the same id
    DuplicateAreaId(AreaId),
    /// Area extends beyond the device
    AreaOutOfBounds(AreaId),
    /// Area is empty or not made of whole sectors
    InvalidArea(AreaId),
    /// Two areas overlap
    OverlappingAreas(AreaId, AreaId),
    /// Device parameters are inconsistent
    InvalidDevice,
    /// Failed to parse layout file
    ParseError(String),
    /// I/O error
    IoError,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArea(id) => write!(f, "area {} is not described", id),
            Self::DuplicateAreaId(id) => write!(f, "area {} is described twice", id),
            Self::AreaOutOfBounds(id) => write!(f, "area {} extends beyond the device", id),
            Self::InvalidArea(id) => {
                write!(f, "area {} is empty or not a whole number of sectors", id)
            }
            Self::OverlappingAreas(a, b) => write!(f, "areas {} and {} overlap", a, b),
            Self::InvalidDevice => write!(f, "invalid device parameters"),
            Self::ParseError(msg) => write!(f, "failed to parse layout: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Flash device parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    /// Board or device name
    pub name: Option<String>,
    /// Device size in bytes
    pub size: u32,
    /// Erase block size in bytes
    pub erase_block: u32,
    /// Minimum write granularity in bytes
    pub write_align: u8,
    /// Value of erased bytes
    pub erased_value: u8,
}

/// One area of the flash map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaLayout {
    /// Human readable name
    pub name: String,
    /// Area id
    pub id: AreaId,
    /// Flash device id reported in hand-offs
    pub device_id: u8,
    /// Byte offset within the device
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// Erase sector size
    pub sector_size: u32,
}

impl AreaLayout {
    /// Number of sectors in the area
    pub fn sector_count(&self) -> usize {
        (self.size / self.sector_size) as usize
    }

    /// One past the last byte of the area
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

/// Flash layout of a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardLayout {
    /// Device parameters
    pub device: DeviceLayout,
    /// Bootloader capabilities
    pub caps: Capabilities,
    /// Areas sorted by offset
    pub areas: Vec<AreaLayout>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlBoardFile {
    device: TomlDevice,
    #[serde(default)]
    capabilities: Capabilities,
    area: Vec<TomlArea>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlDevice {
    name: Option<String>,
    #[serde(deserialize_with = "deserialize_size")]
    size: u32,
    #[serde(deserialize_with = "deserialize_size")]
    erase_block: u32,
    #[serde(default = "default_write_align")]
    write_align: u8,
    #[serde(default = "default_erased_value", deserialize_with = "deserialize_hex_u32")]
    erased_value: u32,
}

#[derive(Debug, serde::Deserialize)]
struct TomlArea {
    name: String,
    id: AreaId,
    #[serde(default)]
    device: u8,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    offset: u32,
    #[serde(deserialize_with = "deserialize_size")]
    size: u32,
    #[serde(default, deserialize_with = "deserialize_opt_size")]
    sector_size: Option<u32>,
}

fn default_write_align() -> u8 {
    1
}

fn default_erased_value() -> u32 {
    0xFF
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a size that can be a number or a string like "4 KiB"
fn deserialize_size<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_opt_size<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_size(deserializer).map(Some)
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "32 KiB", "0x8000" or "4096"
pub fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();

    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let s_lower = s.to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s_lower.strip_suffix("mib") {
        (n.trim(), 1024 * 1024)
    } else if let Some(n) = s_lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num: u32 = num_str.parse().map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}

/// Format a size the way [`parse_size`] reads it back
pub fn format_size(size: u32) -> String {
    if size >= 1024 * 1024 && size % (1024 * 1024) == 0 {
        format!("{} MiB", size / (1024 * 1024))
    } else if size >= 1024 && size % 1024 == 0 {
        format!("{} KiB", size / 1024)
    } else {
        format!("{}", size)
    }
}

impl BoardLayout {
    /// Load a layout from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let content = fs::read_to_string(path).map_err(|_| LayoutError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Parse and check a layout from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, LayoutError> {
        let file: TomlBoardFile =
            toml::from_str(content).map_err(|e| LayoutError::ParseError(e.to_string()))?;

        let erased_value =
            u8::try_from(file.device.erased_value).map_err(|_| LayoutError::InvalidDevice)?;
        let device = DeviceLayout {
            name: file.device.name,
            size: file.device.size,
            erase_block: file.device.erase_block,
            write_align: file.device.write_align,
            erased_value,
        };

        let mut areas: Vec<AreaLayout> = file
            .area
            .into_iter()
            .map(|a| AreaLayout {
                name: a.name,
                id: a.id,
                device_id: a.device,
                offset: a.offset,
                size: a.size,
                sector_size: a.sector_size.unwrap_or(device.erase_block),
            })
            .collect();
        areas.sort_by_key(|a| a.offset);

        let layout = Self {
            device,
            caps: file.capabilities,
            areas,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Check the layout for consistency
    ///
    /// Areas must be non-empty whole numbers of sectors, lie within the
    /// device, not overlap and have unique ids. Both image banks must be
    /// present, and the scratch area too if the board claims to have one.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let dev = &self.device;
        if dev.size == 0
            || dev.erase_block == 0
            || dev.write_align == 0
            || dev.size % dev.erase_block != 0
        {
            return Err(LayoutError::InvalidDevice);
        }

        for (i, area) in self.areas.iter().enumerate() {
            if self.areas[..i].iter().any(|a| a.id == area.id) {
                return Err(LayoutError::DuplicateAreaId(area.id));
            }
            if area.size == 0 || area.sector_size == 0 || area.size % area.sector_size != 0 {
                return Err(LayoutError::InvalidArea(area.id));
            }
            if area.end() > dev.size as u64 {
                return Err(LayoutError::AreaOutOfBounds(area.id));
            }
        }

        let mut by_device: Vec<&AreaLayout> = self.areas.iter().collect();
        by_device.sort_by_key(|a| (a.device_id, a.offset));
        for pair in by_device.windows(2) {
            if pair[1].device_id == pair[0].device_id && (pair[1].offset as u64) < pair[0].end() {
                return Err(LayoutError::OverlappingAreas(pair[0].id, pair[1].id));
            }
        }

        let map = AreaMap::default();
        for id in map.images {
            self.area(id).ok_or(LayoutError::MissingArea(id))?;
        }
        if self.caps.scratch_area {
            self.area(map.scratch)
                .ok_or(LayoutError::MissingArea(map.scratch))?;
        }

        Ok(())
    }

    /// Find an area by id
    pub fn area(&self, id: AreaId) -> Option<&AreaLayout> {
        self.areas.iter().find(|a| a.id == id)
    }

    /// Find an area by name
    pub fn area_by_name(&self, name: &str) -> Option<&AreaLayout> {
        self.areas.iter().find(|a| a.name == name)
    }

    /// Number of flash devices, counting up to the highest device id used
    pub fn device_count(&self) -> usize {
        self.areas
            .iter()
            .map(|a| a.device_id as usize + 1)
            .max()
            .unwrap_or(1)
    }

    /// Size of all devices laid out back to back
    pub fn flash_size(&self) -> u64 {
        self.device.size as u64 * self.device_count() as u64
    }

    /// Offset of `area` when all devices are laid out back to back
    pub fn flash_offset(&self, area: &AreaLayout) -> u64 {
        area.device_id as u64 * self.device.size as u64 + area.offset as u64
    }

    /// Boot loader configuration for this board
    pub fn boot_config(&self) -> BootConfig {
        BootConfig {
            areas: AreaMap::default(),
            caps: self.caps,
        }
    }

    /// Device offset of the preference store, if the board has a storage area
    pub fn storage_offset(&self) -> Option<u32> {
        let area = self.area(AreaId::STORAGE)?;
        crate::storage::storage_offset(area.offset, area.size, self.device.erase_block)
    }

    /// Render the layout as TOML
    pub fn to_toml_string(&self) -> String {
        let mut output = String::new();

        output.push_str("[device]\n");
        if let Some(name) = &self.device.name {
            output.push_str(&format!("name = {}\n", toml_string(name)));
        }
        output.push_str(&format!("size = \"{}\"\n", format_size(self.device.size)));
        output.push_str(&format!(
            "erase_block = \"{}\"\n",
            format_size(self.device.erase_block)
        ));
        output.push_str(&format!("write_align = {}\n", self.device.write_align));
        output.push_str(&format!("erased_value = 0x{:02X}\n\n", self.device.erased_value));

        output.push_str("[capabilities]\n");
        output.push_str(&format!("encrypted_images = {}\n", self.caps.encrypted_images));
        output.push_str(&format!("scratch_area = {}\n\n", self.caps.scratch_area));

        for area in &self.areas {
            output.push_str("[[area]]\n");
            output.push_str(&format!("name = {}\n", toml_string(&area.name)));
            output.push_str(&format!("id = {}\n", area.id));
            if area.device_id != 0 {
                output.push_str(&format!("device = {}\n", area.device_id));
            }
            output.push_str(&format!("offset = 0x{:08X}\n", area.offset));
            output.push_str(&format!("size = \"{}\"\n", format_size(area.size)));
            if area.sector_size != self.device.erase_block {
                output.push_str(&format!(
                    "sector_size = \"{}\"\n",
                    format_size(area.sector_size)
                ));
            }
            output.push('\n');
        }

        output
    }
}

/// Quote and escape `s` as a TOML string
fn toml_string(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}
