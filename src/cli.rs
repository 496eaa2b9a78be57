//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    bankboot_core::layout::parse_number(s)
}

/// Parse a `TYPE=HEXBYTES` TLV argument
fn parse_tlv(s: &str) -> Result<(u8, Vec<u8>), String> {
    let (kind, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected TYPE=HEXBYTES, got '{}'", s))?;
    let kind = parse_hex_u32(kind)?;
    let kind = u8::try_from(kind).map_err(|_| format!("TLV type out of range: {}", kind))?;
    Ok((kind, parse_hex_bytes(value)?))
}

/// Parse a string of hex digits into bytes
fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s.trim_start_matches("0x")).map_err(|e| format!("Invalid hex '{}': {}", s, e))
}

/// Parse a 128-bit key given as 32 hex digits
fn parse_key(s: &str) -> Result<[u8; 16], String> {
    let bytes = parse_hex_bytes(s)?;
    <[u8; 16]>::try_from(bytes.as_slice())
        .map_err(|_| format!("Key must be 16 bytes, got {}", bytes.len()))
}

#[derive(Parser)]
#[command(name = "bankboot")]
#[command(author, version, about = "Dual-bank boot image selection", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Board layout file (TOML format)
    /// Defaults to the built-in 1 MiB demo board
    #[arg(long, global = true)]
    pub layout: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage flash image files
    #[command(subcommand)]
    Flash(FlashCommands),

    /// Build a bootable image from a raw body
    Mkimage {
        /// Image body
        #[arg(short, long)]
        input: PathBuf,

        /// Output image
        #[arg(short, long)]
        output: PathBuf,

        /// Image version (major[.minor[.revision]][+build])
        #[arg(long = "image-version", default_value = "0.0.0")]
        version: String,

        /// Header size; the body starts at this offset (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        header_size: Option<u32>,

        /// Load address for RAM-loaded images (hex or decimal)
        #[arg(long, value_parser = parse_hex_u32)]
        load_addr: Option<u32>,

        /// Mark the image position independent
        #[arg(long)]
        pic: bool,

        /// Mark the image RAM-loaded
        #[arg(long)]
        ram_load: bool,

        /// Mark the image as not bootable
        #[arg(long)]
        non_bootable: bool,

        /// Protected TLV as TYPE=HEXBYTES (repeatable)
        #[arg(long = "protected", value_parser = parse_tlv)]
        protected: Vec<(u8, Vec<u8>)>,

        /// Encrypt with this 128-bit key (32 hex digits), requires --kek
        #[arg(long, value_parser = parse_key, requires = "kek")]
        encrypt_key: Option<[u8; 16]>,

        /// Key-encryption key (32 hex digits)
        #[arg(long, value_parser = parse_key)]
        kek: Option<[u8; 16]>,
    },

    /// Show headers, validation state and geometry of every slot
    Inspect {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show or change the stored slot preference
    #[command(subcommand)]
    Prefs(PrefsCommands),

    /// Run one boot attempt against a flash image file
    Boot {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,

        /// Request the recovery image in the scratch area
        #[arg(long, conflicts_with = "gpio")]
        recovery: bool,

        /// Read the recovery button from a GPIO line
        /// (e.g. dev=/dev/gpiochip0,line=17,active_low=1)
        #[arg(long)]
        gpio: Option<String>,

        /// Key-encryption key for encrypted images (32 hex digits)
        #[arg(long, value_parser = parse_key)]
        kek: Option<[u8; 16]>,
    },

    /// Show the board layout
    Layout {
        /// Print the layout as TOML
        #[arg(long)]
        toml: bool,
    },
}

#[derive(Subcommand)]
pub enum FlashCommands {
    /// Create an erased flash image file for the board
    Init {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Write an image into an area
    Write {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,

        /// Area name or id
        #[arg(short, long)]
        area: String,

        /// Image to write
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Erase an area
    Erase {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,

        /// Area name or id
        #[arg(short, long)]
        area: String,
    },
}

#[derive(Subcommand)]
pub enum PrefsCommands {
    /// Show the stored preference
    Show {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Store an operator preference for a bank
    Set {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,

        /// Preferred bank (0 or 1)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        bank: u8,
    },

    /// Delete the stored preference
    Reset {
        /// Flash image file
        #[arg(short, long)]
        file: PathBuf,
    },
}
