//! Image building

use bankboot_core::image::{ImageFlags, ImageVersion, KeyMaterial};
use bankboot_sim::ImageBuilder;
use std::fs;
use std::path::Path;

/// Options for [`cmd_mkimage`]
#[derive(Debug)]
pub struct MkimageOptions {
    pub version: String,
    pub header_size: Option<u32>,
    pub load_addr: Option<u32>,
    pub flags: ImageFlags,
    pub protected: Vec<(u8, Vec<u8>)>,
    pub encrypt_key: Option<[u8; 16]>,
    pub kek: Option<[u8; 16]>,
}

/// Build a signed image from a raw body
pub fn cmd_mkimage(
    input: &Path,
    output: &Path,
    opts: MkimageOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let version: ImageVersion = opts
        .version
        .parse()
        .map_err(|_| format!("Invalid image version: {}", opts.version))?;
    let body = fs::read(input)?;
    let body_len = body.len();

    let mut builder = ImageBuilder::new(version).body(body).flags(opts.flags);
    if let Some(size) = opts.header_size {
        let size = u16::try_from(size).map_err(|_| format!("Header size too large: {}", size))?;
        builder = builder.header_size(size);
    }
    if let Some(addr) = opts.load_addr {
        builder = builder.load_addr(addr);
    }
    for (kind, value) in &opts.protected {
        builder = builder.protected_tlv(*kind, value);
    }
    if let Some(key) = opts.encrypt_key {
        let kek = opts.kek.ok_or("--encrypt-key requires --kek")?;
        builder = builder.encryption_key(&KeyMaterial::new(key), &KeyMaterial::new(kek));
    }

    let hdr = builder.header()?;
    let image = builder.build()?;
    fs::write(output, &image)?;

    println!("Image version {}", hdr.version);
    println!("  Header:  {} bytes", hdr.hdr_size);
    println!("  Body:    {} bytes", body_len);
    println!("  Flags:   {:?}", hdr.flags);
    println!("  Total:   {} bytes", image.len());
    println!("Saved to {}", output.display());
    Ok(())
}
