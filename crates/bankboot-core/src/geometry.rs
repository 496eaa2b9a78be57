//! Flash geometry resolution
//!
//! Discovers the sector layout of the image banks and the scratch area,
//! enforces [`MAX_IMG_SECTORS`], and derives the write size used for any
//! status written during the boot attempt.

use crate::error::{Error, Result};
use crate::flash::{FlashArea, FlashMap, Sector};

/// Maximum number of sectors a single image area may have
pub const MAX_IMG_SECTORS: usize = 128;

/// Sector layout of one area, bounded by [`MAX_IMG_SECTORS`]
pub type SectorTable = heapless::Vec<Sector, MAX_IMG_SECTORS>;

/// Discover the sector layout of an opened area
///
/// # Errors
/// * `Geometry` - The area has more than [`MAX_IMG_SECTORS`] sectors
/// * `FlashIo` - The flash map failed to describe the area
pub fn resolve<F: FlashMap + ?Sized>(flash: &mut F, area: &FlashArea) -> Result<SectorTable> {
    let count = flash.sector_count(area).map_err(|_| Error::FlashIo)?;
    if count > MAX_IMG_SECTORS {
        log::error!(
            "Area {} has {} sectors; at most {} are supported",
            area.id,
            count,
            MAX_IMG_SECTORS
        );
        return Err(Error::Geometry);
    }

    let mut table = SectorTable::new();
    for index in 0..count {
        let sector = flash.sector(area, index).map_err(|_| Error::FlashIo)?;
        table.push(sector).map_err(|_| Error::Geometry)?;
    }

    log::debug!("Area {}: {} sectors", area.id, table.len());
    Ok(table)
}

/// Compute the write size shared by all involved areas
///
/// Status writes must satisfy the coarsest area, so this is the largest of
/// the reported alignments (at least 1).
pub fn write_size<I: IntoIterator<Item = u8>>(aligns: I) -> u8 {
    aligns.into_iter().fold(1, u8::max)
}

/// Check whether two banks have identical sector layouts
///
/// Swapping images between banks sector by sector is only possible when
/// both have the same number of sectors, no more than
/// [`MAX_IMG_SECTORS`], and equal sizes at every index. An incompatible
/// layout only disables upgrades; it never prevents a direct boot.
pub fn slots_compatible(slot0: &[Sector], slot1: &[Sector]) -> bool {
    if slot0.len() > MAX_IMG_SECTORS || slot1.len() > MAX_IMG_SECTORS {
        log::warn!("Cannot upgrade: more sectors than allowed");
        return false;
    }

    if slot0.len() != slot1.len() {
        log::warn!("Cannot upgrade: number of sectors differ between slots");
        return false;
    }

    if slot0.iter().zip(slot1).any(|(s0, s1)| s0.size != s1.size) {
        log::warn!("Cannot upgrade: an incompatible sector was found");
        return false;
    }

    true
}

/// Total number of bytes covered by a sector table
pub fn total_size(sectors: &[Sector]) -> u32 {
    sectors.iter().map(|s| s.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::AreaId;
    use crate::testutil::{MockArea, MockFlash};
    use std::vec::Vec;

    fn uniform(count: usize, size: u32) -> Vec<Sector> {
        (0..count)
            .map(|i| Sector {
                offset: i as u32 * size,
                size,
            })
            .collect()
    }

    #[test]
    fn test_resolve_uniform_area() {
        let mut flash = MockFlash::new(&[MockArea::uniform(AreaId::IMAGE_0, 0, 16, 4096)]);
        let area = flash.open_area(AreaId::IMAGE_0);

        let table = resolve(&mut flash, &area).unwrap();
        assert_eq!(table.len(), 16);
        assert_eq!(table[3], Sector { offset: 3 * 4096, size: 4096 });
        assert_eq!(total_size(&table), 16 * 4096);
    }

    #[test]
    fn test_resolve_at_limit() {
        let mut flash = MockFlash::new(&[MockArea::uniform(
            AreaId::IMAGE_0,
            0,
            MAX_IMG_SECTORS,
            512,
        )]);
        let area = flash.open_area(AreaId::IMAGE_0);
        assert_eq!(resolve(&mut flash, &area).unwrap().len(), MAX_IMG_SECTORS);
    }

    #[test]
    fn test_resolve_too_many_sectors() {
        let mut flash = MockFlash::new(&[MockArea::uniform(
            AreaId::IMAGE_0,
            0,
            MAX_IMG_SECTORS + 1,
            512,
        )]);
        let area = flash.open_area(AreaId::IMAGE_0);
        assert_eq!(resolve(&mut flash, &area), Err(Error::Geometry));
    }

    #[test]
    fn test_resolve_read_failure_is_flash_io() {
        let mut flash = MockFlash::new(&[MockArea::uniform(AreaId::IMAGE_0, 0, 4, 4096)]);
        let area = flash.open_area(AreaId::IMAGE_0);
        flash.fail_geometry(AreaId::IMAGE_0);
        assert_eq!(resolve(&mut flash, &area), Err(Error::FlashIo));
    }

    #[test]
    fn test_write_size_is_maximum() {
        assert_eq!(write_size([1, 8, 4]), 8);
        assert_eq!(write_size([4, 4]), 4);
        assert_eq!(write_size(core::iter::empty()), 1);
    }

    #[test]
    fn test_compatible_identical_layouts() {
        let a = uniform(8, 4096);
        assert!(slots_compatible(&a, &a.clone()));
        assert!(slots_compatible(&[], &[]));
    }

    #[test]
    fn test_incompatible_counts() {
        assert!(!slots_compatible(&uniform(8, 4096), &uniform(7, 4096)));
    }

    #[test]
    fn test_incompatible_sector_size_at_any_index() {
        let a = uniform(8, 4096);
        for i in 0..a.len() {
            let mut b = a.clone();
            b[i].size = 2048;
            assert!(!slots_compatible(&a, &b), "mismatch at index {} not detected", i);
        }
    }

    #[test]
    fn test_incompatible_beyond_limit() {
        let a = uniform(MAX_IMG_SECTORS + 1, 256);
        assert!(!slots_compatible(&a, &a.clone()));
    }
}
