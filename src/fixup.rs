//! Update-sequence ("fixup") check for multi-sector structures.
//!
//! At the end of every sector NTFS overwrites the last two bytes with the
//! Update-Sequence Number (the end tag). The original words are kept in the
//! update sequence array right after the tag.

use log::{debug, warn};

use crate::error::FixupError;

/// Verify and repair the sectors of `buf` covered by the update sequence array.
///
/// `usa_count` is the number of 2-byte entries in the array, the end tag
/// included, so `usa_count - 1` sectors are checked. On mismatch the 1-based
/// index of the offending sector is reported and `buf` must be discarded.
pub fn apply_fixups(
    buf: &mut [u8],
    usa_offset: usize,
    usa_count: usize,
    sector_size: usize,
) -> Result<(), FixupError> {
    if usa_count < 2 {
        debug!("No sector covered by the update sequence array.");
        return Ok(());
    }
    if usa_offset + 2 * usa_count > buf.len() {
        warn!("Update sequence array outside the buffer.");
        return Err(FixupError::OutOfBounds);
    }

    let end_tag = [buf[usa_offset], buf[usa_offset + 1]];

    for sector in 1..usa_count {
        let sector_end = sector * sector_size;
        if sector_end > buf.len() || sector_end < 2 {
            return Err(FixupError::OutOfBounds);
        }
        let tail = sector_end - 2;
        if buf[tail..sector_end] != end_tag {
            warn!(
                "Sector {} trailer {:02X}{:02X} does not match end tag {:02X}{:02X}.",
                sector,
                buf[tail],
                buf[tail + 1],
                end_tag[0],
                end_tag[1]
            );
            return Err(FixupError::Mismatch { sector });
        }

        let fix_pos = usa_offset + 2 * sector;
        buf[tail] = buf[fix_pos];
        buf[tail + 1] = buf[fix_pos + 1];
    }

    debug!("Patched {} sector(s) (USA check OK).", usa_count - 1);
    Ok(())
}
