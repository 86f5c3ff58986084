// Sources:
// - https://en.wikipedia.org/wiki/NTFS
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf

//! NTFS partition boot sector and the volume geometry derived from it.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{Cursor, Seek, SeekFrom};

use crate::error::{NtfsError, Result};
use crate::volume::Geometry;

pub const BOOT_SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionBootSector {
    pub oem_id: [u8; 8],              // 0x03 "NTFS    "
    pub bytes_per_sector: u16,        // 0x0B
    pub sectors_per_cluster: u8,      // 0x0D
    pub media_descriptor: u8,         // 0x15
    pub hidden_sectors: u32,          // 0x1C
    pub total_sectors: u64,           // 0x28
    pub mft_cluster: u64,             // 0x30
    pub mft_mirror_cluster: u64,      // 0x38
    pub clusters_per_file_record: i8, // 0x40 (negative: 2^-n bytes)
    pub clusters_per_index_buffer: i8, // 0x44
    pub volume_serial_number: u64,    // 0x48
    pub end_of_sector_marker: u16,    // 0x1FE
}

impl PartitionBootSector {
    pub const NTFS_OEM_ID: [u8; 8] = *b"NTFS    ";

    /// Decode the first 512 bytes of an NTFS partition.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(NtfsError::InvalidBootSector(format!(
                "boot sector needs {} bytes, got {}",
                BOOT_SECTOR_SIZE,
                buf.len()
            )));
        }
        let mut c = Cursor::new(buf);

        macro_rules! at {
            ($off:expr) => {
                c.seek(SeekFrom::Start($off))?
            };
        }

        let mut oem_id = [0u8; 8];
        oem_id.copy_from_slice(&buf[0x03..0x0B]);

        at!(0x0B);
        let bytes_per_sector = c.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = c.read_u8()?;
        at!(0x15);
        let media_descriptor = c.read_u8()?;
        at!(0x1C);
        let hidden_sectors = c.read_u32::<LittleEndian>()?;
        at!(0x28);
        let total_sectors = c.read_u64::<LittleEndian>()?;
        let mft_cluster = c.read_u64::<LittleEndian>()?;
        let mft_mirror_cluster = c.read_u64::<LittleEndian>()?;
        let clusters_per_file_record = c.read_i8()?;
        at!(0x44);
        let clusters_per_index_buffer = c.read_i8()?;
        at!(0x48);
        let volume_serial_number = c.read_u64::<LittleEndian>()?;
        at!(0x1FE);
        let end_of_sector_marker = c.read_u16::<LittleEndian>()?;

        Ok(Self {
            oem_id,
            bytes_per_sector,
            sectors_per_cluster,
            media_descriptor,
            hidden_sectors,
            total_sectors,
            mft_cluster,
            mft_mirror_cluster,
            clusters_per_file_record,
            clusters_per_index_buffer,
            volume_serial_number,
            end_of_sector_marker,
        })
    }

    /// Check if the oem_id is valid
    pub fn oem_id_is_valid(&self) -> bool {
        self.oem_id == Self::NTFS_OEM_ID
    }

    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// Compute actual bytes per file-record segment
    pub fn file_record_size(&self) -> u32 {
        if self.clusters_per_file_record > 0 {
            self.clusters_per_file_record as u32 * self.cluster_size()
        } else {
            1u32.checked_shl(-(self.clusters_per_file_record as i32) as u32)
                .unwrap_or(0)
        }
    }

    /// Validate the fields the record parser depends on and derive the geometry.
    pub fn geometry(&self) -> Result<Geometry> {
        if !self.oem_id_is_valid() {
            return Err(NtfsError::InvalidBootSector(format!(
                "OEM identifier is {:?}",
                String::from_utf8_lossy(&self.oem_id)
            )));
        }
        if !self.bytes_per_sector.is_power_of_two() {
            return Err(NtfsError::InvalidBootSector(format!(
                "bytes per sector {} is not a power of two",
                self.bytes_per_sector
            )));
        }
        if !self.sectors_per_cluster.is_power_of_two() {
            return Err(NtfsError::InvalidBootSector(format!(
                "sectors per cluster {} is not a power of two",
                self.sectors_per_cluster
            )));
        }
        let record_size = self.file_record_size();
        if record_size < self.bytes_per_sector as u32
            || record_size % self.bytes_per_sector as u32 != 0
        {
            return Err(NtfsError::InvalidBootSector(format!(
                "file record size {} is not a multiple of the sector size {}",
                record_size, self.bytes_per_sector
            )));
        }

        Ok(Geometry {
            bytes_per_sector: self.bytes_per_sector as u32,
            sectors_per_cluster: self.sectors_per_cluster as u32,
            bytes_per_file_record: record_size,
            mft_lcn: self.mft_cluster,
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    pub fn to_string(&self) -> String {
        use prettytable::{Table, row};

        let mut t = Table::new();
        t.add_row(row!["Partition Boot Sector"]);
        t.add_row(row![b -> "OEM ID", String::from_utf8_lossy(&self.oem_id)]);
        t.add_row(row![b -> "Bytes per sector", self.bytes_per_sector]);
        t.add_row(row![b -> "Sectors per cluster", self.sectors_per_cluster]);
        t.add_row(row![b -> "Cluster size", self.cluster_size()]);
        t.add_row(row![b -> "Total sectors", self.total_sectors]);
        t.add_row(row![b -> "$MFT LCN", self.mft_cluster]);
        t.add_row(row![b -> "$MFTMirr LCN", self.mft_mirror_cluster]);
        t.add_row(row![b -> "File record size", self.file_record_size()]);
        t.add_row(row![b -> "Serial number", format!("{:016X}", self.volume_serial_number)]);
        t.to_string()
    }
}
