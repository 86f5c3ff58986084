//! Raw sector / cluster access consumed by the record parser.
//!
//! The parser only needs the volume geometry and a single disk cursor
//! (`seek_to` + `read_bytes`). Anything implementing [`Volume`] can back it;
//! [`NtfsVolume`] is the implementation over any `Read + Seek` body.

use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{NtfsError, Result};
use crate::pbs::{BOOT_SECTOR_SIZE, PartitionBootSector};

/// Volume geometry, fixed for the lifetime of the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Geometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub bytes_per_file_record: u32,
    /// LCN of the first $MFT cluster.
    pub mft_lcn: u64,
}

impl Geometry {
    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    pub fn sectors_per_file_record(&self) -> u32 {
        self.bytes_per_file_record / self.bytes_per_sector
    }

    /// Byte offset of `lcn`, saturated so a corrupt LCN seeks past the device.
    pub fn lcn_to_offset(&self, lcn: u64) -> u64 {
        lcn.saturating_mul(self.cluster_size())
    }
}

/// Bytes of one sector, read on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Bytes of one logical cluster, read on demand. Not cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub lcn: Option<u64>,
    pub data: Vec<u8>,
}

impl Cluster {
    /// A cluster of a sparse run: no backing LCN, zero filled.
    pub fn zeroed(size: usize) -> Self {
        Self {
            lcn: None,
            data: vec![0u8; size],
        }
    }
}

/// A storage device seen through the volume geometry.
///
/// Every read goes through one cursor, so callers sharing a volume across
/// threads must serialize access themselves.
pub trait Volume {
    fn geometry(&self) -> &Geometry;

    /// Move the disk cursor to an absolute byte offset within the volume.
    fn seek_to(&mut self, offset: u64) -> Result<()>;

    /// Read up to `count` bytes at the cursor. A shorter buffer signals a short read.
    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>>;

    fn lcn_to_offset(&self, lcn: u64) -> u64 {
        self.geometry().lcn_to_offset(lcn)
    }

    fn read_sector_at(&mut self, offset: u64) -> Result<Sector> {
        let size = self.geometry().bytes_per_sector as usize;
        self.seek_to(offset)?;
        let data = self.read_bytes(size)?;
        Ok(Sector { offset, data })
    }

    fn read_lcn(&mut self, lcn: u64) -> Result<Cluster> {
        let size = self.geometry().cluster_size() as usize;
        let offset = self.lcn_to_offset(lcn);
        self.seek_to(offset)?;
        let data = self.read_bytes(size)?;
        Ok(Cluster {
            lcn: Some(lcn),
            data,
        })
    }
}

/// An NTFS partition exposed by any seekable body (raw image, body slice, ...).
#[derive(Debug)]
pub struct NtfsVolume<T: Read + Seek> {
    pub pbs: PartitionBootSector,
    pub body: T,
    geometry: Geometry,
}

impl<T: Read + Seek> NtfsVolume<T> {
    /// Open the partition by decoding its boot sector at offset 0.
    pub fn new(mut body: T) -> Result<Self> {
        body.seek(SeekFrom::Start(0))?;
        let mut sp_data = vec![0u8; BOOT_SECTOR_SIZE];
        body.read_exact(&mut sp_data)?;
        let pbs = PartitionBootSector::from_bytes(&sp_data)?;
        let geometry = pbs.geometry().inspect_err(|e| {
            error!("Cannot derive the volume geometry: {}", e);
        })?;
        debug!(
            "Opened NTFS volume: {} bytes/sector, {} sectors/cluster, {} bytes/record, $MFT at LCN {}",
            geometry.bytes_per_sector,
            geometry.sectors_per_cluster,
            geometry.bytes_per_file_record,
            geometry.mft_lcn
        );
        Ok(Self {
            pbs,
            body,
            geometry,
        })
    }

    pub fn into_inner(self) -> T {
        self.body
    }
}

impl<T: Read + Seek> Volume for NtfsVolume<T> {
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.body.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        let mut filled = 0usize;
        while filled < count {
            match self.body.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NtfsError::Io(e)),
            }
        }
        if filled < count {
            debug!("Short read: {} of {} bytes", filled, count);
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
