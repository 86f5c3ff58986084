// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! The master file table: the seed records read by raw sector walk, and
//! record lookup through `$MFT`'s own DATA runs once those are known.

use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::attribute::{
    Attribute, AttributeBody, AttributeForm, AttributeType, NonResidentAttribute,
    VolumeInformation,
};
use crate::error::{NtfsError, Result};
use crate::record::FileRecord;
use crate::volume::{Geometry, Volume};

/// Number of records read by the bootstrap walk.
pub const BOOTSTRAP_RECORDS: u64 = 16;

pub const MFT: u64 = 0;
pub const MFT_MIRROR: u64 = 1;
pub const LOG_FILE: u64 = 2;
pub const VOLUME: u64 = 3;
pub const ATTR_DEF: u64 = 4;
pub const ROOT: u64 = 5;
pub const BITMAP: u64 = 6;
pub const BOOT: u64 = 7;
pub const BAD_CLUS: u64 = 8;
pub const SECURE: u64 = 9;
pub const UP_CASE: u64 = 10;
pub const EXTEND: u64 = 11;

#[derive(Debug, Clone)]
pub struct MasterFileTable {
    geometry: Geometry,
    table: Vec<Option<FileRecord>>,
}

impl MasterFileTable {
    /// Read the first [`BOOTSTRAP_RECORDS`] records sector by sector from the
    /// `$MFT` start LCN.
    ///
    /// A record failing validation is kept as `None`. Record 0 is mandatory,
    /// everything else depends on its DATA runs.
    pub fn bootstrap<V: Volume + ?Sized>(volume: &mut V) -> Result<Self> {
        let geometry = *volume.geometry();
        let sector_size = geometry.bytes_per_sector as usize;
        let sectors_per_record = geometry.sectors_per_file_record();
        let mut offset = volume.lcn_to_offset(geometry.mft_lcn);

        let mut table = Vec::with_capacity(BOOTSTRAP_RECORDS as usize);
        for number in 0..BOOTSTRAP_RECORDS {
            let mut raw = Vec::with_capacity(geometry.bytes_per_file_record as usize);
            for _ in 0..sectors_per_record {
                let sector = volume.read_sector_at(offset)?;
                if sector.data.len() < sector_size {
                    return Err(NtfsError::InvalidRecord {
                        field: "length",
                        reason: format!("short sector read at 0x{:X} (record {})", offset, number),
                    });
                }
                raw.extend_from_slice(&sector.data);
                offset += sector_size as u64;
            }

            match load_bootstrap_record(&raw, &geometry) {
                Ok(record) => table.push(Some(record)),
                Err(e) => {
                    warn!("Bootstrap record {} is unusable: {}", number, e);
                    table.push(None);
                }
            }
        }

        if table[MFT as usize].is_none() {
            return Err(NtfsError::RecordNotFound(MFT));
        }
        info!(
            "Bootstrapped {} of {} system records.",
            table.iter().flatten().count(),
            BOOTSTRAP_RECORDS
        );

        Ok(Self { geometry, table })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// One of the bootstrap records, `None` if out of range or unusable.
    pub fn record(&self, number: u64) -> Option<&FileRecord> {
        self.table.get(number as usize).and_then(|r| r.as_ref())
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.table.iter().flatten()
    }

    /// The unnamed DATA attribute of `$MFT`, mapping the whole table.
    pub fn mft_data_attribute(&self) -> Result<&Attribute> {
        let mft = self.record(MFT).ok_or(NtfsError::RecordNotFound(MFT))?;
        mft.find_attributes_by_type(AttributeType::Data)
            .find(|a| a.header.name_length == 0)
            .ok_or(NtfsError::RecordNotFound(MFT))
    }

    pub fn mft_data(&self) -> Result<&NonResidentAttribute> {
        match &self.mft_data_attribute()?.form {
            AttributeForm::NonResident(nr) => Ok(nr),
            AttributeForm::Resident(_) => Err(NtfsError::NotNonResident),
        }
    }

    /// Number of record slots described by `$MFT`'s DATA size.
    pub fn record_count(&self) -> Result<u64> {
        Ok(self.mft_data()?.data_size / self.geometry.bytes_per_file_record as u64)
    }

    /// Read any record through `$MFT`'s DATA run list.
    pub fn read_record<V: Volume + ?Sized>(&self, volume: &mut V, number: u64) -> Result<FileRecord> {
        let data = self.mft_data()?;
        let record_size = self.geometry.bytes_per_file_record as u64;
        let offset = number
            .checked_mul(record_size)
            .filter(|o| o.saturating_add(record_size) <= data.data_size)
            .ok_or(NtfsError::RecordNotFound(number))?;

        let (raw, read) = data.read_at_offset(volume, offset, record_size as usize)?;
        if read != record_size as usize {
            return Err(NtfsError::ShortRead { offset });
        }
        debug!("MFT entry {} read from stream offset 0x{:X}", number, offset);

        let mut record = FileRecord::from_bytes(&raw, &self.geometry)?;
        record.read_attributes()?;
        Ok(record)
    }

    /// Label of the volume, from the VOLUME_NAME of `$Volume`.
    pub fn volume_name(&self) -> Option<&str> {
        match self
            .record(VOLUME)?
            .find_attribute_body_by_type(AttributeType::VolumeName)?
        {
            AttributeBody::VolumeName(v) => Some(v.name.as_str()),
            _ => None,
        }
    }

    pub fn volume_information(&self) -> Option<&VolumeInformation> {
        match self
            .record(VOLUME)?
            .find_attribute_body_by_type(AttributeType::VolumeInformation)?
        {
            AttributeBody::VolumeInformation(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let records: Vec<Value> = self
            .table
            .iter()
            .enumerate()
            .map(|(n, r)| match r {
                Some(r) => json!({ "record": n, "name": r.filename(), "in_use": r.is_in_use() }),
                None => json!({ "record": n, "name": Value::Null }),
            })
            .collect();
        json!({
            "volume_name": self.volume_name(),
            "record_count": self.record_count().ok(),
            "records": records,
        })
    }
}

fn load_bootstrap_record(raw: &[u8], geometry: &Geometry) -> Result<FileRecord> {
    let mut record = FileRecord::from_bytes(raw, geometry)?;
    record.read_attributes()?;
    Ok(record)
}
