//! Typed attribute bodies, decoded once from the resident value.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use super::{AttributeForm, AttributeType, utf16_le};

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_DELTA: i128 = 116_444_736_000_000_000;

pub fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    let unix_ticks = ft as i128 - FILETIME_UNIX_DELTA;
    let secs = i64::try_from(unix_ticks.div_euclid(10_000_000)).ok()?;
    let nanos = (unix_ticks.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Parsed $STANDARD_INFORMATION (covers v1.0, optionally v3.0 fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardInformation {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub file_attrs: u32,
    pub max_versions: u32,
    pub version_number: u32,
    pub class_id: u32,
    pub owner_id: Option<u32>,
    pub security_id: Option<u32>,
    pub quota_charged: Option<u64>,
    pub usn: Option<u64>,
}

impl StandardInformation {
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 0x30 {
            return None;
        }
        let mut cur = Cursor::new(raw);
        let created = filetime_to_datetime(cur.read_u64::<LittleEndian>().ok()?);
        let modified = filetime_to_datetime(cur.read_u64::<LittleEndian>().ok()?);
        let mft_modified = filetime_to_datetime(cur.read_u64::<LittleEndian>().ok()?);
        let accessed = filetime_to_datetime(cur.read_u64::<LittleEndian>().ok()?);
        let file_attrs = cur.read_u32::<LittleEndian>().ok()?;
        let max_versions = cur.read_u32::<LittleEndian>().ok()?;
        let version_number = cur.read_u32::<LittleEndian>().ok()?;
        let class_id = cur.read_u32::<LittleEndian>().ok()?;

        // v3.0 extension, 0x48 bytes in total
        let (owner_id, security_id, quota_charged, usn) = if raw.len() >= 0x48 {
            (
                Some(cur.read_u32::<LittleEndian>().ok()?),
                Some(cur.read_u32::<LittleEndian>().ok()?),
                Some(cur.read_u64::<LittleEndian>().ok()?),
                Some(cur.read_u64::<LittleEndian>().ok()?),
            )
        } else {
            (None, None, None, None)
        };

        Some(Self {
            created,
            modified,
            mft_modified,
            accessed,
            file_attrs,
            max_versions,
            version_number,
            class_id,
            owner_id,
            security_id,
            quota_charged,
            usn,
        })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileNamespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl FileNamespace {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Posix,
            1 => Self::Win32,
            2 => Self::Dos,
            3 => Self::Win32AndDos,
            _ => return None,
        })
    }
}

/// Parsed $FILE_NAME attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileName {
    pub parent_ref: u64,
    pub parent_seq: u16,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub reparse_value: u32,
    pub namespace: FileNamespace,
    pub name: String,
}

impl FileName {
    pub const NAME_OFFSET: usize = 0x42;

    pub fn from_bytes(raw: &[u8]) -> Result<Self, String> {
        if raw.len() < Self::NAME_OFFSET {
            return Err(format!("$FILE_NAME value is too short ({} bytes)", raw.len()));
        }
        let read_err = |e: std::io::Error| e.to_string();
        let mut cur = Cursor::new(raw);
        let parent_raw = cur.read_u64::<LittleEndian>().map_err(read_err)?;
        let created = filetime_to_datetime(cur.read_u64::<LittleEndian>().map_err(read_err)?);
        let modified = filetime_to_datetime(cur.read_u64::<LittleEndian>().map_err(read_err)?);
        let mft_modified = filetime_to_datetime(cur.read_u64::<LittleEndian>().map_err(read_err)?);
        let accessed = filetime_to_datetime(cur.read_u64::<LittleEndian>().map_err(read_err)?);
        let allocated_size = cur.read_u64::<LittleEndian>().map_err(read_err)?;
        let real_size = cur.read_u64::<LittleEndian>().map_err(read_err)?;
        let flags = cur.read_u32::<LittleEndian>().map_err(read_err)?;
        let reparse_value = cur.read_u32::<LittleEndian>().map_err(read_err)?;
        let name_len = cur.read_u8().map_err(read_err)? as usize;
        let ns = cur.read_u8().map_err(read_err)?;
        let namespace =
            FileNamespace::from_u8(ns).ok_or_else(|| format!("unknown $FILE_NAME namespace {}", ns))?;

        let name_end = Self::NAME_OFFSET + name_len * 2;
        if raw.len() < name_end {
            return Err(format!(
                "$FILE_NAME name of {} characters runs past the {} byte value",
                name_len,
                raw.len()
            ));
        }

        Ok(Self {
            parent_ref: parent_raw & 0x0000_FFFF_FFFF_FFFF,
            parent_seq: (parent_raw >> 48) as u16,
            created,
            modified,
            mft_modified,
            accessed,
            allocated_size,
            real_size,
            flags,
            reparse_value,
            namespace,
            name: utf16_le(&raw[Self::NAME_OFFSET..name_end]),
        })
    }
}

/// $VOLUME_NAME: the volume label, UTF-16.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeName {
    pub name: String,
}

/// Parsed $VOLUME_INFORMATION.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInformation {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u16,
}

impl VolumeInformation {
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 0x0C {
            return None;
        }
        Some(Self {
            major_version: raw[0x08],
            minor_version: raw[0x09],
            flags: u16::from_le_bytes([raw[0x0A], raw[0x0B]]),
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

/// Decoded body of an attribute, chosen by its type code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeBody {
    StandardInformation(StandardInformation),
    FileName(FileName),
    VolumeName(VolumeName),
    VolumeInformation(VolumeInformation),
    /// The body of $DATA is the stream itself, see `DataStream`.
    Data,
    Other,
}

impl AttributeBody {
    pub(crate) fn decode(attr_type: AttributeType, form: &AttributeForm) -> Result<Self, String> {
        let value = match (attr_type, form) {
            (AttributeType::Data, _) => return Ok(Self::Data),
            (_, AttributeForm::Resident(r)) => r.value.as_slice(),
            (
                AttributeType::StandardInformation
                | AttributeType::FileName
                | AttributeType::VolumeName
                | AttributeType::VolumeInformation,
                AttributeForm::NonResident(_),
            ) => return Err(format!("{} must be resident", attr_type.label())),
            (_, AttributeForm::NonResident(_)) => return Ok(Self::Other),
        };

        let short = || format!("{} value is too short ({} bytes)", attr_type.label(), value.len());
        Ok(match attr_type {
            AttributeType::StandardInformation => {
                Self::StandardInformation(StandardInformation::from_bytes(value).ok_or_else(short)?)
            }
            AttributeType::FileName => Self::FileName(FileName::from_bytes(value)?),
            AttributeType::VolumeName => Self::VolumeName(VolumeName {
                name: utf16_le(value),
            }),
            AttributeType::VolumeInformation => {
                Self::VolumeInformation(VolumeInformation::from_bytes(value).ok_or_else(short)?)
            }
            _ => Self::Other,
        })
    }
}
