// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! Attribute header model: the common header, the resident / non-resident
//! split and the typed body, all decoded once per attribute.

pub mod body;
pub mod non_resident;
pub mod resident;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{NtfsError, Result};

pub use body::{
    AttributeBody, FileName, FileNamespace, StandardInformation, VolumeInformation, VolumeName,
};
pub use non_resident::{ClusterLocation, DataBlock, NonResidentAttribute};
pub use resident::ResidentAttribute;

/// Size of the header shared by resident and non-resident attributes.
pub const COMMON_HEADER_SIZE: usize = 0x10;

/// Marks the end of the attribute stream inside a record.
pub const END_OF_ATTRIBUTES: u32 = 0xFFFF_FFFF;

pub const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
pub const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTR_FLAG_SPARSE: u16 = 0x8000;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AttributeType {
    StandardInformation = 0x10,
    AttributeList = 0x20,
    FileName = 0x30,
    ObjectId = 0x40,
    SecurityDescriptor = 0x50,
    VolumeName = 0x60,
    VolumeInformation = 0x70,
    Data = 0x80,
    IndexRoot = 0x90,
    IndexAllocation = 0xA0,
    Bitmap = 0xB0,
    ReparsePoint = 0xC0,
    EaInformation = 0xD0,
    Ea = 0xE0,
    PropertySet = 0xF0,
    LoggedUtilityStream = 0x100,
}

impl TryFrom<u32> for AttributeType {
    type Error = NtfsError;
    fn try_from(value: u32) -> Result<Self> {
        use AttributeType::*;
        Ok(match value {
            0x10 => StandardInformation,
            0x20 => AttributeList,
            0x30 => FileName,
            0x40 => ObjectId,
            0x50 => SecurityDescriptor,
            0x60 => VolumeName,
            0x70 => VolumeInformation,
            0x80 => Data,
            0x90 => IndexRoot,
            0xA0 => IndexAllocation,
            0xB0 => Bitmap,
            0xC0 => ReparsePoint,
            0xD0 => EaInformation,
            0xE0 => Ea,
            0xF0 => PropertySet,
            0x100 => LoggedUtilityStream,
            _ => return Err(NtfsError::UnknownAttributeType(value)),
        })
    }
}

impl AttributeType {
    /// On-disk name, e.g. `$DATA`.
    pub fn label(&self) -> &'static str {
        use AttributeType::*;
        match self {
            StandardInformation => "$STANDARD_INFORMATION",
            AttributeList => "$ATTRIBUTE_LIST",
            FileName => "$FILE_NAME",
            ObjectId => "$OBJECT_ID",
            SecurityDescriptor => "$SECURITY_DESCRIPTOR",
            VolumeName => "$VOLUME_NAME",
            VolumeInformation => "$VOLUME_INFORMATION",
            Data => "$DATA",
            IndexRoot => "$INDEX_ROOT",
            IndexAllocation => "$INDEX_ALLOCATION",
            Bitmap => "$BITMAP",
            ReparsePoint => "$REPARSE_POINT",
            EaInformation => "$EA_INFORMATION",
            Ea => "$EA",
            PropertySet => "$PROPERTY_SET",
            LoggedUtilityStream => "$LOGGED_UTILITY_STREAM",
        }
    }
}

/// Common header part for resident & non‑resident attributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttributeHeader {
    pub attr_type: AttributeType,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub id: u16,
    pub name: Option<String>,
}

impl AttributeHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & ATTR_FLAG_COMPRESSED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & ATTR_FLAG_ENCRYPTED != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.flags & ATTR_FLAG_SPARSE != 0
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum AttributeForm {
    Resident(ResidentAttribute),
    NonResident(NonResidentAttribute),
}

/// One attribute of a file record: header, resident/non-resident part and typed body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Attribute {
    /// Byte offset of the attribute inside its record.
    pub offset: usize,
    pub header: AttributeHeader,
    pub form: AttributeForm,
    pub body: AttributeBody,
}

impl Attribute {
    /// Decode the attribute starting at `offset` in the (fixed-up) record bytes.
    ///
    /// The declared `length` bounds everything the sub-parsers may look at.
    pub fn parse(record: &[u8], offset: usize) -> Result<Self> {
        let invalid = |reason: String| NtfsError::InvalidAttribute { offset, reason };

        if offset + COMMON_HEADER_SIZE > record.len() {
            return Err(invalid("common header runs past the record".into()));
        }
        let mut cur = Cursor::new(&record[offset..]);
        let type_code = cur.read_u32::<LittleEndian>()?;
        let attr_type = AttributeType::try_from(type_code)?;
        let length = cur.read_u32::<LittleEndian>()?;
        let non_resident = cur.read_u8()? != 0;
        let name_length = cur.read_u8()?;
        let name_offset = cur.read_u16::<LittleEndian>()?;
        let flags = cur.read_u16::<LittleEndian>()?;
        let id = cur.read_u16::<LittleEndian>()?;

        let len = length as usize;
        if len < COMMON_HEADER_SIZE || offset + len > record.len() {
            return Err(invalid(format!("declared length {} is out of bounds", length)));
        }
        let raw = &record[offset..offset + len];

        let name = if name_length > 0 {
            let start = name_offset as usize;
            let end = start + name_length as usize * 2;
            if end > raw.len() {
                return Err(invalid("name runs past the attribute".into()));
            }
            Some(utf16_le(&raw[start..end]))
        } else {
            None
        };

        let header = AttributeHeader {
            attr_type,
            length,
            non_resident,
            name_length,
            name_offset,
            flags,
            id,
            name,
        };

        let form = if non_resident {
            AttributeForm::NonResident(NonResidentAttribute::parse(raw).map_err(invalid)?)
        } else {
            AttributeForm::Resident(ResidentAttribute::parse(raw).map_err(invalid)?)
        };

        // a bad body leaves the header and length usable for the walk
        let body = AttributeBody::decode(attr_type, &form).unwrap_or_else(|reason| {
            warn!(
                "{} #{} at offset 0x{:X} has an undecodable body: {}",
                attr_type.label(),
                id,
                offset,
                reason
            );
            AttributeBody::Other
        });

        debug!(
            "{} #{} at offset 0x{:X} ({} bytes, {})",
            attr_type.label(),
            id,
            offset,
            length,
            if non_resident { "non-resident" } else { "resident" }
        );

        Ok(Self {
            offset,
            header,
            form,
            body,
        })
    }

    pub fn attr_type(&self) -> AttributeType {
        self.header.attr_type
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    pub fn name(&self) -> Option<&str> {
        self.header.name.as_deref()
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.form, AttributeForm::Resident(_))
    }

    pub fn resident(&self) -> Option<&ResidentAttribute> {
        match &self.form {
            AttributeForm::Resident(r) => Some(r),
            AttributeForm::NonResident(_) => None,
        }
    }

    pub fn non_resident(&self) -> Option<&NonResidentAttribute> {
        match &self.form {
            AttributeForm::NonResident(nr) => Some(nr),
            AttributeForm::Resident(_) => None,
        }
    }

    /// Logical size of the attribute value in bytes.
    pub fn value_size(&self) -> u64 {
        match &self.form {
            AttributeForm::Resident(r) => r.value_length as u64,
            AttributeForm::NonResident(nr) => nr.data_size,
        }
    }

    /// Match rule shared by both lookup modes: an empty queried name matches an
    /// unnamed attribute with the same id, otherwise names must be equal.
    pub fn matches(&self, id: u16, attr_type: AttributeType, name: &str) -> bool {
        if self.attr_type() != attr_type {
            return false;
        }
        match self.name().filter(|n| !n.is_empty()) {
            None => name.is_empty() && self.id() == id,
            Some(own) => !name.is_empty() && own == name,
        }
    }
}

pub(crate) fn utf16_le(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
