// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, error};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::io::Cursor;

use crate::attribute::{
    Attribute, AttributeBody, AttributeForm, AttributeType, END_OF_ATTRIBUTES, FileName,
    FileNamespace, StandardInformation,
};
use crate::error::{NtfsError, Result};
use crate::fixup::apply_fixups;
use crate::stream::DataStream;
use crate::volume::{Geometry, Volume};

pub const FILE_RECORD_MAGIC: [u8; 4] = *b"FILE";
pub const FILE_RECORD_HEADER_SIZE: usize = 0x30;

pub const FLAG_IN_USE: u16 = 0x0001;
pub const FLAG_DIRECTORY: u16 = 0x0002;

/// Header found at the very beginning of every **FILE** record (offset 0).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileRecordHeader {
    pub signature: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_file_record: u64,
    pub next_attr_id: u16,
    pub record_number: u32,
}

impl FileRecordHeader {
    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < FILE_RECORD_HEADER_SIZE {
            return Err(NtfsError::InvalidRecord {
                field: "length",
                reason: format!("{} bytes is shorter than the record header", raw.len()),
            });
        }

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&raw[0..4]);
        if signature != FILE_RECORD_MAGIC {
            error!(
                "Record signature is not 'FILE', found: {}",
                String::from_utf8_lossy(&signature)
            );
            return Err(NtfsError::InvalidRecord {
                field: "magic",
                reason: format!("signature is {:02X?}", signature),
            });
        }

        let mut cur = Cursor::new(&raw[4..FILE_RECORD_HEADER_SIZE]);
        let usa_offset = cur.read_u16::<LittleEndian>()?;
        let usa_count = cur.read_u16::<LittleEndian>()?;
        let lsn = cur.read_u64::<LittleEndian>()?;
        let sequence_number = cur.read_u16::<LittleEndian>()?;
        let hard_link_count = cur.read_u16::<LittleEndian>()?;
        let attrs_offset = cur.read_u16::<LittleEndian>()?;
        let flags = cur.read_u16::<LittleEndian>()?;
        let bytes_in_use = cur.read_u32::<LittleEndian>()?;
        let bytes_allocated = cur.read_u32::<LittleEndian>()?;
        let base_file_record = cur.read_u64::<LittleEndian>()?;
        let next_attr_id = cur.read_u16::<LittleEndian>()?;
        cur.read_u16::<LittleEndian>()?; // alignment
        let record_number = cur.read_u32::<LittleEndian>()?;

        Ok(Self {
            signature,
            usa_offset,
            usa_count,
            lsn,
            sequence_number,
            hard_link_count,
            attrs_offset,
            flags,
            bytes_in_use,
            bytes_allocated,
            base_file_record,
            next_attr_id,
            record_number,
        })
    }
}

/// Lazy walk over the attributes of a fixed-up record buffer.
///
/// Each attribute's declared length moves the cursor, whatever its sub-parser
/// consumed. The walk ends at the `0xFFFFFFFF` marker, at the record's used
/// size, or after the first error.
pub struct AttributeIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> AttributeIter<'a> {
    pub fn new(record: &'a [u8], first_offset: usize, used_size: usize) -> Self {
        let end = used_size.min(record.len());
        Self {
            data: &record[..end],
            offset: first_offset,
            done: false,
        }
    }
}

impl Iterator for AttributeIter<'_> {
    type Item = Result<Attribute>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + 4 > self.data.len() {
            return None;
        }
        let code = u32::from_le_bytes([
            self.data[self.offset],
            self.data[self.offset + 1],
            self.data[self.offset + 2],
            self.data[self.offset + 3],
        ]);
        if code == END_OF_ATTRIBUTES {
            self.done = true;
            return None;
        }

        match Attribute::parse(self.data, self.offset) {
            Ok(attr) => {
                self.offset += attr.header.length as usize;
                Some(Ok(attr))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Scan raw record bytes for an attribute without materializing the others.
pub fn find_attribute_in_bytes(
    attributes: AttributeIter<'_>,
    id: u16,
    attr_type: AttributeType,
    name: &str,
) -> Result<Option<Attribute>> {
    for attr in attributes {
        let attr = attr?;
        if attr.matches(id, attr_type, name) {
            return Ok(Some(attr));
        }
    }
    Ok(None)
}

/// Scan an already materialized attribute list.
pub fn find_attribute_in_list<'a>(
    attributes: &'a [Attribute],
    id: u16,
    attr_type: AttributeType,
    name: &str,
) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.matches(id, attr_type, name))
}

/// One NTFS file record, fixed up, with its attributes parsed on demand.
///
/// Records compare and order by record number only; two incarnations of the
/// same slot (different sequence numbers) compare equal.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecord {
    pub header: FileRecordHeader,
    #[serde(skip)]
    data: Vec<u8>,
    attributes: Vec<Attribute>,
    attributes_read: bool,
}

impl FileRecord {
    /// Validate the header and apply the fixups of a raw record block.
    pub fn from_bytes(raw: &[u8], geometry: &Geometry) -> Result<Self> {
        let header = FileRecordHeader::parse(raw)?;

        if header.usa_count.saturating_sub(1) as u32 > geometry.sectors_per_file_record() {
            return Err(NtfsError::InvalidRecord {
                field: "usa_count",
                reason: format!(
                    "update sequence size {} exceeds the {} sector(s) of a file record",
                    header.usa_count,
                    geometry.sectors_per_file_record()
                ),
            });
        }

        // we need a mutable copy so we can patch the USNs in‑place
        let mut data = raw.to_vec();
        apply_fixups(
            &mut data,
            header.usa_offset as usize,
            header.usa_count as usize,
            geometry.bytes_per_sector as usize,
        )?;

        Ok(Self {
            header,
            data,
            attributes: Vec::new(),
            attributes_read: false,
        })
    }

    /// Read record `number` assuming the file table is contiguous from its first LCN.
    pub fn from_record_number<V: Volume + ?Sized>(volume: &mut V, number: u64) -> Result<Self> {
        let geometry = *volume.geometry();
        let record_size = geometry.bytes_per_file_record as usize;
        let offset = number
            .checked_mul(geometry.bytes_per_file_record as u64)
            .and_then(|o| o.checked_add(volume.lcn_to_offset(geometry.mft_lcn)))
            .ok_or(NtfsError::RecordNotFound(number))?;

        volume.seek_to(offset)?;
        let raw = volume.read_bytes(record_size)?;
        if raw.len() < record_size {
            return Err(NtfsError::InvalidRecord {
                field: "length",
                reason: format!("short read of record {} at 0x{:X}", number, offset),
            });
        }
        debug!("MFT entry {} read from offset 0x{:X}", number, offset);
        Self::from_bytes(&raw, &geometry)
    }

    /// Lazily walk the record's attributes in on-disk order.
    pub fn attribute_iter(&self) -> AttributeIter<'_> {
        AttributeIter::new(
            &self.data,
            self.header.attrs_offset as usize,
            self.header.bytes_in_use as usize,
        )
    }

    /// Parse every attribute and keep them. Calling it again re-parses.
    pub fn read_attributes(&mut self) -> Result<&[Attribute]> {
        self.attributes = self.attribute_iter().collect::<Result<Vec<_>>>()?;
        self.attributes_read = true;
        debug!(
            "Record {} has {} attribute(s).",
            self.header.record_number,
            self.attributes.len()
        );
        Ok(&self.attributes)
    }

    pub fn attributes_read(&self) -> bool {
        self.attributes_read
    }

    /// Materialized attributes; empty until `read_attributes` ran.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn has_attribute(&self, attr_type: AttributeType) -> bool {
        self.attributes.iter().any(|a| a.attr_type() == attr_type)
    }

    pub fn find_attributes_by_type(
        &self,
        attr_type: AttributeType,
    ) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(move |a| a.attr_type() == attr_type)
    }

    pub fn find_attribute_by_type(&self, attr_type: AttributeType) -> Option<&Attribute> {
        self.find_attributes_by_type(attr_type).next()
    }

    pub fn find_attribute_body_by_type(&self, attr_type: AttributeType) -> Option<&AttributeBody> {
        self.find_attribute_by_type(attr_type).map(|a| &a.body)
    }

    /// Look an attribute up by type and either name or (for unnamed ones) id.
    ///
    /// Scans the record bytes when attributes have not been materialized,
    /// the materialized list otherwise.
    pub fn find_attribute(
        &self,
        id: u16,
        attr_type: AttributeType,
        name: &str,
    ) -> Result<Option<Cow<'_, Attribute>>> {
        if self.attributes_read {
            Ok(find_attribute_in_list(&self.attributes, id, attr_type, name).map(Cow::Borrowed))
        } else {
            Ok(find_attribute_in_bytes(self.attribute_iter(), id, attr_type, name)?
                .map(Cow::Owned))
        }
    }

    pub fn file_names(&self) -> impl Iterator<Item = &FileName> {
        self.find_attributes_by_type(AttributeType::FileName)
            .filter_map(|a| match &a.body {
                AttributeBody::FileName(f) => Some(f),
                _ => None,
            })
    }

    /// The first non-DOS name, else a DOS name, else an empty string.
    pub fn filename(&self) -> String {
        let mut fallback = None;
        for f in self.file_names() {
            if f.namespace != FileNamespace::Dos {
                return f.name.clone();
            }
            fallback.get_or_insert_with(|| f.name.clone());
        }
        fallback.unwrap_or_default()
    }

    pub fn standard_information(&self) -> Option<&StandardInformation> {
        match self.find_attribute_body_by_type(AttributeType::StandardInformation) {
            Some(AttributeBody::StandardInformation(si)) => Some(si),
            _ => None,
        }
    }

    /// The unnamed $DATA stream.
    pub fn file_stream(&self) -> Option<DataStream<'_>> {
        self.find_attributes_by_type(AttributeType::Data)
            .find(|a| a.header.name_length == 0)
            .map(DataStream::new)
    }

    /// Alternate data streams (named $DATA attributes).
    pub fn data_streams(&self) -> Vec<DataStream<'_>> {
        self.find_attributes_by_type(AttributeType::Data)
            .filter(|a| a.header.name_length > 0)
            .map(DataStream::new)
            .collect()
    }

    pub fn record_number(&self) -> u32 {
        self.header.record_number
    }

    pub fn sequence_number(&self) -> u16 {
        self.header.sequence_number
    }

    pub fn is_in_use(&self) -> bool {
        self.header.flags & FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.header.flags & FLAG_DIRECTORY != 0
    }

    /// Record number of the base record, 0 unless this is an extension record.
    pub fn base_file_reference(&self) -> u64 {
        self.header.base_file_record & 0x0000_FFFF_FFFF_FFFF
    }

    /// Fixed-up bytes of the record.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert record to a human‑readable table string.
    pub fn to_string(&self) -> String {
        let mut out = String::new();

        let mut hdr = Table::new();
        hdr.add_row(row!["MFT Entry Header Values"]);
        hdr.add_row(row![b -> "Record", self.header.record_number]);
        hdr.add_row(row![b -> "Sequence", self.header.sequence_number]);
        hdr.add_row(row![b -> "$LogFile Sequence Number", self.header.lsn]);
        hdr.add_row(row![b -> "Flags", record_flags_to_string(self.header.flags)]);
        hdr.add_row(row![b -> "Links", self.header.hard_link_count]);
        hdr.add_row(row![b -> "Used / Allocated", format!("{} / {}", self.header.bytes_in_use, self.header.bytes_allocated)]);
        if self.base_file_reference() != 0 {
            hdr.add_row(row![b -> "Base record", self.base_file_reference()]);
        }
        hdr.add_row(row![b -> "Name", self.filename()]);
        out.push_str(&hdr.to_string());

        let mut attrs = Table::new();
        attrs.add_row(row!["Attributes", "Name", "Status", "Size"]);
        for a in &self.attributes {
            let status = match &a.form {
                AttributeForm::Resident(_) => "Resident".to_string(),
                AttributeForm::NonResident(nr) if nr.run_list_corrupt => {
                    "Non‑resident (corrupt runs)".to_string()
                }
                AttributeForm::NonResident(nr) => {
                    format!("Non‑resident ({} runs)", nr.data_blocks.len())
                }
            };
            attrs.add_row(row![
                format!("{} (0x{:X}‑#{})", a.attr_type().label(), a.attr_type() as u32, a.id()),
                a.name().unwrap_or("N/A"),
                status,
                a.value_size()
            ]);
        }
        out.push('\n');
        out.push_str(&attrs.to_string());

        for a in &self.attributes {
            let Some(nr) = a.non_resident() else {
                continue;
            };
            if nr.data_blocks.is_empty() {
                continue;
            }
            let mut runs = Table::new();
            runs.add_row(row![format!("{} data runs", a.attr_type().label()), "Last VCN", "LCN", "Clusters"]);
            for (block, lcn) in nr.data_blocks.iter().zip(nr.block_lcns()) {
                runs.add_row(row![
                    block.start_vcn,
                    block.last_vcn,
                    lcn.map_or("sparse".to_string(), |l| l.to_string()),
                    block.run_length
                ]);
            }
            out.push('\n');
            out.push_str(&runs.to_string());
        }

        if let Some(std) = self.standard_information() {
            let stamp = |d: &Option<chrono::DateTime<chrono::Utc>>| {
                d.map(|d| d.to_rfc3339()).unwrap_or_else(|| "‑".into())
            };
            let mut t = Table::new();
            t.add_row(row!["$STANDARD_INFORMATION"]);
            t.add_row(row![b -> "Created", stamp(&std.created)]);
            t.add_row(row![b -> "File Modified", stamp(&std.modified)]);
            t.add_row(row![b -> "MFT Modified", stamp(&std.mft_modified)]);
            t.add_row(row![b -> "Accessed", stamp(&std.accessed)]);
            t.add_row(row![b -> "Flags", file_attrs_to_string(std.file_attrs)]);
            out.push('\n');
            out.push_str(&t.to_string());
        }

        let mut names = Table::new();
        names.add_row(row!["$FILE_NAME Attributes", "Namespace", "Parent"]);
        let mut any = false;
        for f in self.file_names() {
            any = true;
            names.add_row(row![f.name, format!("{:?}", f.namespace), format!("{} (seq {})", f.parent_ref, f.parent_seq)]);
        }
        if any {
            out.push('\n');
            out.push_str(&names.to_string());
        }

        out
    }

    /// Serialize to JSON (uses `serde`).
    pub fn to_json(&self) -> Value {
        json!({
            "header": &self.header,
            "name": self.filename(),
            "attributes": &self.attributes,
        })
    }
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.header.record_number == other.header.record_number
    }
}

impl Eq for FileRecord {}

impl PartialOrd for FileRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.header.record_number.cmp(&other.header.record_number)
    }
}

fn record_flags_to_string(flags: u16) -> String {
    let mut v = Vec::new();
    if flags & FLAG_IN_USE != 0 {
        v.push("InUse")
    }
    if flags & FLAG_DIRECTORY != 0 {
        v.push("Directory")
    }
    if v.is_empty() {
        "None".into()
    } else {
        v.join(" | ")
    }
}

fn file_attrs_to_string(flags: u32) -> String {
    const NAMES: [(u32, &str); 10] = [
        (0x0001, "READONLY"),
        (0x0002, "HIDDEN"),
        (0x0004, "SYSTEM"),
        (0x0020, "ARCHIVE"),
        (0x0100, "TEMPORARY"),
        (0x0200, "SPARSE_FILE"),
        (0x0400, "REPARSE_POINT"),
        (0x0800, "COMPRESSED"),
        (0x1000, "OFFLINE"),
        (0x4000, "ENCRYPTED"),
    ];
    let set: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if set.is_empty() {
        "None".into()
    } else {
        set.join(" | ")
    }
}
