use serde::{Deserialize, Serialize};

/// Additional 8‑byte header present only when the attribute is resident,
/// with the value copied out of the record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResidentAttribute {
    pub value_length: u32,
    pub value_offset: u16,
    pub indexed: bool,
    pub value: Vec<u8>,
}

impl ResidentAttribute {
    pub const HEADER_END: usize = 0x18;

    /// `raw` is the whole attribute, bounded by its declared length.
    pub fn parse(raw: &[u8]) -> Result<Self, String> {
        if raw.len() < Self::HEADER_END {
            return Err("resident header runs past the attribute".into());
        }
        let value_length = u32::from_le_bytes([raw[0x10], raw[0x11], raw[0x12], raw[0x13]]);
        let value_offset = u16::from_le_bytes([raw[0x14], raw[0x15]]);
        let indexed = raw[0x16] & 0x01 != 0;

        let start = value_offset as usize;
        let end = start + value_length as usize;
        if end > raw.len() {
            return Err(format!(
                "resident value [{:#x}, {:#x}) runs past the attribute length {:#x}",
                start,
                end,
                raw.len()
            ));
        }

        Ok(Self {
            value_length,
            value_offset,
            indexed,
            value: raw[start..end].to_vec(),
        })
    }
}
