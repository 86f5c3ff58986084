//! Byte-level view over one $DATA attribute, resident or not.

use log::debug;
use std::cmp::min;
use std::io::Write;

use crate::attribute::{Attribute, AttributeForm};
use crate::error::{NtfsError, Result};
use crate::volume::Volume;

/// Target size of one `copy_to` chunk, rounded to whole clusters.
const COPY_CHUNK: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct DataStream<'a> {
    attribute: &'a Attribute,
}

impl<'a> DataStream<'a> {
    pub fn new(attribute: &'a Attribute) -> Self {
        Self { attribute }
    }

    pub fn attribute(&self) -> &'a Attribute {
        self.attribute
    }

    /// Stream name, `None` for the unnamed (main) stream.
    pub fn name(&self) -> Option<&'a str> {
        self.attribute.name()
    }

    pub fn len(&self) -> u64 {
        self.attribute.value_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_resident(&self) -> bool {
        self.attribute.is_resident()
    }

    pub fn resident_value(&self) -> Option<&'a [u8]> {
        self.attribute.resident().map(|r| r.value.as_slice())
    }

    /// Read `length` bytes at `offset`, clamped to the stream size.
    pub fn read_at<V: Volume + ?Sized>(
        &self,
        volume: &mut V,
        offset: u64,
        length: usize,
    ) -> Result<(Vec<u8>, usize)> {
        match &self.attribute.form {
            AttributeForm::NonResident(nr) => nr.read_at_offset(volume, offset, length),
            AttributeForm::Resident(r) => {
                let size = r.value.len() as u64;
                if offset > size {
                    return Err(NtfsError::OffsetOutOfRange { offset, size });
                }
                let start = offset as usize;
                let end = start + min(length, r.value.len() - start);
                let data = r.value[start..end].to_vec();
                let read = data.len();
                Ok((data, read))
            }
        }
    }

    /// Stream the whole content into `sink`, sparse runs as zeros.
    pub fn copy_to<V: Volume + ?Sized, W: Write>(&self, volume: &mut V, sink: &mut W) -> Result<u64> {
        let total = self.len();
        let cluster_size = volume.geometry().cluster_size().max(1);
        let chunk = ((COPY_CHUNK / cluster_size).max(1) * cluster_size) as usize;

        let mut written = 0u64;
        while written < total {
            let (data, read) = self.read_at(volume, written, chunk)?;
            if read == 0 {
                return Err(NtfsError::ShortRead { offset: written });
            }
            sink.write_all(&data[..read])?;
            written += read as u64;
        }
        debug!("Copied {} byte(s) of stream {:?}.", written, self.name());
        Ok(written)
    }

    pub fn read_to_end<V: Volume + ?Sized>(&self, volume: &mut V) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(min(self.len(), COPY_CHUNK) as usize);
        self.copy_to(volume, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;
    use crate::attribute::non_resident::tests::encode_data_runs;
    use crate::attribute::tests::{non_resident_attribute, resident_attribute};
    use crate::volume::Geometry;

    /// Flat in-memory disk, 512-byte clusters.
    struct MemVolume {
        geometry: Geometry,
        disk: Vec<u8>,
        pos: usize,
    }

    impl MemVolume {
        fn new(clusters: usize) -> Self {
            let disk = (0..clusters * 512).map(|i| (i / 512) as u8 ^ (i % 13) as u8).collect();
            Self {
                geometry: Geometry {
                    bytes_per_sector: 512,
                    sectors_per_cluster: 1,
                    bytes_per_file_record: 1024,
                    mft_lcn: 0,
                },
                disk,
                pos: 0,
            }
        }
    }

    impl Volume for MemVolume {
        fn geometry(&self) -> &Geometry {
            &self.geometry
        }

        fn seek_to(&mut self, offset: u64) -> Result<()> {
            self.pos = offset as usize;
            Ok(())
        }

        fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
            let start = min(self.pos, self.disk.len());
            let end = min(start + count, self.disk.len());
            self.pos = end;
            Ok(self.disk[start..end].to_vec())
        }
    }

    #[test]
    fn test_resident_stream() {
        let raw = resident_attribute(AttributeType::Data, 0, Some("ads"), b"hello world");
        let attr = Attribute::parse(&raw, 0).unwrap();
        let stream = DataStream::new(&attr);
        let mut vol = MemVolume::new(4);
        assert_eq!(stream.name(), Some("ads"));
        assert_eq!(stream.len(), 11);
        assert!(stream.is_resident());
        assert_eq!(stream.read_at(&mut vol, 6, 100).unwrap(), (b"world".to_vec(), 5));
        assert_eq!(stream.read_at(&mut vol, 11, 1).unwrap().1, 0);
        assert!(matches!(
            stream.read_at(&mut vol, 12, 1),
            Err(NtfsError::OffsetOutOfRange { offset: 12, size: 11 })
        ));
        assert_eq!(stream.read_to_end(&mut vol).unwrap(), b"hello world");
    }

    #[test]
    fn test_copy_non_resident_with_hole() {
        // 200 clusters: 100 at LCN 10, a 60 cluster hole, 40 at LCN 300
        let runs = encode_data_runs(&[(100, Some(10)), (60, None), (40, Some(290))]);
        let size = 200 * 512 - 99;
        let raw = non_resident_attribute(AttributeType::Data, 1, 199, size, 512, &runs);
        let attr = Attribute::parse(&raw, 0).unwrap();
        let stream = DataStream::new(&attr);
        let mut vol = MemVolume::new(400);

        let mut sink = Vec::new();
        assert_eq!(stream.copy_to(&mut vol, &mut sink).unwrap(), size);
        assert_eq!(sink.len() as u64, size);
        assert_eq!(sink[..100 * 512], vol.disk[10 * 512..110 * 512]);
        assert!(sink[100 * 512..160 * 512].iter().all(|&b| b == 0));
        assert_eq!(sink[160 * 512..], vol.disk[300 * 512..300 * 512 + (size as usize - 160 * 512)]);
    }

    #[test]
    fn test_oversized_declared_length_is_an_error() {
        // one real cluster behind a stream claiming u64::MAX bytes
        let runs = encode_data_runs(&[(1, Some(2))]);
        let raw = non_resident_attribute(AttributeType::Data, 1, 0, u64::MAX, 512, &runs);
        let attr = Attribute::parse(&raw, 0).unwrap();
        let stream = DataStream::new(&attr);
        let mut vol = MemVolume::new(8);

        assert_eq!(stream.len(), u64::MAX);
        assert!(matches!(
            stream.read_to_end(&mut vol),
            Err(NtfsError::ClusterCountOutOfRange { .. })
        ));
        let (head, read) = stream.read_at(&mut vol, 0, 512).unwrap();
        assert_eq!(read, 512);
        assert_eq!(head, vol.disk[1024..1536]);
    }

    #[test]
    fn test_copy_fails_on_truncated_device() {
        let runs = encode_data_runs(&[(8, Some(2))]);
        let raw = non_resident_attribute(AttributeType::Data, 1, 7, 8 * 512, 512, &runs);
        let attr = Attribute::parse(&raw, 0).unwrap();
        let stream = DataStream::new(&attr);
        let mut vol = MemVolume::new(6);
        let mut sink = Vec::new();
        assert!(matches!(
            stream.copy_to(&mut vol, &mut sink),
            Err(NtfsError::ShortRead { offset: 0 })
        ));
    }
}
