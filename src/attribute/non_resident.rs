// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf (data runs)

//! Non-resident attributes: the data-run decoder, VCN -> LCN translation and
//! the reads built on top of it.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::min;
use std::io::{Cursor, Seek, SeekFrom};

use crate::error::{NtfsError, Result};
use crate::volume::{Cluster, Volume};

/// Largest single device read issued by `read_all`.
const READ_CHUNK: u64 = 64 * 1024;

/// One decoded data run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataBlock {
    pub start_vcn: u64,
    pub last_vcn: u64,
    /// Length of the run in clusters.
    pub run_length: u64,
    /// Signed LCN delta from the previous block, 0 for virtual runs.
    pub lcn_offset: i64,
    pub length_field_size: u8,
    pub offset_field_size: u8,
}

impl DataBlock {
    /// A run without offset field: sparse, logically zero filled.
    pub fn is_virtual(&self) -> bool {
        self.offset_field_size == 0
    }
}

/// Where a VCN lives on the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterLocation {
    Allocated(u64),
    Sparse,
}

/// Additional 40‑byte header present only when the attribute is non‑resident,
/// plus its decoded run list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NonResidentAttribute {
    pub starting_vcn: u64,
    pub last_vcn: u64,
    pub data_runs_offset: u16,
    pub compression_unit: u16,
    pub allocated_size: u64,
    /// Actual size of the stream in bytes.
    pub data_size: u64,
    pub initialized_size: u64,
    pub data_blocks: Vec<DataBlock>,
    /// The run list did not add up to the declared VCN range and was dropped.
    pub run_list_corrupt: bool,
}

impl NonResidentAttribute {
    pub const HEADER_END: usize = 0x40;

    /// `raw` is the whole attribute, bounded by its declared length.
    pub fn parse(raw: &[u8]) -> std::result::Result<Self, String> {
        if raw.len() < Self::HEADER_END {
            return Err("non-resident header runs past the attribute".into());
        }
        let mut cur = Cursor::new(raw);
        cur.seek(SeekFrom::Start(0x10)).map_err(|e| e.to_string())?;

        macro_rules! read_u16 {
            () => {
                cur.read_u16::<LittleEndian>().map_err(|e| e.to_string())?
            };
        }
        macro_rules! read_u64 {
            () => {
                cur.read_u64::<LittleEndian>().map_err(|e| e.to_string())?
            };
        }

        let starting_vcn = read_u64!();
        let last_vcn = read_u64!();
        let data_runs_offset = read_u16!();
        let compression_unit = read_u16!();
        cur.seek(SeekFrom::Current(4)).map_err(|e| e.to_string())?;
        let allocated_size = read_u64!();
        let data_size = read_u64!();
        let initialized_size = read_u64!();

        let mut attr = Self {
            starting_vcn,
            last_vcn,
            data_runs_offset,
            compression_unit,
            allocated_size,
            data_size,
            initialized_size,
            data_blocks: Vec::new(),
            run_list_corrupt: false,
        };

        let runs_start = data_runs_offset as usize;
        let decoded = if runs_start <= raw.len() {
            decode_data_runs(&raw[runs_start..])
        } else {
            None
        };

        match decoded {
            Some(blocks) if blocks_cover(&blocks, attr.total_clusters()) => {
                debug!("Decoded {} data run(s).", blocks.len());
                attr.data_blocks = blocks;
            }
            Some(blocks) => {
                let decoded_len: u64 = blocks.iter().map(|b| b.run_length).sum();
                warn!(
                    "Data runs cover {} cluster(s) but VCN {}..={} declares {}: run list dropped.",
                    decoded_len,
                    starting_vcn,
                    last_vcn,
                    attr.total_clusters()
                );
                attr.run_list_corrupt = true;
            }
            None => {
                warn!("Truncated or malformed run list: run list dropped.");
                attr.run_list_corrupt = true;
            }
        }

        Ok(attr)
    }

    /// Number of clusters declared by the VCN range of the sub-header.
    pub fn total_clusters(&self) -> u64 {
        self.last_vcn
            .wrapping_sub(self.starting_vcn)
            .wrapping_add(1)
    }

    /// Translate a VCN into its location, or `None` when no block holds it.
    pub fn vcn_to_lcn(&self, vcn: u64) -> Option<ClusterLocation> {
        let mut lcn: i64 = 0;
        let mut vcn = vcn;

        for block in &self.data_blocks {
            lcn = lcn.checked_add(block.lcn_offset)?;

            if vcn < block.run_length {
                if block.is_virtual() {
                    return Some(ClusterLocation::Sparse);
                }
                if lcn < 0 {
                    warn!("Data run resolves to a negative LCN {}.", lcn);
                    return None;
                }
                return (lcn as u64).checked_add(vcn).map(ClusterLocation::Allocated);
            }

            vcn -= block.run_length;
        }

        None
    }

    /// Read the non-sparse part of the stream, clamped to its actual size.
    ///
    /// Virtual blocks are skipped without producing bytes, so the result is
    /// shorter than `data_size` for sparse streams.
    pub fn read_all<V: Volume + ?Sized>(&self, volume: &mut V) -> Result<Vec<u8>> {
        let cluster_size = volume.geometry().cluster_size();
        let mut out = Vec::new();

        for block in &self.data_blocks {
            let block_start = block.start_vcn.saturating_mul(cluster_size);
            if block_start >= self.data_size {
                break;
            }
            if block.is_virtual() {
                continue;
            }

            let block_bytes = block.run_length.saturating_mul(cluster_size);
            let mut wanted = min(block_bytes, self.data_size - block_start);

            let lcn = match self.vcn_to_lcn(block.start_vcn) {
                Some(ClusterLocation::Allocated(lcn)) => lcn,
                _ => break,
            };
            volume.seek_to(volume.lcn_to_offset(lcn))?;

            // the device bounds the output, not the declared sizes
            while wanted > 0 {
                let step = min(wanted, READ_CHUNK) as usize;
                let bytes = volume.read_bytes(step)?;
                out.try_reserve(bytes.len())
                    .map_err(|_| NtfsError::AllocationTooLarge {
                        bytes: (out.len() + bytes.len()) as u64,
                    })?;
                out.extend_from_slice(&bytes);
                if bytes.len() < step {
                    debug!("Short read in the block starting at VCN {}.", block.start_vcn);
                    break;
                }
                wanted -= step as u64;
            }
        }

        Ok(out)
    }

    /// Read `length` bytes at `offset` of the stream.
    ///
    /// Returns the bytes and how many were satisfied. The length is clamped to
    /// the stream size. A short read of any segment yields no bytes at all.
    pub fn read_at_offset<V: Volume + ?Sized>(
        &self,
        volume: &mut V,
        offset: u64,
        length: usize,
    ) -> Result<(Vec<u8>, usize)> {
        if length == 0 {
            return Ok((Vec::new(), 0));
        }
        if offset > self.data_size {
            return Err(NtfsError::OffsetOutOfRange {
                offset,
                size: self.data_size,
            });
        }

        let mut remaining = min(length as u64, self.data_size - offset) as usize;
        if remaining == 0 {
            return Ok((Vec::new(), 0));
        }

        let cluster_size = volume.geometry().cluster_size() as usize;
        let mut vcn = offset / cluster_size as u64;
        let skip = (offset % cluster_size as u64) as usize;
        let mut out = Vec::new();

        // Leading partial cluster
        if skip != 0 {
            let (cluster, read) = self.read_virtual_clusters(volume, vcn, 1, cluster_size)?;
            if read != cluster_size {
                return Ok((Vec::new(), 0));
            }
            let take = min(cluster_size - skip, remaining);
            out.extend_from_slice(&cluster[skip..skip + take]);
            remaining -= take;
            vcn += 1;
        }

        // Whole clusters
        let aligned = remaining / cluster_size;
        if aligned > 0 {
            let size = aligned * cluster_size;
            let (buf, read) = self.read_virtual_clusters(volume, vcn, aligned as u64, size)?;
            if read != size {
                return Ok((Vec::new(), 0));
            }
            out.extend_from_slice(&buf);
            remaining -= size;
            vcn += aligned as u64;
        }

        // Trailing partial cluster
        if remaining > 0 {
            let (cluster, read) = self.read_virtual_clusters(volume, vcn, 1, cluster_size)?;
            if read != cluster_size {
                return Ok((Vec::new(), 0));
            }
            out.extend_from_slice(&cluster[..remaining]);
        }

        let satisfied = out.len();
        Ok((out, satisfied))
    }

    /// Read `clusters` clusters starting at `vcn`, possibly spanning blocks.
    ///
    /// `bytes_to_read` must hold at least `clusters` clusters. Returns the
    /// bytes and their count; the count is short when the device is.
    pub fn read_virtual_clusters<V: Volume + ?Sized>(
        &self,
        volume: &mut V,
        vcn: u64,
        clusters: u64,
        bytes_to_read: usize,
    ) -> Result<(Vec<u8>, usize)> {
        let cluster_size = volume.geometry().cluster_size();

        if vcn
            .checked_add(clusters)
            .is_none_or(|end| end > self.total_clusters())
        {
            return Err(NtfsError::ClusterCountOutOfRange { vcn, clusters });
        }
        if (bytes_to_read as u64) < clusters.saturating_mul(cluster_size) {
            return Err(NtfsError::BufferTooSmall {
                requested: bytes_to_read as u64,
                clusters,
            });
        }

        let mut data = Vec::new();
        let mut vcn = vcn;
        let mut clusters = clusters;

        for block in &self.data_blocks {
            if clusters == 0 {
                break;
            }
            if vcn < block.start_vcn || vcn > block.last_vcn {
                continue;
            }

            let count = min(clusters, block.last_vcn - vcn + 1);
            let bytes = self.read_block_bytes(volume, block, count, vcn - block.start_vcn)?;
            let complete = bytes.len() as u64 == count * cluster_size;
            data.extend_from_slice(&bytes);
            if !complete {
                debug!("Short read in the block starting at VCN {}.", block.start_vcn);
                break;
            }

            clusters -= count;
            vcn += count;
        }

        let read = data.len();
        Ok((data, read))
    }

    /// Read `clusters` clusters of one block, starting `start` clusters into it.
    ///
    /// `clusters == 0` reads to the end of the block. Virtual blocks read as zeros.
    pub fn read_block_bytes<V: Volume + ?Sized>(
        &self,
        volume: &mut V,
        block: &DataBlock,
        clusters: u64,
        start: u64,
    ) -> Result<Vec<u8>> {
        self.ensure_own_block(block)?;

        let clusters = if clusters == 0 {
            block.run_length.saturating_sub(start)
        } else {
            clusters
        };
        if start
            .checked_add(clusters)
            .is_none_or(|end| end > block.run_length)
        {
            return Err(NtfsError::ClusterCountOutOfRange {
                vcn: block.start_vcn.saturating_add(start),
                clusters,
            });
        }

        let cluster_size = volume.geometry().cluster_size();
        let total = clusters
            .checked_mul(cluster_size)
            .ok_or(NtfsError::ClusterCountOutOfRange {
                vcn: block.start_vcn.saturating_add(start),
                clusters,
            })?;
        let cluster_size = cluster_size as usize;
        if block.is_virtual() {
            let mut zeros = reserve_bytes(total)?;
            zeros.resize(total as usize, 0);
            return Ok(zeros);
        }

        let first_lcn = match self.vcn_to_lcn(block.start_vcn + start) {
            Some(ClusterLocation::Allocated(lcn)) => lcn,
            _ => return Ok(Vec::new()),
        };

        let mut data = Vec::new();
        for i in 0..clusters {
            let cluster = volume.read_lcn(first_lcn.saturating_add(i))?;
            let complete = cluster.data.len() == cluster_size;
            data.extend_from_slice(&cluster.data);
            if !complete {
                break;
            }
        }
        Ok(data)
    }

    /// Every cluster of one block. Virtual blocks yield zero-filled clusters.
    pub fn read_block_clusters<V: Volume + ?Sized>(
        &self,
        volume: &mut V,
        block: &DataBlock,
    ) -> Result<Vec<Cluster>> {
        self.ensure_own_block(block)?;

        let cluster_size = volume.geometry().cluster_size();
        let total = block
            .run_length
            .checked_mul(cluster_size)
            .ok_or(NtfsError::ClusterCountOutOfRange {
                vcn: block.start_vcn,
                clusters: block.run_length,
            })?;
        if isize::try_from(total).is_err() {
            return Err(NtfsError::AllocationTooLarge { bytes: total });
        }
        let cluster_size = cluster_size as usize;
        let mut clusters = Vec::new();

        if block.is_virtual() {
            let count = usize::try_from(block.run_length)
                .map_err(|_| NtfsError::AllocationTooLarge { bytes: total })?;
            clusters
                .try_reserve_exact(count)
                .map_err(|_| NtfsError::AllocationTooLarge { bytes: total })?;
            clusters.extend((0..count).map(|_| Cluster::zeroed(cluster_size)));
            return Ok(clusters);
        }

        let first_lcn = match self.vcn_to_lcn(block.start_vcn) {
            Some(ClusterLocation::Allocated(lcn)) => lcn,
            _ => return Ok(Vec::new()),
        };
        for i in 0..block.run_length {
            let cluster = volume.read_lcn(first_lcn.saturating_add(i))?;
            let complete = cluster.data.len() == cluster_size;
            clusters.push(cluster);
            if !complete {
                break;
            }
        }
        Ok(clusters)
    }

    /// Starting LCN of every block, `None` for virtual ones.
    pub fn block_lcns(&self) -> Vec<Option<u64>> {
        self.data_blocks
            .iter()
            .map(|b| match self.vcn_to_lcn(b.start_vcn) {
                Some(ClusterLocation::Allocated(lcn)) => Some(lcn),
                _ => None,
            })
            .collect()
    }

    fn ensure_own_block(&self, block: &DataBlock) -> Result<()> {
        if self.data_blocks.iter().any(|b| std::ptr::eq(b, block)) {
            Ok(())
        } else {
            Err(NtfsError::ForeignDataBlock)
        }
    }
}

/// Empty buffer able to hold `bytes` without reallocating, or an error when
/// the size cannot be allocated.
fn reserve_bytes(bytes: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(bytes).map_err(|_| NtfsError::AllocationTooLarge { bytes })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| NtfsError::AllocationTooLarge { bytes })?;
    Ok(buf)
}

fn blocks_cover(blocks: &[DataBlock], total_clusters: u64) -> bool {
    blocks
        .iter()
        .try_fold(0u64, |acc, b| acc.checked_add(b.run_length))
        .is_some_and(|sum| sum == total_clusters)
}

/// Decode a run list into blocks. `None` when a run is truncated or malformed.
///
/// Decoding stops at a `0x00` header byte or at the end of `raw`.
pub fn decode_data_runs(raw: &[u8]) -> Option<Vec<DataBlock>> {
    let mut blocks = Vec::new();
    let mut pos = 0usize;
    let mut vcn = 0u64;

    while pos < raw.len() && raw[pos] != 0 {
        let hdr = raw[pos];
        pos += 1;
        let len_sz = (hdr & 0x0F) as usize;
        let ofs_sz = (hdr >> 4) as usize;

        if len_sz == 0 || len_sz > 8 || ofs_sz > 8 || pos + len_sz + ofs_sz > raw.len() {
            return None;
        }

        let run_length = read_le_unsigned(&raw[pos..pos + len_sz]);
        pos += len_sz;
        let lcn_offset = read_le_signed(&raw[pos..pos + ofs_sz]);
        pos += ofs_sz;

        if run_length == 0 {
            return None;
        }
        let last_vcn = vcn.checked_add(run_length - 1)?;

        blocks.push(DataBlock {
            start_vcn: vcn,
            last_vcn,
            run_length,
            lcn_offset,
            length_field_size: len_sz as u8,
            offset_field_size: ofs_sz as u8,
        });

        vcn = last_vcn.checked_add(1)?;
    }

    Some(blocks)
}

/// Little-endian unsigned value of 0 to 8 bytes.
pub fn read_le_unsigned(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Little-endian signed value of 0 to 8 bytes, sign-extended by replicating
/// the sign bit of the most significant byte.
pub fn read_le_signed(bytes: &[u8]) -> i64 {
    let Some(&msb) = bytes.last() else {
        return 0;
    };
    let fill = if msb & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    i64::from_le_bytes(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::volume::Geometry;

    /// Encode `(run_length, lcn_delta)` pairs, `None` delta for a sparse run,
    /// using the smallest field widths that hold each value.
    pub(crate) fn encode_data_runs(runs: &[(u64, Option<i64>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for &(length, delta) in runs {
            let len_bytes = length.to_le_bytes();
            let len_sz = (8 - length.leading_zeros() as usize / 8).max(1);
            let (ofs_sz, ofs_bytes) = match delta {
                None => (0, [0u8; 8]),
                Some(d) => (signed_width(d), d.to_le_bytes()),
            };
            out.push(((ofs_sz as u8) << 4) | len_sz as u8);
            out.extend_from_slice(&len_bytes[..len_sz]);
            out.extend_from_slice(&ofs_bytes[..ofs_sz]);
        }
        out.push(0);
        out
    }

    fn signed_width(value: i64) -> usize {
        (1..=8)
            .find(|&w| {
                let bits = 8 * w as u32;
                bits == 64 || (value >= -(1i64 << (bits - 1)) && value < (1i64 << (bits - 1)))
            })
            .unwrap_or(8)
    }

    fn attribute(runs: &[(u64, Option<i64>)], data_size: u64) -> NonResidentAttribute {
        let encoded = encode_data_runs(runs);
        let total: u64 = runs.iter().map(|r| r.0).sum();
        let mut raw = vec![0u8; NonResidentAttribute::HEADER_END];
        raw[0x18..0x20].copy_from_slice(&(total.wrapping_sub(1)).to_le_bytes());
        raw[0x20..0x22].copy_from_slice(&(NonResidentAttribute::HEADER_END as u16).to_le_bytes());
        raw[0x30..0x38].copy_from_slice(&data_size.to_le_bytes());
        raw.extend_from_slice(&encoded);
        NonResidentAttribute::parse(&raw).unwrap()
    }

    /// In-memory volume whose cluster N is filled with `N as u8`.
    struct PatternVolume {
        geometry: Geometry,
        clusters: u64,
        pos: u64,
        reads: usize,
    }

    impl PatternVolume {
        fn new(clusters: u64) -> Self {
            Self {
                geometry: Geometry {
                    bytes_per_sector: 512,
                    sectors_per_cluster: 1,
                    bytes_per_file_record: 1024,
                    mft_lcn: 0,
                },
                clusters,
                pos: 0,
                reads: 0,
            }
        }

        fn byte_at(offset: u64) -> u8 {
            // cluster number in the high bits, position in the low bits
            ((offset / 512) as u8).wrapping_mul(16).wrapping_add((offset % 7) as u8)
        }
    }

    impl Volume for PatternVolume {
        fn geometry(&self) -> &Geometry {
            &self.geometry
        }

        fn seek_to(&mut self, offset: u64) -> Result<()> {
            self.pos = offset;
            Ok(())
        }

        fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
            self.reads += 1;
            let end = min(self.pos + count as u64, self.clusters * 512);
            let data: Vec<u8> = (self.pos..end.max(self.pos)).map(Self::byte_at).collect();
            self.pos = end.max(self.pos);
            Ok(data)
        }
    }

    fn expected_bytes(lcn: u64, clusters: u64) -> Vec<u8> {
        (lcn * 512..(lcn + clusters) * 512)
            .map(PatternVolume::byte_at)
            .collect()
    }

    #[test]
    fn test_sign_extension_every_width() {
        assert_eq!(read_le_signed(&[]), 0);
        assert_eq!(read_le_signed(&[0x9C]), -100);
        assert_eq!(read_le_signed(&[0x7F]), 127);
        assert_eq!(read_le_signed(&[0x00, 0x80]), -32768);
        assert_eq!(read_le_signed(&[0xFF, 0xFF, 0xFF]), -1);
        for width in 1..=8usize {
            let value: i64 = -(1i64 << (8 * width as u32 - 1).min(62)) + 3;
            let bytes = value.to_le_bytes();
            assert_eq!(read_le_signed(&bytes[..width]), value, "width {}", width);
        }
        assert_eq!(read_le_unsigned(&[0x00, 0x01]), 256);
        assert_eq!(read_le_unsigned(&[0xFF; 8]), u64::MAX);
    }

    #[test]
    fn test_decode_runs_match_encoded_triples() {
        let runs = [
            (0x10, Some(0x64)),
            (0x1234, Some(-0x50)),
            (7, None),
            (4, Some(0x1234)),
            (3, Some(0x12_3456)),
            (1, Some(-0x7F00_0000)),
            (2, Some(0x12_3456_789A)),
            (6, Some(0x1234_5678_9ABC)),
            (8, Some(-0x12_3456_789A_BCDE)),
            (5, Some(-0x0080_0000_0000_0001)),
            (9, Some(0x0100_0000_0000_0000)),
            (2, Some(-0x1234)),
            (3, Some(-0x12_3456)),
            (4, Some(-0x12_3456_789A)),
            (5, Some(-0x1234_5678_9ABC)),
        ];
        let blocks = decode_data_runs(&encode_data_runs(&runs)).unwrap();
        assert_eq!(blocks.len(), runs.len());

        let mut vcn = 0;
        for (block, &(length, delta)) in blocks.iter().zip(runs.iter()) {
            assert_eq!(block.start_vcn, vcn);
            assert_eq!(block.last_vcn, vcn + length - 1);
            assert_eq!(block.run_length, length);
            assert_eq!(block.lcn_offset, delta.unwrap_or(0));
            assert_eq!(block.is_virtual(), delta.is_none());
            vcn += length;
        }
        let widths: Vec<u8> = blocks.iter().map(|b| b.offset_field_size).collect();
        assert_eq!(widths, vec![1, 1, 0, 2, 3, 4, 5, 6, 7, 8, 8, 2, 3, 5, 6]);
        for width in 1..=8u8 {
            assert!(
                blocks.iter().any(|b| b.offset_field_size == width && b.lcn_offset < 0),
                "no negative delta of width {}",
                width
            );
        }
    }

    #[test]
    fn test_decode_stops_at_end_marker_and_rejects_truncation() {
        let blocks = decode_data_runs(&[0x11, 0x04, 0x0A, 0x00, 0x11, 0x01, 0x01]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(decode_data_runs(&[0x21, 0x04, 0x0A]).is_none());
        assert!(decode_data_runs(&[0x10, 0x0A, 0x00]).is_none());
        assert!(decode_data_runs(&[0x19, 0x04]).is_none());
        assert_eq!(decode_data_runs(&[]).unwrap().len(), 0);
    }

    #[test]
    fn test_two_run_translation() {
        let attr = attribute(&[(3, Some(100)), (2, Some(-40))], 5 * 512);
        assert_eq!(attr.vcn_to_lcn(0), Some(ClusterLocation::Allocated(100)));
        assert_eq!(attr.vcn_to_lcn(2), Some(ClusterLocation::Allocated(102)));
        assert_eq!(attr.vcn_to_lcn(3), Some(ClusterLocation::Allocated(60)));
        assert_eq!(attr.vcn_to_lcn(4), Some(ClusterLocation::Allocated(61)));
        assert_eq!(attr.vcn_to_lcn(5), None);
        assert_eq!(attr.vcn_to_lcn(u64::MAX), None);
        assert_eq!(attr.block_lcns(), vec![Some(100), Some(60)]);
    }

    #[test]
    fn test_sparse_vcn_never_maps_to_lcn() {
        let attr = attribute(&[(2, Some(50)), (4, None), (2, Some(10))], 8 * 512);
        for vcn in 2..6 {
            assert_eq!(attr.vcn_to_lcn(vcn), Some(ClusterLocation::Sparse));
        }
        assert_eq!(attr.vcn_to_lcn(6), Some(ClusterLocation::Allocated(60)));
        assert_eq!(attr.vcn_to_lcn(8), None);
        assert_eq!(attr.block_lcns(), vec![Some(50), None, Some(60)]);
    }

    #[test]
    fn test_short_run_list_is_dropped() {
        // sub-header declares 10 clusters, runs only cover 7
        let encoded = encode_data_runs(&[(4, Some(20)), (3, Some(5))]);
        let mut raw = vec![0u8; NonResidentAttribute::HEADER_END];
        raw[0x18..0x20].copy_from_slice(&9u64.to_le_bytes());
        raw[0x20..0x22].copy_from_slice(&0x40u16.to_le_bytes());
        raw.extend_from_slice(&encoded);
        let attr = NonResidentAttribute::parse(&raw).unwrap();
        assert!(attr.data_blocks.is_empty());
        assert!(attr.run_list_corrupt);
        assert_eq!(attr.total_clusters(), 10);
        assert_eq!(attr.vcn_to_lcn(0), None);
    }

    #[test]
    fn test_empty_stream_has_no_runs() {
        let mut raw = vec![0u8; NonResidentAttribute::HEADER_END + 8];
        raw[0x18..0x20].copy_from_slice(&u64::MAX.to_le_bytes());
        raw[0x20..0x22].copy_from_slice(&0x40u16.to_le_bytes());
        let attr = NonResidentAttribute::parse(&raw).unwrap();
        assert!(!attr.run_list_corrupt);
        assert_eq!(attr.total_clusters(), 0);
    }

    #[test]
    fn test_read_all_skips_sparse_and_clamps() {
        let attr = attribute(&[(2, Some(10)), (1, None), (2, Some(20))], 4 * 512 + 100);
        let mut vol = PatternVolume::new(64);
        let data = attr.read_all(&mut vol).unwrap();

        let mut expected = expected_bytes(10, 2);
        expected.extend_from_slice(&expected_bytes(30, 1));
        expected.extend_from_slice(&expected_bytes(31, 1)[..100]);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_read_at_offset_matches_concatenated_subranges() {
        let size = 6 * 512 - 37;
        let attr = attribute(&[(2, Some(10)), (1, None), (3, Some(-5))], size as u64);
        let mut vol = PatternVolume::new(64);

        let (whole, n) = attr.read_at_offset(&mut vol, 0, size).unwrap();
        assert_eq!(n, size);
        assert_eq!(whole.len(), size);
        assert!(whole[1024..1536].iter().all(|&b| b == 0));
        assert_eq!(whole[..1024], expected_bytes(10, 2)[..]);
        assert_eq!(whole[1536..], expected_bytes(5, 3)[..size - 1536]);

        for (start, len) in [(0, 1), (511, 2), (100, 900), (1000, 1100), (1536, 512), (3000, 5000)] {
            let (part, got) = attr.read_at_offset(&mut vol, start as u64, len).unwrap();
            let end = min(start + len, size);
            assert_eq!(got, end - start);
            assert_eq!(part, whole[start..end], "range {}+{}", start, len);
        }

        let mut stitched = Vec::new();
        let mut pos = 0;
        for step in [300, 700, 1, 512, 1023, 5000].iter().cycle() {
            if pos >= size {
                break;
            }
            let (part, _) = attr.read_at_offset(&mut vol, pos as u64, *step).unwrap();
            pos += part.len();
            stitched.extend_from_slice(&part);
        }
        assert_eq!(stitched, whole);
    }

    #[test]
    fn test_read_at_offset_bounds() {
        let attr = attribute(&[(2, Some(10))], 1000);
        let mut vol = PatternVolume::new(64);
        assert!(matches!(
            attr.read_at_offset(&mut vol, 1001, 1),
            Err(NtfsError::OffsetOutOfRange { offset: 1001, size: 1000 })
        ));
        assert_eq!(attr.read_at_offset(&mut vol, 1000, 10).unwrap().1, 0);
        assert_eq!(attr.read_at_offset(&mut vol, 0, 0).unwrap().1, 0);
        assert_eq!(attr.read_at_offset(&mut vol, 990, 100).unwrap().1, 10);
    }

    #[test]
    fn test_short_device_read_yields_nothing() {
        let attr = attribute(&[(4, Some(10))], 4 * 512);
        let mut vol = PatternVolume::new(12);
        let (data, read) = attr.read_at_offset(&mut vol, 0, 4 * 512).unwrap();
        assert!(data.is_empty());
        assert_eq!(read, 0);

        let (data, read) = attr.read_at_offset(&mut vol, 0, 1024).unwrap();
        assert_eq!(read, 1024);
        assert_eq!(data, expected_bytes(10, 2));
    }

    #[test]
    fn test_corrupt_run_list_reads_nothing() {
        let encoded = encode_data_runs(&[(2, Some(10))]);
        let mut raw = vec![0u8; NonResidentAttribute::HEADER_END];
        raw[0x18..0x20].copy_from_slice(&3u64.to_le_bytes());
        raw[0x20..0x22].copy_from_slice(&0x40u16.to_le_bytes());
        raw[0x30..0x38].copy_from_slice(&1024u64.to_le_bytes());
        raw.extend_from_slice(&encoded);
        let attr = NonResidentAttribute::parse(&raw).unwrap();
        let mut vol = PatternVolume::new(64);
        assert_eq!(attr.read_at_offset(&mut vol, 0, 1024).unwrap(), (Vec::new(), 0));
        assert!(attr.read_all(&mut vol).unwrap().is_empty());
    }

    #[test]
    fn test_bounded_cluster_reads() {
        let attr = attribute(&[(3, Some(10)), (2, Some(4))], 5 * 512);
        let mut vol = PatternVolume::new(64);

        let (data, read) = attr.read_virtual_clusters(&mut vol, 2, 2, 1024).unwrap();
        assert_eq!(read, 1024);
        let mut expected = expected_bytes(12, 1);
        expected.extend_from_slice(&expected_bytes(14, 1));
        assert_eq!(data, expected);

        assert!(matches!(
            attr.read_virtual_clusters(&mut vol, 4, 2, 1024),
            Err(NtfsError::ClusterCountOutOfRange { vcn: 4, clusters: 2 })
        ));
        assert!(matches!(
            attr.read_virtual_clusters(&mut vol, 0, 2, 1000),
            Err(NtfsError::BufferTooSmall { .. })
        ));

        let block = &attr.data_blocks[1];
        assert_eq!(attr.read_block_bytes(&mut vol, block, 0, 0).unwrap(), expected_bytes(14, 2));
        assert_eq!(attr.read_block_bytes(&mut vol, block, 1, 1).unwrap(), expected_bytes(15, 1));
        assert!(matches!(
            attr.read_block_bytes(&mut vol, block, 3, 0),
            Err(NtfsError::ClusterCountOutOfRange { .. })
        ));
        assert!(matches!(
            attr.read_block_bytes(&mut vol, block, 2, 1),
            Err(NtfsError::ClusterCountOutOfRange { .. })
        ));

        let clusters = attr.read_block_clusters(&mut vol, &attr.data_blocks[0]).unwrap();
        let lcns: Vec<Option<u64>> = clusters.iter().map(|c| c.lcn).collect();
        assert_eq!(lcns, vec![Some(10), Some(11), Some(12)]);
    }

    #[test]
    fn test_foreign_block_is_rejected() {
        let attr = attribute(&[(3, Some(10))], 3 * 512);
        let twin = attribute(&[(3, Some(10))], 3 * 512);
        let mut vol = PatternVolume::new(64);
        let foreign = &twin.data_blocks[0];
        assert_eq!(foreign, &attr.data_blocks[0]);
        assert!(matches!(
            attr.read_block_bytes(&mut vol, foreign, 0, 0),
            Err(NtfsError::ForeignDataBlock)
        ));
        assert!(matches!(
            attr.read_block_clusters(&mut vol, foreign),
            Err(NtfsError::ForeignDataBlock)
        ));
    }

    #[test]
    fn test_huge_sparse_block_does_not_allocate() {
        let mut vol = PatternVolume::new(64);

        // 2^56 clusters of 512 bytes overflow a u64 byte count
        let attr = attribute(&[(1, Some(10)), (1 << 56, None)], u64::MAX);
        let hole = &attr.data_blocks[1];
        assert!(matches!(
            attr.read_block_bytes(&mut vol, hole, 0, 0),
            Err(NtfsError::ClusterCountOutOfRange { .. })
        ));
        assert!(matches!(
            attr.read_block_clusters(&mut vol, hole),
            Err(NtfsError::ClusterCountOutOfRange { .. })
        ));

        // 2^54 clusters fit a u64 but not an allocation
        let attr = attribute(&[(1, Some(10)), (1 << 54, None)], u64::MAX);
        let hole = &attr.data_blocks[1];
        assert!(matches!(
            attr.read_block_bytes(&mut vol, hole, 0, 0),
            Err(NtfsError::AllocationTooLarge { .. })
        ));
        assert!(matches!(
            attr.read_block_clusters(&mut vol, hole),
            Err(NtfsError::AllocationTooLarge { .. })
        ));

        // bounded reads inside the hole still work
        let (data, read) = attr.read_at_offset(&mut vol, 512, 2048).unwrap();
        assert_eq!(read, 2048);
        assert!(data.iter().all(|&b| b == 0));
        assert_eq!(attr.read_all(&mut vol).unwrap(), expected_bytes(10, 1));
    }

    #[test]
    fn test_sparse_block_reads_as_zeros() {
        let attr = attribute(&[(1, Some(10)), (2, None)], 3 * 512);
        let mut vol = PatternVolume::new(64);
        let sparse = &attr.data_blocks[1];
        let data = attr.read_block_bytes(&mut vol, sparse, 0, 0).unwrap();
        assert_eq!(data.len(), 1024);
        assert!(data.iter().all(|&b| b == 0));
        let clusters = attr.read_block_clusters(&mut vol, sparse).unwrap();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.lcn.is_none()));
    }
}
