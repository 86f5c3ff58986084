// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! Raw NTFS metadata parser: file records, attributes and the data runs
//! mapping non-resident streams onto volume clusters.

pub mod attribute;
pub mod error;
pub mod fixup;
pub mod mft;
pub mod pbs;
pub mod record;
pub mod stream;
pub mod volume;

pub use attribute::{
    Attribute, AttributeBody, AttributeForm, AttributeType, ClusterLocation, DataBlock,
    NonResidentAttribute, ResidentAttribute,
};
pub use error::{FixupError, NtfsError, Result};
pub use mft::MasterFileTable;
pub use pbs::PartitionBootSector;
pub use record::{AttributeIter, FileRecord, FileRecordHeader};
pub use stream::DataStream;
pub use volume::{Cluster, Geometry, NtfsVolume, Sector, Volume};
