mod cache;
mod hash;
mod origin;

pub use cache::{ContentStore, StoredArchive};
pub use hash::ContentHash;
pub use origin::{
    ArchiveOrigin, ArchiveUrlTemplate, HttpArchiveOrigin, OriginError, DEFAULT_ARCHIVE_ORIGIN,
};
