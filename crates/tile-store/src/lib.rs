//! Tile container access for the forecast frame viewer.
//!
//! Provides lazy [`TileSource`] handles over PMTiles containers published
//! under a [`DataRoot`], and a memory-bounded cache of tile bytes shared by
//! every source of a session.

pub mod blob;
pub mod pmtiles;
pub mod source;
pub mod tile_memory_cache;

pub use blob::{BlobReader, DataRoot, FileBlobReader, HttpBlobReader, MemoryBlobReader};
pub use pmtiles::{check_layout, ArchiveBuilder, PmTilesReader};
pub use source::{ContainerSourceFactory, PmTilesSource, TileSource, TileSourceFactory};
pub use tile_memory_cache::{TileKey, TileMemoryCache, TileMemoryCacheStats};
