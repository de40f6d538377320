//! Tile sources: lazy handles onto one tile container each.
//!
//! Opening a source never performs I/O. Bytes are only fetched when a tile is
//! requested, through the session-wide [`TileMemoryCache`].

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use frame_common::{FrameResult, SeriesKey, TileCoord};

use crate::blob::{BlobReader, DataRoot};
use crate::pmtiles::PmTilesReader;
use crate::tile_memory_cache::{TileKey, TileMemoryCache};

/// A lazily-loaded addressable collection of raster tiles for one
/// (variable, level, time) triple.
#[async_trait]
pub trait TileSource: Send + Sync + fmt::Debug {
    /// Stable identifier, typically the container location.
    fn id(&self) -> &str;

    /// Fetch the encoded bytes of a tile. `Ok(None)` when the tile is absent.
    async fn get_tile(&self, coord: TileCoord) -> FrameResult<Option<Bytes>>;
}

/// Opens tile sources for a series.
pub trait TileSourceFactory: Send + Sync {
    /// Handle to the container for `time_index` of `series`. Must not block.
    fn open(&self, series: &SeriesKey, time_index: usize) -> Arc<dyn TileSource>;
}

/// Tile source over a PMTiles container.
pub struct PmTilesSource {
    id: Arc<str>,
    archive: PmTilesReader,
    cache: Option<Arc<TileMemoryCache>>,
}

impl PmTilesSource {
    pub fn new(blob: Arc<dyn BlobReader>, cache: Option<Arc<TileMemoryCache>>) -> Self {
        Self {
            id: Arc::from(blob.location()),
            archive: PmTilesReader::new(blob),
            cache,
        }
    }
}

impl fmt::Debug for PmTilesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PmTilesSource")
            .field("id", &self.id)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

#[async_trait]
impl TileSource for PmTilesSource {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self), fields(source = %self.id, tile = %coord))]
    async fn get_tile(&self, coord: TileCoord) -> FrameResult<Option<Bytes>> {
        let key = TileKey::new(self.id.clone(), coord);

        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.get(&key).await {
                return Ok(Some(bytes));
            }
        }

        let tile = self.archive.get_tile(coord).await?;
        if let (Some(cache), Some(bytes)) = (&self.cache, &tile) {
            cache.insert(key, bytes.clone()).await;
        }
        Ok(tile)
    }
}

/// Opens PMTiles containers under a data root, sharing one tile cache.
#[derive(Clone)]
pub struct ContainerSourceFactory {
    root: DataRoot,
    cache: Arc<TileMemoryCache>,
}

impl ContainerSourceFactory {
    pub fn new(root: DataRoot, cache: Arc<TileMemoryCache>) -> Self {
        Self { root, cache }
    }

    pub fn root(&self) -> &DataRoot {
        &self.root
    }

    pub fn cache(&self) -> &Arc<TileMemoryCache> {
        &self.cache
    }
}

impl TileSourceFactory for ContainerSourceFactory {
    fn open(&self, series: &SeriesKey, time_index: usize) -> Arc<dyn TileSource> {
        let path = series.container_path(time_index);
        debug!(series = %series, time_index, path = %path, "Opening tile source");
        Arc::new(PmTilesSource::new(
            self.root.reader(&path),
            Some(self.cache.clone()),
        ))
    }
}
