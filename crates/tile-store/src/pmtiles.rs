//! PMTiles tile containers, read and written through `pmtiles2`.
//!
//! A container is fetched whole on first use. Its section offsets are
//! checked against the fetched size before the archive is opened, so a
//! corrupt header fails that container alone with
//! [`FrameError::InvalidArchive`].
//!
//! [`ArchiveBuilder`] writes containers for fixtures and local test data.

use bytes::{Buf, Bytes};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use pmtiles2::util::tile_id;
use pmtiles2::{Compression, PMTiles, TileType};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

use frame_common::{FrameError, FrameResult, TileCoord, MAX_ZOOM};

use crate::blob::BlobReader;

/// Length of the fixed header.
pub const HEADER_LEN: usize = 127;

const MAGIC: &[u8] = b"PMTiles";

/// Sections addressed by (offset, length) pairs from byte 8 of the header.
const SECTIONS: [&str; 4] = ["root directory", "metadata", "leaf directories", "tile data"];

/// Check that every section the header points at lies inside the container.
pub fn check_layout(bytes: &[u8]) -> FrameResult<()> {
    if bytes.len() < HEADER_LEN || !bytes.starts_with(MAGIC) {
        return Err(FrameError::InvalidArchive(format!(
            "{} bytes do not start with a PMTiles header",
            bytes.len()
        )));
    }

    let size = bytes.len() as u64;
    let mut fields = &bytes[8..8 + 16 * SECTIONS.len()];
    for section in SECTIONS {
        let offset = fields.get_u64_le();
        let length = fields.get_u64_le();
        match offset.checked_add(length) {
            Some(end) if end <= size => {}
            _ => {
                return Err(FrameError::InvalidArchive(format!(
                    "{} at {}+{} runs past the {}-byte container",
                    section, offset, length, size
                )));
            }
        }
    }
    Ok(())
}

/// Run container work on the blocking pool. A panic inside `pmtiles2`
/// surfaces as an invalid archive.
async fn blocking<T, F>(location: Arc<str>, work: F) -> FrameResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> FrameResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| FrameError::InvalidArchive(format!("{}: {}", location, e)))?
}

fn gunzip(data: &[u8]) -> FrameResult<Bytes> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| FrameError::TileDecode(format!("gzip: {}", e)))?;
    Ok(Bytes::from(out))
}

fn gzip(data: &[u8]) -> FrameResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

struct Archive {
    tiles: Mutex<PMTiles<Cursor<Bytes>>>,
    gzip_tiles: bool,
    zoom_range: (u8, u8),
}

/// Lazily opened container.
pub struct PmTilesReader {
    blob: Arc<dyn BlobReader>,
    location: Arc<str>,
    archive: OnceCell<Arc<Archive>>,
}

impl std::fmt::Debug for PmTilesReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmTilesReader")
            .field("location", &self.location)
            .field("opened", &self.is_opened())
            .finish()
    }
}

impl PmTilesReader {
    pub fn new(blob: Arc<dyn BlobReader>) -> Self {
        Self {
            location: Arc::from(blob.location()),
            blob,
            archive: OnceCell::new(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether the container has been fetched and opened.
    pub fn is_opened(&self) -> bool {
        self.archive.initialized()
    }

    async fn archive(&self) -> FrameResult<&Arc<Archive>> {
        self.archive
            .get_or_try_init(|| async {
                let bytes = self.blob.read().await?;
                let size = bytes.len();
                check_layout(&bytes)?;

                let location = self.location.clone();
                let archive = blocking(self.location.clone(), move || {
                    let pm = PMTiles::from_reader(Cursor::new(bytes))
                        .map_err(|e| FrameError::InvalidArchive(format!("{}: {}", location, e)))?;
                    Ok(Archive {
                        gzip_tiles: pm.tile_compression == Compression::GZip,
                        zoom_range: (pm.min_zoom, pm.max_zoom),
                        tiles: Mutex::new(pm),
                    })
                })
                .await?;

                debug!(
                    location = %self.location,
                    size,
                    min_zoom = archive.zoom_range.0,
                    max_zoom = archive.zoom_range.1,
                    "Opened container"
                );
                Ok::<_, FrameError>(Arc::new(archive))
            })
            .await
    }

    /// `(min_zoom, max_zoom)` declared by the container.
    pub async fn zoom_range(&self) -> FrameResult<(u8, u8)> {
        Ok(self.archive().await?.zoom_range)
    }

    /// Fetch one tile. `Ok(None)` when the container has no tile there.
    pub async fn get_tile(&self, coord: TileCoord) -> FrameResult<Option<Bytes>> {
        if coord.z > MAX_ZOOM || !coord.is_valid() {
            return Err(FrameError::TileFetch(format!("tile {} is not addressable", coord)));
        }

        let archive = self.archive().await?.clone();
        let location = self.location.clone();
        blocking(self.location.clone(), move || {
            let tile = {
                let mut tiles = archive.tiles.lock().map_err(|_| {
                    FrameError::InvalidArchive(format!("{}: reader poisoned", location))
                })?;
                tiles
                    .get_tile(coord.x as u64, coord.y as u64, coord.z)
                    .map_err(|e| FrameError::InvalidArchive(format!("{}: {}", location, e)))?
            };
            match tile {
                Some(data) if archive.gzip_tiles => gunzip(&data).map(Some),
                Some(data) => Ok(Some(Bytes::from(data))),
                None => Ok(None),
            }
        })
        .await
    }
}

/// Writes PNG tile containers.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    tiles: BTreeMap<TileCoord, Vec<u8>>,
    gzip_tiles: bool,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store tiles gzip-compressed.
    pub fn gzip_tiles(mut self) -> Self {
        self.gzip_tiles = true;
        self
    }

    pub fn add_tile(&mut self, coord: TileCoord, data: impl AsRef<[u8]>) -> FrameResult<()> {
        if coord.z > MAX_ZOOM || !coord.is_valid() {
            return Err(FrameError::InvalidArchive(format!(
                "tile {} is not addressable",
                coord
            )));
        }
        self.tiles.insert(coord, data.as_ref().to_vec());
        Ok(())
    }

    pub fn with_tile(mut self, coord: TileCoord, data: impl AsRef<[u8]>) -> FrameResult<Self> {
        self.add_tile(coord, data)?;
        Ok(self)
    }

    pub fn build(&self) -> FrameResult<Bytes> {
        let compression = if self.gzip_tiles {
            Compression::GZip
        } else {
            Compression::None
        };

        let mut pm = PMTiles::new(TileType::Png, compression);
        // Tiles are ordered by zoom first.
        let min_zoom = self.tiles.keys().next().map_or(0, |c| c.z);
        let max_zoom = self.tiles.keys().next_back().map_or(0, |c| c.z);
        pm.min_zoom = min_zoom;
        pm.max_zoom = max_zoom;
        pm.min_longitude = -180.0;
        pm.max_longitude = 180.0;
        pm.min_latitude = -85.051_129;
        pm.max_latitude = 85.051_129;
        pm.center_zoom = min_zoom;
        pm.center_longitude = 0.0;
        pm.center_latitude = 0.0;

        for (coord, data) in &self.tiles {
            let data = if self.gzip_tiles {
                gzip(data)?
            } else {
                data.clone()
            };
            pm.add_tile(tile_id(coord.z, coord.x as u64, coord.y as u64), data)
                .map_err(|e| FrameError::InvalidArchive(e.to_string()))?;
        }

        let mut out = Cursor::new(Vec::new());
        pm.to_writer(&mut out).map_err(|e| FrameError::InvalidArchive(e.to_string()))?;
        Ok(Bytes::from(out.into_inner()))
    }
}
