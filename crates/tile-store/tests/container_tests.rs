//! End-to-end tests: containers written to a local data root and read back
//! through the source factory.

use bytes::Bytes;
use std::sync::Arc;

use frame_common::{FrameError, SeriesKey, TileCoord};
use tile_store::{
    ArchiveBuilder, ContainerSourceFactory, DataRoot, FileBlobReader, PmTilesReader,
    TileMemoryCache, TileSourceFactory,
};

// ============================================================================
// Helper functions
// ============================================================================

fn series(level_index: Option<usize>) -> SeriesKey {
    SeriesKey {
        run: "2025-07-28T00Z_PT3H".to_string(),
        variable: if level_index.is_some() {
            "temperature".to_string()
        } else {
            "2m_temperature".to_string()
        },
        level_index,
    }
}

/// Write one container per time step, each tile carrying its step number.
fn write_series(root: &std::path::Path, key: &SeriesKey, steps: usize) {
    for t in 0..steps {
        let mut builder = ArchiveBuilder::new();
        for x in 0..2 {
            for y in 0..2 {
                builder
                    .add_tile(TileCoord::new(1, x, y), format!("t{}:{}/{}", t, x, y))
                    .unwrap();
            }
        }
        let path = root.join(key.container_path(t));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, builder.build().unwrap()).unwrap();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_factory_reads_each_time_step() {
    let dir = tempfile::tempdir().unwrap();
    let key = series(None);
    write_series(dir.path(), &key, 4);

    let cache = Arc::new(TileMemoryCache::new(4));
    let factory = ContainerSourceFactory::new(DataRoot::Local(dir.path().to_path_buf()), cache.clone());

    for t in 0..4 {
        let source = factory.open(&key, t);
        let tile = source.get_tile(TileCoord::new(1, 1, 0)).await.unwrap();
        assert_eq!(tile, Some(Bytes::from(format!("t{}:1/0", t))));
    }

    // Each step is a distinct container, so nothing was served from cache.
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.stats().hit_rate(), 0.0);
}

#[tokio::test]
async fn test_level_series_uses_level_directory() {
    let dir = tempfile::tempdir().unwrap();
    let key = series(Some(1));
    write_series(dir.path(), &key, 1);

    assert!(dir
        .path()
        .join("tiles/2025-07-28T00Z_PT3H/temperature/lvl1/h0.pmtiles")
        .exists());

    let factory = ContainerSourceFactory::new(
        DataRoot::Local(dir.path().to_path_buf()),
        Arc::new(TileMemoryCache::new(1)),
    );
    let tile = factory
        .open(&key, 0)
        .get_tile(TileCoord::new(1, 0, 1))
        .await
        .unwrap();
    assert_eq!(tile, Some(Bytes::from_static(b"t0:0/1")));
}

#[tokio::test]
async fn test_missing_step_fails_only_that_source() {
    let dir = tempfile::tempdir().unwrap();
    let key = series(None);
    write_series(dir.path(), &key, 2);

    let factory = ContainerSourceFactory::new(
        DataRoot::Local(dir.path().to_path_buf()),
        Arc::new(TileMemoryCache::new(1)),
    );

    let missing = factory.open(&key, 3);
    assert!(missing
        .get_tile(TileCoord::new(1, 0, 0))
        .await
        .unwrap_err()
        .is_tile_local());

    let present = factory.open(&key, 1);
    assert!(present.get_tile(TileCoord::new(1, 0, 0)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_large_archive_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.pmtiles");

    let mut builder = ArchiveBuilder::new();
    for x in 0..64 {
        for y in 0..64 {
            builder
                .add_tile(TileCoord::new(6, x, y), format!("{:04}-{:04}-padding", x, y))
                .unwrap();
        }
    }
    std::fs::write(&path, builder.build().unwrap()).unwrap();

    let reader = PmTilesReader::new(Arc::new(FileBlobReader::new(&path)));
    assert_eq!(reader.zoom_range().await.unwrap(), (6, 6));

    let tile = reader.get_tile(TileCoord::new(6, 40, 17)).await.unwrap();
    assert_eq!(tile, Some(Bytes::from_static(b"0040-0017-padding")));
    assert_eq!(reader.get_tile(TileCoord::new(5, 20, 8)).await.unwrap(), None);
}

#[tokio::test]
async fn test_corrupt_root_directory_length_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let key = series(None);
    write_series(dir.path(), &key, 2);

    // Root directory length (header bytes 16..24) of 2^63.
    let path = dir.path().join(key.container_path(0));
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[16..24].copy_from_slice(&(1u64 << 63).to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    let reader = PmTilesReader::new(Arc::new(FileBlobReader::new(&path)));
    let err = reader.get_tile(TileCoord::new(0, 0, 0)).await.unwrap_err();
    assert!(matches!(err, FrameError::InvalidArchive(_)));

    // Neighbouring steps are unaffected.
    let factory = ContainerSourceFactory::new(
        DataRoot::Local(dir.path().to_path_buf()),
        Arc::new(TileMemoryCache::new(1)),
    );
    assert!(factory
        .open(&key, 0)
        .get_tile(TileCoord::new(1, 0, 0))
        .await
        .unwrap_err()
        .is_tile_local());
    assert_eq!(
        factory.open(&key, 1).get_tile(TileCoord::new(1, 0, 0)).await.unwrap(),
        Some(Bytes::from_static(b"t1:0/0"))
    );
}
