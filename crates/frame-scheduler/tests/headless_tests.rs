//! The display-less map loading real containers from disk.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use frame_common::{SeriesKey, TileCoord};
use frame_scheduler::{
    FrameScheduler, HeadlessMap, LayerOptions, MapRenderer, SchedulerConfig, TileState, Viewport,
};
use test_utils::{
    metadata, metadata_json, ramp_color, solid_png, temp_data_root, uniform_archive,
    MemorySourceFactory, DURATION, ZOOM_MAX,
};
use tile_store::{ContainerSourceFactory, DataRoot, TileMemoryCache, TileSourceFactory};

fn viewport(zoom: u8) -> Viewport {
    Viewport {
        center_lat: 48.0,
        center_lon: 2.0,
        zoom,
        radius: 1,
    }
}

fn native_tiles(viewport: &Viewport, max_native_zoom: u8) -> BTreeSet<TileCoord> {
    viewport
        .tiles()
        .into_iter()
        .map(|t| t.ancestor_at(max_native_zoom))
        .collect()
}

fn t2m() -> SeriesKey {
    metadata().series("2m_temperature", None).unwrap()
}

fn memory_factory() -> MemorySourceFactory {
    MemorySourceFactory::new().with_series(&t2m(), DURATION, |t| {
        uniform_archive(solid_png(ramp_color(t as u8)), ZOOM_MAX)
    })
}

#[tokio::test]
async fn test_layer_loads_viewport_tiles() {
    let mut map = HeadlessMap::new(viewport(ZOOM_MAX)).unwrap();
    let source = memory_factory().open(&t2m(), 0);

    let layer = map.add_layer(
        source,
        LayerOptions {
            max_native_zoom: ZOOM_MAX,
        },
    );
    map.settle().await;

    let view = map.layer(layer).unwrap();
    let expected = native_tiles(&viewport(ZOOM_MAX), ZOOM_MAX);
    assert_eq!(view.tiles.keys().copied().collect::<BTreeSet<_>>(), expected);
    assert_eq!(view.count(TileState::Loaded), expected.len());
    assert!(view.is_settled());
    assert_eq!(map.stats().loaded, expected.len() as u64);
}

#[tokio::test]
async fn test_deep_zoom_reads_native_ancestors() {
    let mut map = HeadlessMap::new(viewport(6)).unwrap();
    let source = memory_factory().open(&t2m(), 0);

    let layer = map.add_layer(
        source,
        LayerOptions {
            max_native_zoom: ZOOM_MAX,
        },
    );
    map.settle().await;

    let view = map.layer(layer).unwrap();
    assert!(view.tiles.keys().all(|t| t.z == ZOOM_MAX));
    assert!(view.tiles.len() < viewport(6).tiles().len());
    assert_eq!(view.count(TileState::Blank), 0);
}

#[tokio::test]
async fn test_unreadable_container_leaves_blank_tiles() {
    let mut map = HeadlessMap::new(viewport(ZOOM_MAX)).unwrap();
    let source = MemorySourceFactory::new().open(&t2m(), 0);

    let layer = map.add_layer(
        source,
        LayerOptions {
            max_native_zoom: ZOOM_MAX,
        },
    );
    map.settle().await;

    let view = map.layer(layer).unwrap();
    assert!(view.tiles.values().all(|s| *s == TileState::Blank));
    assert_eq!(map.stats().loaded, 0);
}

#[tokio::test]
async fn test_corrupt_container_settles_blank() {
    let mut archive = uniform_archive(solid_png(ramp_color(3)), ZOOM_MAX).to_vec();
    // Root directory length far past the end of the container.
    archive[16..24].copy_from_slice(&(1u64 << 63).to_le_bytes());
    let mut factory = MemorySourceFactory::new();
    factory.insert(t2m().container_path(0), archive.into());

    let mut map = HeadlessMap::new(viewport(ZOOM_MAX)).unwrap();
    let layer = map.add_layer(
        factory.open(&t2m(), 0),
        LayerOptions {
            max_native_zoom: ZOOM_MAX,
        },
    );
    tokio::time::timeout(Duration::from_secs(5), map.settle())
        .await
        .expect("corrupt container must not stall the layer");

    let view = map.layer(layer).unwrap();
    assert!(view.is_settled());
    assert_eq!(view.count(TileState::Blank), view.tiles.len());
}

#[tokio::test]
async fn test_viewport_deeper_than_tile_matrix_is_rejected() {
    assert!(HeadlessMap::new(viewport(40)).is_err());
    assert!(HeadlessMap::new(viewport(frame_common::MAX_ZOOM)).is_ok());
}

#[tokio::test]
async fn test_completions_for_removed_layer_are_discarded() {
    let mut map = HeadlessMap::new(viewport(ZOOM_MAX)).unwrap();
    let expected = native_tiles(&viewport(ZOOM_MAX), ZOOM_MAX).len() as u64;

    let layer = map.add_layer(
        memory_factory().open(&t2m(), 0),
        LayerOptions {
            max_native_zoom: ZOOM_MAX,
        },
    );
    map.remove_layer(layer);
    assert!(map.layer(layer).is_none());

    tokio::time::timeout(Duration::from_secs(5), async {
        while map.stats().discarded < expected {
            map.pump();
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("completions arrive");

    assert_eq!(map.stats().loaded, 0);
    assert_eq!(map.layers().count(), 0);
}

#[tokio::test]
async fn test_playback_from_local_data_root() {
    let series = [t2m()];
    let dir = temp_data_root(&metadata_json(), &series, DURATION, |_, t| {
        uniform_archive(solid_png(ramp_color(t as u8)), ZOOM_MAX)
    })
    .unwrap();

    let root = DataRoot::parse(&dir.path().display().to_string(), Duration::from_secs(5)).unwrap();
    let metadata = root.fetch_metadata().await.unwrap();
    let cache = Arc::new(TileMemoryCache::new(16));
    let factory = Arc::new(ContainerSourceFactory::new(root, cache.clone()));

    let mut scheduler = FrameScheduler::new(
        HeadlessMap::new(viewport(ZOOM_MAX)).unwrap(),
        factory,
        SchedulerConfig {
            look_ahead: 2,
            display_opacity: 0.8,
        },
    );
    scheduler
        .select_series(&metadata, "2m_temperature", None)
        .unwrap();

    for index in 0..=3 {
        scheduler.on_time_index_changed(index).unwrap();
        scheduler.map_mut().settle().await;

        let visible = scheduler.map().visible_layers();
        assert_eq!(visible, vec![scheduler.layer(index).unwrap()]);
        let view = scheduler.map().layer(visible[0]).unwrap();
        assert!(view.source_id.ends_with(&t2m().container_path(index)));
        assert_eq!(view.count(TileState::Blank), 0);
        assert_eq!(scheduler.map().layers().count(), 3);
    }

    // Frames 0..=5 were each fetched once; promoted frames were not refetched.
    let per_frame = native_tiles(&viewport(ZOOM_MAX), ZOOM_MAX).len();
    assert_eq!(cache.len(), 6 * per_frame);
}
