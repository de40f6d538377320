//! Frame cache and prefetch scheduler.
//!
//! Owns every layer the viewer attaches to the map. At most one frame is
//! visible; the next `look_ahead` frames are attached hidden (opacity 0) so
//! that playback can promote them without waiting on tiles. Everything else
//! is evicted as soon as a new frame settles, including frames behind the
//! current one.
//!
//! The scheduler is driven by two events:
//!
//! - [`FrameScheduler::select_series`] flushes all state and opens lazy tile
//!   sources for every time step of the new series.
//! - [`FrameScheduler::on_time_index_changed`] settles a new visible frame
//!   and rebuilds the look-ahead window from scratch.
//!
//! A repeated time index is a no-op. Playback drivers may report the same
//! index several times in a row and the visible layer must not be rebuilt.

use metrics::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use frame_common::{FrameError, FrameResult, Metadata, SeriesKey};
use tile_store::{TileSource, TileSourceFactory};

use crate::config::ViewerConfig;
use crate::map::{LayerHandle, LayerOptions, MapRenderer};

/// Opacity of hidden pre-rendered frames.
const HIDDEN_OPACITY: f32 = 0.0;

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Number of future frames kept attached but hidden.
    pub look_ahead: usize,
    /// Opacity applied to the visible frame.
    pub display_opacity: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            look_ahead: 4,
            display_opacity: 0.8,
        }
    }
}

impl From<&ViewerConfig> for SchedulerConfig {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            look_ahead: config.look_ahead,
            display_opacity: config.layer_opacity.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

#[derive(Debug)]
struct CacheEntry {
    source: Arc<dyn TileSource>,
    layer: Option<LayerHandle>,
    visibility: Visibility,
}

#[derive(Debug)]
struct ActiveSeries {
    key: SeriesKey,
    duration: usize,
    max_native_zoom: u8,
    /// One lazy source per time step, `0..=duration`
    sources: Vec<Arc<dyn TileSource>>,
    entries: BTreeMap<usize, CacheEntry>,
    current: Option<usize>,
}

/// Observable state of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    SeriesLoaded {
        series: SeriesKey,
        current: Option<usize>,
        /// Resident time indices in ascending order
        resident: Vec<usize>,
    },
}

/// Outcome of a time index change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The index was already current; nothing was touched.
    Unchanged,
    Settled {
        index: usize,
        previous: Option<usize>,
        /// The frame was already pre-rendered and only had to be shown
        prefetch_hit: bool,
        /// Indices that got a new hidden layer
        loaded: Vec<usize>,
        /// Indices whose layer was dropped, excluding the previous frame
        evicted: Vec<usize>,
    },
}

/// The frame cache and prefetch scheduler.
pub struct FrameScheduler<M: MapRenderer> {
    map: M,
    factory: Arc<dyn TileSourceFactory>,
    config: SchedulerConfig,
    series: Option<ActiveSeries>,
    generation: u64,
}

impl<M: MapRenderer> FrameScheduler<M> {
    pub fn new(map: M, factory: Arc<dyn TileSourceFactory>, config: SchedulerConfig) -> Self {
        Self {
            map,
            factory,
            config,
            series: None,
            generation: 0,
        }
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Counter bumped by every series selection and every settled frame.
    ///
    /// Work started against one generation is stale once it changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Make `(variable, level_index)` the active series.
    ///
    /// The key is resolved before anything is torn down, so an invalid
    /// selection leaves the current series untouched. On success all layers
    /// are removed and the current index is unset; nothing is rendered until
    /// the next [`on_time_index_changed`](Self::on_time_index_changed).
    pub fn select_series(
        &mut self,
        metadata: &Metadata,
        variable: &str,
        level_index: Option<usize>,
    ) -> FrameResult<&SeriesKey> {
        let key = metadata.series(variable, level_index)?;
        let duration = metadata.duration()?;

        self.flush();

        let sources = (0..=duration)
            .map(|t| self.factory.open(&key, t))
            .collect::<Vec<_>>();

        info!(
            series = %key,
            steps = sources.len(),
            max_native_zoom = metadata.zoom_max,
            "Selected series"
        );
        counter!("frame_series_selected_total").increment(1);

        self.generation += 1;
        let series = self.series.insert(ActiveSeries {
            key,
            duration,
            max_native_zoom: metadata.zoom_max,
            sources,
            entries: BTreeMap::new(),
            current: None,
        });
        Ok(&series.key)
    }

    /// Remove every layer and forget the active series.
    pub fn clear(&mut self) {
        if self.series.is_some() {
            self.flush();
            self.generation += 1;
        }
    }

    fn flush(&mut self) {
        if let Some(series) = self.series.take() {
            let removed = series.entries.len();
            for entry in series.entries.into_values() {
                if let Some(layer) = entry.layer {
                    self.map.remove_layer(layer);
                }
            }
            debug!(series = %series.key, removed, "Flushed frame cache");
        }
    }

    /// Settle `index` as the visible frame and rebuild the look-ahead window.
    pub fn on_time_index_changed(&mut self, index: usize) -> FrameResult<Transition> {
        let Self {
            map,
            config,
            series,
            generation,
            ..
        } = self;
        let series = series.as_mut().ok_or(FrameError::NoActiveSeries)?;

        if index > series.duration {
            return Err(FrameError::TimeIndexOutOfRange {
                index,
                duration: series.duration,
            });
        }
        if series.current == Some(index) {
            return Ok(Transition::Unchanged);
        }

        let options = LayerOptions {
            max_native_zoom: series.max_native_zoom,
        };

        // Take down the frame that was visible.
        let previous = series.current.take();
        if let Some(old) = previous {
            if let Some(layer) = series.entries.remove(&old).and_then(|e| e.layer) {
                map.remove_layer(layer);
            }
        }

        // Promote a pre-rendered frame, or attach a fresh one.
        let hidden_layer = series
            .entries
            .get(&index)
            .filter(|e| e.visibility == Visibility::Hidden)
            .and_then(|e| e.layer);
        let prefetch_hit = hidden_layer.is_some();
        let visible_layer = match hidden_layer {
            Some(layer) => {
                counter!("frame_prefetch_hits_total").increment(1);
                layer
            }
            None => {
                counter!("frame_prefetch_misses_total").increment(1);
                let source = series.sources[index].clone();
                map.add_layer(source, options)
            }
        };
        series.entries.insert(
            index,
            CacheEntry {
                source: series.sources[index].clone(),
                layer: Some(visible_layer),
                visibility: Visibility::Visible,
            },
        );
        map.set_opacity(visible_layer, config.display_opacity);
        series.current = Some(index);

        // Rebuild the window: evict first so at most one layer is visible and
        // no stale layer outlives the call.
        let window_end = index.saturating_add(config.look_ahead).min(series.duration);
        let in_window = |i: usize| i == index || (i > index && i <= window_end);

        let evicted: Vec<usize> = series
            .entries
            .keys()
            .copied()
            .filter(|&i| !in_window(i))
            .collect();
        for i in &evicted {
            if let Some(layer) = series.entries.remove(i).and_then(|e| e.layer) {
                map.remove_layer(layer);
            }
        }

        let mut loaded = Vec::new();
        for i in (index + 1)..=window_end {
            if series.entries.contains_key(&i) {
                continue;
            }
            let source = series.sources[i].clone();
            let layer = map.add_layer(source.clone(), options);
            map.set_opacity(layer, HIDDEN_OPACITY);
            series.entries.insert(
                i,
                CacheEntry {
                    source,
                    layer: Some(layer),
                    visibility: Visibility::Hidden,
                },
            );
            loaded.push(i);
        }

        if !evicted.is_empty() {
            counter!("frame_layers_evicted_total").increment(evicted.len() as u64);
        }
        *generation += 1;

        debug!(
            series = %series.key,
            index,
            previous = ?previous,
            prefetch_hit,
            loaded = ?loaded,
            evicted = ?evicted,
            "Frame settled"
        );

        Ok(Transition::Settled {
            index,
            previous,
            prefetch_hit,
            loaded,
            evicted,
        })
    }

    /// Tile source behind the visible frame.
    pub fn current_source(&self) -> Option<Arc<dyn TileSource>> {
        let series = self.series.as_ref()?;
        let current = series.current?;
        series.entries.get(&current).map(|e| e.source.clone())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.series.as_ref().and_then(|s| s.current)
    }

    pub fn series_key(&self) -> Option<&SeriesKey> {
        self.series.as_ref().map(|s| &s.key)
    }

    /// Highest time index of the active series.
    pub fn duration(&self) -> Option<usize> {
        self.series.as_ref().map(|s| s.duration)
    }

    /// Time indices with a cache entry, ascending.
    pub fn resident_indices(&self) -> Vec<usize> {
        self.series
            .as_ref()
            .map(|s| s.entries.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Time indices whose entry is visible. Holds at most one element.
    pub fn visible_indices(&self) -> Vec<usize> {
        self.series
            .as_ref()
            .map(|s| {
                s.entries
                    .iter()
                    .filter(|(_, e)| e.visibility == Visibility::Visible)
                    .map(|(&i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn visibility(&self, index: usize) -> Option<Visibility> {
        self.series
            .as_ref()
            .and_then(|s| s.entries.get(&index))
            .map(|e| e.visibility)
    }

    pub fn layer(&self, index: usize) -> Option<LayerHandle> {
        self.series
            .as_ref()
            .and_then(|s| s.entries.get(&index))
            .and_then(|e| e.layer)
    }

    pub fn state(&self) -> SchedulerState {
        match &self.series {
            None => SchedulerState::Idle,
            Some(series) => SchedulerState::SeriesLoaded {
                series: series.key.clone(),
                current: series.current,
                resident: series.entries.keys().copied().collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doubles::*;

    mod doubles {
        use async_trait::async_trait;
        use bytes::Bytes;
        use frame_common::{FrameResult, SeriesKey, TileCoord};
        use std::collections::HashMap;
        use std::sync::Arc;
        use tile_store::{TileSource, TileSourceFactory};

        use crate::map::{LayerHandle, LayerOptions, MapRenderer};

        #[derive(Debug)]
        pub struct NullSource(pub String);

        #[async_trait]
        impl TileSource for NullSource {
            fn id(&self) -> &str {
                &self.0
            }

            async fn get_tile(&self, _coord: TileCoord) -> FrameResult<Option<Bytes>> {
                Ok(None)
            }
        }

        pub struct NullFactory;

        impl TileSourceFactory for NullFactory {
            fn open(&self, series: &SeriesKey, time_index: usize) -> Arc<dyn TileSource> {
                Arc::new(NullSource(series.container_path(time_index)))
            }
        }

        /// Tracks attached layers and their opacity.
        #[derive(Default)]
        pub struct CountingMap {
            next: u64,
            pub attached: HashMap<LayerHandle, f32>,
            pub adds: usize,
            pub removes: usize,
        }

        impl MapRenderer for CountingMap {
            fn add_layer(
                &mut self,
                _source: Arc<dyn TileSource>,
                _options: LayerOptions,
            ) -> LayerHandle {
                self.next += 1;
                self.adds += 1;
                let handle = LayerHandle::new(self.next);
                self.attached.insert(handle, 1.0);
                handle
            }

            fn remove_layer(&mut self, layer: LayerHandle) {
                self.removes += 1;
                self.attached.remove(&layer);
            }

            fn set_opacity(&mut self, layer: LayerHandle, opacity: f32) {
                if let Some(o) = self.attached.get_mut(&layer) {
                    *o = opacity;
                }
            }
        }
    }

    const METADATA: &str = r#"{
        "latest": "2025-07-28T00Z_PT12H",
        "zoom_max": 3,
        "levels": [500, 850],
        "variables": {
            "2m_temperature": {"is_level": false, "units": "K"},
            "temperature": {"is_level": true, "units": "K"}
        },
        "colormaps": {
            "2m_temperature": {"values": [0.0], "colors": [{"r":0,"g":0,"b":0}]},
            "temperature": {
                "500": {"values": [0.0], "colors": [{"r":0,"g":0,"b":0}]},
                "850": {"values": [0.0], "colors": [{"r":0,"g":0,"b":0}]}
            }
        }
    }"#;

    fn scheduler() -> (FrameScheduler<CountingMap>, Metadata) {
        let metadata = Metadata::from_json(METADATA).unwrap();
        let scheduler = FrameScheduler::new(
            CountingMap::default(),
            Arc::new(NullFactory),
            SchedulerConfig::default(),
        );
        (scheduler, metadata)
    }

    #[test]
    fn test_idle_until_series_selected() {
        let (mut scheduler, _) = scheduler();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.current_source().is_none());
        assert!(matches!(
            scheduler.on_time_index_changed(0),
            Err(FrameError::NoActiveSeries)
        ));
    }

    #[test]
    fn test_select_series_renders_nothing() {
        let (mut scheduler, metadata) = scheduler();
        let key = scheduler
            .select_series(&metadata, "2m_temperature", None)
            .unwrap()
            .clone();
        assert_eq!(key.variable, "2m_temperature");
        assert_eq!(scheduler.duration(), Some(12));
        assert_eq!(scheduler.map().adds, 0);
        assert!(scheduler.resident_indices().is_empty());
        assert!(scheduler.current_source().is_none());
    }

    #[test]
    fn test_first_frame_is_a_miss_with_full_window() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();

        let transition = scheduler.on_time_index_changed(0).unwrap();
        assert_eq!(
            transition,
            Transition::Settled {
                index: 0,
                previous: None,
                prefetch_hit: false,
                loaded: vec![1, 2, 3, 4],
                evicted: vec![],
            }
        );
        assert_eq!(scheduler.resident_indices(), vec![0, 1, 2, 3, 4]);
        assert_eq!(scheduler.visible_indices(), vec![0]);

        let visible = scheduler.layer(0).unwrap();
        assert!((scheduler.map().attached[&visible] - 0.8).abs() < f32::EPSILON);
        for i in 1..=4 {
            let hidden = scheduler.layer(i).unwrap();
            assert_eq!(scheduler.map().attached[&hidden], 0.0);
        }
    }

    #[test]
    fn test_step_forward_promotes_prefetched_layer() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();
        scheduler.on_time_index_changed(0).unwrap();
        let prefetched = scheduler.layer(1).unwrap();

        let transition = scheduler.on_time_index_changed(1).unwrap();
        assert!(matches!(
            transition,
            Transition::Settled { prefetch_hit: true, ref loaded, .. } if loaded == &vec![5]
        ));
        assert_eq!(scheduler.layer(1), Some(prefetched));
        assert_eq!(scheduler.resident_indices(), vec![1, 2, 3, 4, 5]);
        assert_eq!(scheduler.map().attached.len(), 5);
    }

    #[test]
    fn test_repeated_index_is_noop() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();
        scheduler.on_time_index_changed(3).unwrap();
        let (adds, removes, generation) = (
            scheduler.map().adds,
            scheduler.map().removes,
            scheduler.generation(),
        );

        assert_eq!(scheduler.on_time_index_changed(3).unwrap(), Transition::Unchanged);
        assert_eq!(scheduler.map().adds, adds);
        assert_eq!(scheduler.map().removes, removes);
        assert_eq!(scheduler.generation(), generation);
    }

    #[test]
    fn test_backward_jump_evicts_everything_ahead_of_window() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();
        scheduler.on_time_index_changed(6).unwrap();

        let transition = scheduler.on_time_index_changed(1).unwrap();
        match transition {
            Transition::Settled {
                prefetch_hit,
                evicted,
                loaded,
                ..
            } => {
                assert!(!prefetch_hit);
                assert_eq!(evicted, vec![7, 8, 9, 10]);
                assert_eq!(loaded, vec![2, 3, 4, 5]);
            }
            Transition::Unchanged => panic!("expected a settled frame"),
        }
        assert_eq!(scheduler.resident_indices(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_window_clipped_at_end_of_run() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();
        scheduler.on_time_index_changed(10).unwrap();
        assert_eq!(scheduler.resident_indices(), vec![10, 11, 12]);

        scheduler.on_time_index_changed(12).unwrap();
        assert_eq!(scheduler.resident_indices(), vec![12]);
        assert_eq!(scheduler.map().attached.len(), 1);

        assert!(matches!(
            scheduler.on_time_index_changed(13),
            Err(FrameError::TimeIndexOutOfRange { index: 13, duration: 12 })
        ));
        assert_eq!(scheduler.current_index(), Some(12));
    }

    #[test]
    fn test_select_series_flushes_all_layers() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "temperature", Some(0)).unwrap();
        scheduler.on_time_index_changed(2).unwrap();
        assert_eq!(scheduler.map().attached.len(), 5);

        scheduler.select_series(&metadata, "temperature", Some(1)).unwrap();
        assert!(scheduler.map().attached.is_empty());
        assert!(scheduler.resident_indices().is_empty());
        assert_eq!(scheduler.current_index(), None);

        // The same index renders again after a series change.
        let transition = scheduler.on_time_index_changed(2).unwrap();
        assert!(matches!(transition, Transition::Settled { prefetch_hit: false, .. }));
        assert!(scheduler
            .current_source()
            .unwrap()
            .id()
            .contains("temperature/lvl1/h2.pmtiles"));
    }

    #[test]
    fn test_invalid_selection_keeps_current_series() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();
        scheduler.on_time_index_changed(0).unwrap();

        assert!(scheduler.select_series(&metadata, "temperature", Some(5)).is_err());
        assert!(scheduler.select_series(&metadata, "wind", None).is_err());
        assert_eq!(scheduler.visible_indices(), vec![0]);
        assert_eq!(scheduler.series_key().unwrap().variable, "2m_temperature");
    }

    #[test]
    fn test_zero_look_ahead_keeps_single_layer() {
        let metadata = Metadata::from_json(METADATA).unwrap();
        let mut scheduler = FrameScheduler::new(
            CountingMap::default(),
            Arc::new(NullFactory),
            SchedulerConfig {
                look_ahead: 0,
                display_opacity: 1.0,
            },
        );
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();
        for i in [0, 1, 5, 2] {
            scheduler.on_time_index_changed(i).unwrap();
            assert_eq!(scheduler.resident_indices(), vec![i]);
        }
        assert_eq!(scheduler.map().attached.len(), 1);
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let (mut scheduler, metadata) = scheduler();
        scheduler.select_series(&metadata, "2m_temperature", None).unwrap();
        scheduler.on_time_index_changed(0).unwrap();
        let generation = scheduler.generation();

        scheduler.clear();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.map().attached.is_empty());
        assert!(scheduler.generation() > generation);
    }
}
