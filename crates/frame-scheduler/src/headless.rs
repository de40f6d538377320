//! A map renderer without a display.
//!
//! Each attached layer loads the tiles covering a fixed viewport in a
//! background task, reading the ancestor tile at the layer's native zoom
//! when the viewport is zoomed in further. Completions are queued and only
//! applied by [`HeadlessMap::pump`] to layers that are still attached, so a
//! load that finishes after its layer was removed has no effect.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use frame_common::tile::tiles_around;
use frame_common::{FrameError, FrameResult, TileCoord, MAX_ZOOM};
use tile_store::TileSource;

use crate::map::{LayerHandle, LayerOptions, MapRenderer};

/// Concurrent tile fetches per layer.
const FETCH_CONCURRENCY: usize = 8;

/// The part of the world being looked at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
    /// Tiles loaded on each side of the center tile
    pub radius: u32,
}

impl Viewport {
    /// Display tiles covering the viewport.
    pub fn tiles(&self) -> Vec<TileCoord> {
        tiles_around(self.center_lon, self.center_lat, self.zoom, self.radius)
    }
}

/// Load state of one native tile of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Pending,
    Loaded,
    /// Missing, failed to fetch or failed to decode
    Blank,
}

/// What a layer currently shows.
#[derive(Debug, Clone)]
pub struct LayerView {
    pub source_id: String,
    pub opacity: f32,
    /// Native tiles fetched for the viewport
    pub tiles: BTreeMap<TileCoord, TileState>,
}

impl LayerView {
    pub fn is_settled(&self) -> bool {
        self.tiles.values().all(|s| *s != TileState::Pending)
    }

    pub fn count(&self, state: TileState) -> usize {
        self.tiles.values().filter(|s| **s == state).count()
    }
}

#[derive(Debug)]
struct TileCompletion {
    layer: LayerHandle,
    coord: TileCoord,
    state: TileState,
}

/// Counters describing what [`HeadlessMap::pump`] has applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub loaded: u64,
    pub blank: u64,
    /// Completions that arrived for detached layers
    pub discarded: u64,
}

pub struct HeadlessMap {
    viewport: Viewport,
    runtime: Handle,
    next_id: u64,
    layers: BTreeMap<LayerHandle, LayerView>,
    tx: mpsc::UnboundedSender<TileCompletion>,
    rx: mpsc::UnboundedReceiver<TileCompletion>,
    stats: HeadlessStats,
}

impl HeadlessMap {
    /// Create a map over `viewport`. Must be called within a tokio runtime.
    pub fn new(viewport: Viewport) -> FrameResult<Self> {
        if viewport.zoom > MAX_ZOOM {
            return Err(FrameError::Internal(format!(
                "viewport zoom {} is deeper than {}",
                viewport.zoom, MAX_ZOOM
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|e| FrameError::Internal(format!("headless map needs a runtime: {}", e)))?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            viewport,
            runtime,
            next_id: 0,
            layers: BTreeMap::new(),
            tx,
            rx,
            stats: HeadlessStats::default(),
        })
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn layer(&self, handle: LayerHandle) -> Option<&LayerView> {
        self.layers.get(&handle)
    }

    pub fn layers(&self) -> impl Iterator<Item = (&LayerHandle, &LayerView)> {
        self.layers.iter()
    }

    /// Layers drawn with non-zero opacity.
    pub fn visible_layers(&self) -> Vec<LayerHandle> {
        self.layers
            .iter()
            .filter(|(_, v)| v.opacity > 0.0)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Apply every completion that has already arrived. Returns how many
    /// were applied to attached layers.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.rx.try_recv() {
            if self.apply(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait until every attached layer has no pending tile.
    pub async fn settle(&mut self) {
        while self.layers.values().any(|v| !v.is_settled()) {
            match self.rx.recv().await {
                Some(completion) => {
                    self.apply(completion);
                }
                None => break,
            }
        }
        self.pump();
    }

    fn apply(&mut self, completion: TileCompletion) -> bool {
        let Some(view) = self.layers.get_mut(&completion.layer) else {
            self.stats.discarded += 1;
            return false;
        };
        match view.tiles.get_mut(&completion.coord) {
            Some(state) => {
                *state = completion.state;
                match completion.state {
                    TileState::Loaded => self.stats.loaded += 1,
                    TileState::Blank => self.stats.blank += 1,
                    TileState::Pending => {}
                }
                true
            }
            None => false,
        }
    }
}

async fn load_tile(source: &dyn TileSource, coord: TileCoord) -> TileState {
    match source.get_tile(coord).await {
        Ok(Some(bytes)) => match image::load_from_memory(&bytes) {
            Ok(_) => TileState::Loaded,
            Err(e) => {
                warn!(source = %source.id(), tile = %coord, error = %e, "Undecodable tile");
                TileState::Blank
            }
        },
        Ok(None) => TileState::Blank,
        Err(e) => {
            warn!(source = %source.id(), tile = %coord, error = %e, "Tile fetch failed");
            TileState::Blank
        }
    }
}

impl MapRenderer for HeadlessMap {
    fn add_layer(&mut self, source: Arc<dyn TileSource>, options: LayerOptions) -> LayerHandle {
        self.next_id += 1;
        let handle = LayerHandle::new(self.next_id);

        let native: BTreeSet<TileCoord> = self
            .viewport
            .tiles()
            .into_iter()
            .map(|t| t.ancestor_at(options.max_native_zoom))
            .collect();

        debug!(
            layer = handle.id(),
            source = %source.id(),
            tiles = native.len(),
            "Attaching layer"
        );

        self.layers.insert(
            handle,
            LayerView {
                source_id: source.id().to_string(),
                opacity: 1.0,
                tiles: native.iter().map(|c| (*c, TileState::Pending)).collect(),
            },
        );

        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            stream::iter(native)
                .map(|coord| {
                    let source = source.clone();
                    async move {
                        let state = AssertUnwindSafe(load_tile(source.as_ref(), coord))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                warn!(source = %source.id(), tile = %coord, "Tile load panicked");
                                TileState::Blank
                            });
                        (coord, state)
                    }
                })
                .buffer_unordered(FETCH_CONCURRENCY)
                .for_each(|(coord, state)| {
                    // The receiver only goes away with the map itself.
                    let _ = tx.send(TileCompletion {
                        layer: handle,
                        coord,
                        state,
                    });
                    async {}
                })
                .await;
        });

        handle
    }

    fn remove_layer(&mut self, layer: LayerHandle) {
        if self.layers.remove(&layer).is_some() {
            debug!(layer = layer.id(), "Detached layer");
        }
    }

    fn set_opacity(&mut self, layer: LayerHandle, opacity: f32) {
        if let Some(view) = self.layers.get_mut(&layer) {
            view.opacity = opacity.clamp(0.0, 1.0);
        }
    }
}
