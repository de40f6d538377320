//! A map renderer that records every call.

use std::collections::BTreeMap;
use std::sync::Arc;

use frame_scheduler::{LayerHandle, LayerOptions, MapRenderer};
use tile_store::TileSource;

#[derive(Debug, Clone, PartialEq)]
pub enum MapCall {
    Add {
        layer: LayerHandle,
        source: String,
        max_native_zoom: u8,
    },
    Remove(LayerHandle),
    Opacity(LayerHandle, f32),
}

#[derive(Debug, Clone)]
pub struct AttachedLayer {
    pub source: Arc<dyn TileSource>,
    pub opacity: f32,
}

/// Records calls and tracks which layers are attached. Loads nothing.
#[derive(Debug, Default)]
pub struct RecordingMap {
    next: u64,
    calls: Vec<MapCall>,
    attached: BTreeMap<LayerHandle, AttachedLayer>,
}

impl RecordingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[MapCall] {
        &self.calls
    }

    /// Forget recorded calls, keeping the attached layers.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn attached(&self) -> &BTreeMap<LayerHandle, AttachedLayer> {
        &self.attached
    }

    pub fn opacity(&self, layer: LayerHandle) -> Option<f32> {
        self.attached.get(&layer).map(|l| l.opacity)
    }

    /// Source ids of layers drawn with non-zero opacity.
    pub fn visible_sources(&self) -> Vec<String> {
        self.attached
            .values()
            .filter(|l| l.opacity > 0.0)
            .map(|l| l.source.id().to_string())
            .collect()
    }

    pub fn add_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, MapCall::Add { .. }))
            .count()
    }

    pub fn remove_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, MapCall::Remove(_)))
            .count()
    }
}

impl MapRenderer for RecordingMap {
    fn add_layer(&mut self, source: Arc<dyn TileSource>, options: LayerOptions) -> LayerHandle {
        self.next += 1;
        let layer = LayerHandle::new(self.next);
        self.calls.push(MapCall::Add {
            layer,
            source: source.id().to_string(),
            max_native_zoom: options.max_native_zoom,
        });
        self.attached.insert(
            layer,
            AttachedLayer {
                source,
                opacity: 1.0,
            },
        );
        layer
    }

    fn remove_layer(&mut self, layer: LayerHandle) {
        self.calls.push(MapCall::Remove(layer));
        self.attached.remove(&layer);
    }

    fn set_opacity(&mut self, layer: LayerHandle, opacity: f32) {
        self.calls.push(MapCall::Opacity(layer, opacity));
        if let Some(attached) = self.attached.get_mut(&layer) {
            attached.opacity = opacity;
        }
    }
}
