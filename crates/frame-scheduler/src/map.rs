//! The map-rendering capability consumed by the scheduler.

use std::sync::Arc;
use tile_store::TileSource;

/// Opaque handle to a layer attached to a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerHandle(u64);

impl LayerHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Options for a new raster layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerOptions {
    /// Highest zoom with native tiles; deeper zooms upsample the ancestor tile.
    pub max_native_zoom: u8,
}

/// A map that can display tile-source layers.
///
/// Calls must return promptly. Tile loading triggered by `add_layer` happens
/// in the background and must never be applied to a layer after
/// `remove_layer` has been called for it.
pub trait MapRenderer {
    /// Attach a layer rendering `source`. New layers start fully opaque.
    fn add_layer(&mut self, source: Arc<dyn TileSource>, options: LayerOptions) -> LayerHandle;

    /// Detach a layer. Unknown handles are ignored.
    fn remove_layer(&mut self, layer: LayerHandle);

    /// Set a layer's opacity in [0, 1].
    fn set_opacity(&mut self, layer: LayerHandle, opacity: f32);
}

impl<M: MapRenderer + ?Sized> MapRenderer for Box<M> {
    fn add_layer(&mut self, source: Arc<dyn TileSource>, options: LayerOptions) -> LayerHandle {
        (**self).add_layer(source, options)
    }

    fn remove_layer(&mut self, layer: LayerHandle) {
        (**self).remove_layer(layer)
    }

    fn set_opacity(&mut self, layer: LayerHandle, opacity: f32) {
        (**self).set_opacity(layer, opacity)
    }
}
