//! Viewer sessions behind each subcommand.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use frame_common::{FrameResult, Metadata};
use frame_scheduler::{
    HeadlessMap, Legend, PendingQuery, PointReading, ReadingOutcome, TileState, Viewer,
    ViewerConfig, Viewport, Visibility,
};
use tile_store::{ContainerSourceFactory, DataRoot, TileMemoryCache};

use crate::metrics;

/// A time given either as an index into the run or as an instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeArg {
    Index(usize),
    Instant(DateTime<Utc>),
}

pub fn parse_time(s: &str) -> Result<TimeArg, String> {
    if let Ok(index) = s.parse::<usize>() {
        return Ok(TimeArg::Index(index));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| TimeArg::Instant(t.with_timezone(&Utc)))
        .map_err(|e| format!("'{}' is neither a time index nor an RFC 3339 instant: {}", s, e))
}

#[derive(Debug, Serialize)]
pub struct VariableSummary {
    pub name: String,
    pub units: String,
    pub is_level: bool,
}

/// Output of `interval`.
#[derive(Debug, Serialize)]
pub struct IntervalSummary {
    pub run: String,
    pub interval: String,
    pub steps: usize,
    pub levels: Vec<u32>,
    pub zoom_max: u8,
    pub variables: Vec<VariableSummary>,
}

/// How one frame of `animate` settled.
#[derive(Debug, Serialize)]
pub struct FrameReport {
    pub index: usize,
    pub time: Option<DateTime<Utc>>,
    pub prefetch_hit: bool,
    pub loaded_tiles: usize,
    pub blank_tiles: usize,
    pub settle_ms: u64,
    /// Annotation text at the viewport center, with `--annotate`
    pub annotation: Option<String>,
}

/// Frame range and pacing of `animate`.
#[derive(Debug, Clone, Copy)]
pub struct Playback {
    pub from: usize,
    /// Last index, inclusive; the end of the run when unset
    pub to: Option<usize>,
    pub frame_delay: Duration,
    /// Keep an annotation open at the viewport center
    pub annotate: bool,
}

/// Metadata and tile access shared by every viewer of one invocation.
pub struct Session {
    config: ViewerConfig,
    metadata: Arc<Metadata>,
    cache: Arc<TileMemoryCache>,
    factory: Arc<ContainerSourceFactory>,
}

impl Session {
    pub async fn open(config: ViewerConfig) -> Result<Self> {
        let root = DataRoot::parse(&config.data_root, config.http_timeout())?;
        let metadata = root
            .fetch_metadata()
            .await
            .with_context(|| format!("loading metadata from {}", config.data_root))?;
        info!(
            run = %metadata.latest,
            variables = metadata.variables.len(),
            "Loaded forecast metadata"
        );

        let cache = Arc::new(TileMemoryCache::new(config.tile_cache_size_mb));
        let factory = Arc::new(ContainerSourceFactory::new(root, cache.clone()));

        Ok(Self {
            config,
            metadata: Arc::new(metadata),
            cache,
            factory,
        })
    }

    pub fn cache(&self) -> &TileMemoryCache {
        &self.cache
    }

    pub fn interval(&self) -> Result<IntervalSummary> {
        let run = self.metadata.forecast_run()?;
        let variables = self
            .metadata
            .variable_names()
            .into_iter()
            .map(|name| {
                Ok(VariableSummary {
                    name: name.to_string(),
                    units: self.metadata.units(name).to_string(),
                    is_level: self.metadata.variable(name)?.is_level,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(IntervalSummary {
            run: self.metadata.latest.clone(),
            interval: run.iso_interval(),
            steps: run.step_count(),
            levels: self.metadata.levels.clone(),
            zoom_max: self.metadata.zoom_max,
            variables,
        })
    }

    /// A started viewer showing the requested series at time 0.
    fn viewer(
        &self,
        viewport: Viewport,
        variable: Option<&str>,
        level: Option<u32>,
    ) -> Result<Viewer<HeadlessMap>> {
        let mut viewer = Viewer::new(
            self.metadata.clone(),
            HeadlessMap::new(viewport)?,
            self.factory.clone(),
            &self.config,
        )?;
        viewer.on_zoom_changed(viewport.zoom);
        viewer.start_with(variable, level)?;
        Ok(viewer)
    }

    pub async fn animate(
        &self,
        variable: Option<&str>,
        level: Option<u32>,
        viewport: Viewport,
        playback: Playback,
    ) -> Result<Vec<FrameReport>> {
        let Playback {
            from,
            to,
            frame_delay,
            annotate,
        } = playback;
        let mut viewer = self.viewer(viewport, variable, level)?;
        let last = to.unwrap_or_else(|| viewer.run().last_index());
        if from > last {
            return Err(anyhow!("empty frame range {}..={}", from, last));
        }

        viewer.on_time_index_changed(from)?;
        viewer.map_mut().settle().await;

        if annotate {
            if let Some(pending) = viewer.on_click(viewport.center_lat, viewport.center_lon)? {
                match show_reading(&mut viewer, pending).await {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!("No data under the annotation"),
                    Err(e) => warn!(error = %e, "Annotation query failed"),
                }
            }
        }

        let mut reports = Vec::with_capacity(last - from + 1);
        for index in from..=last {
            if index != from && !frame_delay.is_zero() {
                tokio::time::sleep(frame_delay).await;
            }
            let prefetch_hit = viewer.scheduler().visibility(index) == Some(Visibility::Hidden);
            let started = Instant::now();

            let refresh = if index == from {
                None
            } else {
                viewer.on_time_index_changed(index)?
            };
            viewer.map_mut().settle().await;
            let settle_ms = started.elapsed().as_millis() as u64;

            if let Some(pending) = refresh {
                if let Err(e) = show_reading(&mut viewer, pending).await {
                    warn!(index, error = %e, "Annotation refresh failed");
                }
            }

            let view = viewer
                .scheduler()
                .layer(index)
                .and_then(|layer| viewer.map().layer(layer));
            let (loaded_tiles, blank_tiles) = view
                .map(|v| (v.count(TileState::Loaded), v.count(TileState::Blank)))
                .unwrap_or_default();

            debug!(index, prefetch_hit, loaded_tiles, blank_tiles, settle_ms, "Frame shown");
            reports.push(FrameReport {
                index,
                time: viewer.current_time(),
                prefetch_hit: index != from && prefetch_hit,
                loaded_tiles,
                blank_tiles,
                settle_ms,
                annotation: viewer.popup().reading().map(PointReading::label),
            });
        }

        metrics::record_headless(&viewer.map().stats());
        Ok(reports)
    }

    pub async fn query(
        &self,
        variable: Option<&str>,
        level: Option<u32>,
        time: TimeArg,
        lat: f64,
        lon: f64,
        zoom: u8,
    ) -> Result<Option<PointReading>> {
        let viewport = Viewport {
            center_lat: lat,
            center_lon: lon,
            zoom,
            radius: 0,
        };
        let mut viewer = self.viewer(viewport, variable, level)?;
        match time {
            TimeArg::Index(index) => viewer.on_time_index_changed(index)?,
            TimeArg::Instant(instant) => viewer.on_time_changed(instant)?,
        };

        let Some(pending) = viewer.on_click(lat, lon)? else {
            return Ok(None);
        };
        debug!(tile = %pending.tile, source = pending.source_id(), "Resolving point query");

        show_reading(&mut viewer, pending)
            .await
            .map_err(anyhow::Error::from)
    }

    pub async fn legend(&self, variable: Option<&str>, level: Option<u32>) -> Result<Legend> {
        let viewport = Viewport {
            center_lat: 0.0,
            center_lon: 0.0,
            zoom: 0,
            radius: 0,
        };
        let viewer = self.viewer(viewport, variable, level)?;
        viewer
            .legend()
            .cloned()
            .ok_or_else(|| anyhow!("no series selected"))
    }
}

/// Resolve a point query and show its reading, asking again while the
/// answer comes from a frame that has since been replaced.
async fn show_reading(
    viewer: &mut Viewer<HeadlessMap>,
    mut pending: PendingQuery,
) -> FrameResult<Option<PointReading>> {
    loop {
        let Some(reading) = pending.resolve().await? else {
            return Ok(None);
        };
        match viewer.apply_reading(reading.clone())? {
            ReadingOutcome::Shown => return Ok(Some(reading)),
            ReadingOutcome::Discarded => return Ok(None),
            ReadingOutcome::Reissued(again) => pending = again,
        }
    }
}
