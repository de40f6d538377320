//! The viewer: one session over one forecast run.
//!
//! Routes UI events to the selection controller, the scheduler and the point
//! query, and keeps the legend and click annotation in sync. Every handler
//! runs to completion before the next event. Handlers that may need to
//! refresh the open annotation return a [`PendingQuery`]; the caller resolves
//! it off the event loop and hands the reading back through
//! [`Viewer::apply_reading`]. A refresh overtaken by a later frame or series
//! change is dropped; a click answered from a frame that is no longer shown
//! is asked again against the current frame.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use frame_common::{ForecastRun, FrameError, FrameResult, Metadata};
use tile_store::TileSourceFactory;

use crate::config::ViewerConfig;
use crate::legend::Legend;
use crate::map::MapRenderer;
use crate::query::{PendingQuery, PointQuery, PointReading, Popup};
use crate::scheduler::{FrameScheduler, SchedulerConfig, Transition};
use crate::selection::SelectionController;

/// Map zoom assumed until the first zoom event.
const DEFAULT_ZOOM: u8 = 3;

/// What [`Viewer::apply_reading`] did with a reading.
#[derive(Debug)]
pub enum ReadingOutcome {
    Shown,
    /// A refresh overtaken by a later one, or the annotation was closed
    Discarded,
    /// The click was answered from a frame that is no longer visible. Resolve
    /// this query and apply its reading instead.
    Reissued(PendingQuery),
}

impl ReadingOutcome {
    pub fn is_shown(&self) -> bool {
        matches!(self, ReadingOutcome::Shown)
    }
}

pub struct Viewer<M: MapRenderer> {
    metadata: Arc<Metadata>,
    run: ForecastRun,
    scheduler: FrameScheduler<M>,
    selection: SelectionController,
    query: PointQuery,
    popup: Popup,
    legend: Option<Legend>,
    time_index: usize,
    zoom: u8,
}

impl<M: MapRenderer> Viewer<M> {
    /// Create a viewer. Fails if the run identifier in `metadata` is malformed.
    pub fn new(
        metadata: Arc<Metadata>,
        map: M,
        factory: Arc<dyn TileSourceFactory>,
        config: &ViewerConfig,
    ) -> FrameResult<Self> {
        let run = metadata.forecast_run()?;
        Ok(Self {
            scheduler: FrameScheduler::new(map, factory, SchedulerConfig::from(config)),
            selection: SelectionController::new(),
            query: PointQuery::new(config.named_location.clone()),
            popup: Popup::new(),
            legend: None,
            time_index: 0,
            zoom: DEFAULT_ZOOM,
            metadata,
            run,
        })
    }

    /// Select the first published variable and render the first frame.
    pub fn start(&mut self) -> FrameResult<Transition> {
        self.start_with(None, None)
    }

    /// Render the first frame of a chosen series.
    ///
    /// `variable` defaults to the first published variable and `level` (hPa)
    /// to the first level of a level variable.
    pub fn start_with(
        &mut self,
        variable: Option<&str>,
        level: Option<u32>,
    ) -> FrameResult<Transition> {
        let variable = match variable {
            Some(v) => v.to_string(),
            None => self
                .metadata
                .variable_names()
                .first()
                .map(|v| v.to_string())
                .ok_or_else(|| {
                    FrameError::MalformedMetadata("no variables published".to_string())
                })?,
        };

        info!(
            run = %self.metadata.latest,
            variable = %variable,
            level = ?level,
            steps = self.run.step_count(),
            "Starting viewer"
        );

        let transition = self.selection.select(
            &mut self.scheduler,
            &self.metadata,
            &variable,
            level,
            self.time_index,
        )?;
        self.update_legend()?;
        Ok(transition)
    }

    pub fn on_time_index_changed(&mut self, index: usize) -> FrameResult<Option<PendingQuery>> {
        let transition = self.scheduler.on_time_index_changed(index)?;
        self.time_index = index;
        self.after_transition(transition)
    }

    /// Time-dimension variant of [`on_time_index_changed`](Self::on_time_index_changed).
    pub fn on_time_changed(&mut self, instant: DateTime<Utc>) -> FrameResult<Option<PendingQuery>> {
        let index = self
            .run
            .index_of(instant)
            .ok_or_else(|| FrameError::UnknownTime(instant.to_rfc3339()))?;
        self.on_time_index_changed(index)
    }

    pub fn on_variable_changed(&mut self, variable: &str) -> FrameResult<Option<PendingQuery>> {
        let transition = self.selection.on_variable_changed(
            &mut self.scheduler,
            &self.metadata,
            variable,
            self.time_index,
        )?;
        self.update_legend()?;
        self.after_transition(transition)
    }

    /// Handle a level change; `level` is a level value (hPa), not an index.
    pub fn on_level_changed(&mut self, level: u32) -> FrameResult<Option<PendingQuery>> {
        let transition = self.selection.on_level_changed(
            &mut self.scheduler,
            &self.metadata,
            level,
            self.time_index,
        )?;
        self.update_legend()?;
        self.after_transition(transition)
    }

    pub fn on_zoom_changed(&mut self, zoom: u8) {
        self.zoom = zoom;
    }

    /// Capture a point query for a click. `None` when no frame is visible.
    pub fn on_click(&mut self, lat: f64, lon: f64) -> FrameResult<Option<PendingQuery>> {
        self.query
            .prepare(&self.scheduler, &self.metadata, lat, lon, self.zoom)
    }

    /// Show a resolved reading if it is still current.
    ///
    /// A click reading captured before the latest frame or series change is
    /// never shown as is: the click is prepared again against what is visible
    /// now and handed back as [`ReadingOutcome::Reissued`].
    pub fn apply_reading(&mut self, reading: PointReading) -> FrameResult<ReadingOutcome> {
        if reading.generation != self.scheduler.generation() {
            if reading.refresh {
                debug!(
                    generation = reading.generation,
                    current = self.scheduler.generation(),
                    "Discarding stale refresh"
                );
                return Ok(ReadingOutcome::Discarded);
            }
            debug!(
                generation = reading.generation,
                current = self.scheduler.generation(),
                "Click answered from a replaced frame, asking again"
            );
            let pending = self.query.prepare(
                &self.scheduler,
                &self.metadata,
                reading.lat,
                reading.lon,
                self.zoom,
            )?;
            return Ok(match pending {
                Some(pending) => ReadingOutcome::Reissued(pending),
                None => ReadingOutcome::Discarded,
            });
        }
        if reading.refresh && !self.popup.is_open() {
            debug!("Annotation closed before refresh arrived");
            return Ok(ReadingOutcome::Discarded);
        }
        self.popup.open(reading);
        Ok(ReadingOutcome::Shown)
    }

    pub fn on_popup_closed(&mut self) {
        self.popup.close();
    }

    fn after_transition(&mut self, transition: Transition) -> FrameResult<Option<PendingQuery>> {
        match transition {
            Transition::Unchanged => Ok(None),
            Transition::Settled { .. } => self.refresh_query(),
        }
    }

    fn refresh_query(&self) -> FrameResult<Option<PendingQuery>> {
        let Some((lat, lon)) = self.popup.last_location() else {
            return Ok(None);
        };
        Ok(self
            .query
            .prepare(&self.scheduler, &self.metadata, lat, lon, self.zoom)?
            .map(PendingQuery::into_refresh))
    }

    fn update_legend(&mut self) -> FrameResult<()> {
        self.legend = match self.scheduler.series_key() {
            Some(key) => {
                let colormap = self.metadata.colormap(key)?;
                Some(Legend::build(colormap, self.metadata.units(&key.variable)))
            }
            None => None,
        };
        Ok(())
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn run(&self) -> &ForecastRun {
        &self.run
    }

    pub fn scheduler(&self) -> &FrameScheduler<M> {
        &self.scheduler
    }

    pub fn map(&self) -> &M {
        self.scheduler.map()
    }

    pub fn map_mut(&mut self) -> &mut M {
        self.scheduler.map_mut()
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn popup(&self) -> &Popup {
        &self.popup
    }

    pub fn legend(&self) -> Option<&Legend> {
        self.legend.as_ref()
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    /// Valid time of the selected frame.
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.run.step_time(self.time_index)
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }
}
