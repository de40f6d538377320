//! Variable and pressure level selection.
//!
//! Translates the two selection events into scheduler calls. Every change
//! selects a fresh series and immediately re-renders the current slider
//! position; switching variables never resets time.

use tracing::debug;

use frame_common::{FrameError, FrameResult, Metadata};

use crate::map::MapRenderer;
use crate::scheduler::{FrameScheduler, Transition};

/// The pressure level dropdown, present only for level variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSelector {
    /// Level values (hPa) in metadata order
    pub options: Vec<u32>,
    /// Index into `options`
    pub selected: usize,
}

impl LevelSelector {
    pub fn selected_level(&self) -> Option<u32> {
        self.options.get(self.selected).copied()
    }
}

/// Tracks the active variable and level.
#[derive(Debug, Clone, Default)]
pub struct SelectionController {
    variable: Option<String>,
    level_selector: Option<LevelSelector>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    pub fn level_selector(&self) -> Option<&LevelSelector> {
        self.level_selector.as_ref()
    }

    /// Selected level index, when the level selector is shown.
    pub fn level_index(&self) -> Option<usize> {
        self.level_selector.as_ref().map(|s| s.selected)
    }

    /// Handle a variable change.
    ///
    /// A level variable shows the level selector, defaulting to the first
    /// level if it was hidden and keeping the current level otherwise. A
    /// surface variable hides it.
    pub fn on_variable_changed<M: MapRenderer>(
        &mut self,
        scheduler: &mut FrameScheduler<M>,
        metadata: &Metadata,
        variable: &str,
        time_index: usize,
    ) -> FrameResult<Transition> {
        let info = metadata.variable(variable)?;
        let selector = if info.is_level {
            match &self.level_selector {
                Some(shown) => Some(shown.clone()),
                None => Some(LevelSelector {
                    options: metadata.levels.clone(),
                    selected: 0,
                }),
            }
        } else {
            None
        };

        debug!(
            variable,
            level = ?selector.as_ref().and_then(LevelSelector::selected_level),
            "Variable changed"
        );

        scheduler.select_series(metadata, variable, selector.as_ref().map(|s| s.selected))?;
        self.variable = Some(variable.to_string());
        self.level_selector = selector;

        scheduler.on_time_index_changed(time_index)
    }

    /// Select a variable and, for a level variable, a level (hPa) at once.
    ///
    /// Without `level` this is [`on_variable_changed`](Self::on_variable_changed).
    pub fn select<M: MapRenderer>(
        &mut self,
        scheduler: &mut FrameScheduler<M>,
        metadata: &Metadata,
        variable: &str,
        level: Option<u32>,
        time_index: usize,
    ) -> FrameResult<Transition> {
        let Some(level) = level else {
            return self.on_variable_changed(scheduler, metadata, variable, time_index);
        };
        if !metadata.variable(variable)?.is_level {
            return Err(FrameError::Internal(format!(
                "'{}' has no pressure levels",
                variable
            )));
        }
        let index = metadata.level_index(level)?;

        debug!(variable, level, index, "Series selected");

        scheduler.select_series(metadata, variable, Some(index))?;
        self.variable = Some(variable.to_string());
        self.level_selector = Some(LevelSelector {
            options: metadata.levels.clone(),
            selected: index,
        });

        scheduler.on_time_index_changed(time_index)
    }

    /// Handle a level change from the level selector.
    pub fn on_level_changed<M: MapRenderer>(
        &mut self,
        scheduler: &mut FrameScheduler<M>,
        metadata: &Metadata,
        level: u32,
        time_index: usize,
    ) -> FrameResult<Transition> {
        let variable = self.variable.clone().ok_or(FrameError::NoActiveSeries)?;
        if self.level_selector.is_none() {
            return Err(FrameError::Internal(format!(
                "level changed while '{}' has no level selector",
                variable
            )));
        }
        let index = metadata.level_index(level)?;

        debug!(variable = %variable, level, index, "Level changed");

        scheduler.select_series(metadata, &variable, Some(index))?;
        if let Some(selector) = self.level_selector.as_mut() {
            selector.selected = index;
        }

        scheduler.on_time_index_changed(time_index)
    }
}
