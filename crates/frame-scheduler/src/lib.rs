//! Frame scheduling for time-animated forecast maps.
//!
//! The [`FrameScheduler`] keeps exactly one frame of the active series
//! visible and pre-renders a short look-ahead window of hidden frames. The
//! [`SelectionController`] turns variable and level changes into series
//! selections, [`PointQuery`] reads physical values back out of rendered
//! tiles, and [`Viewer`] wires them together for one session.

pub mod config;
pub mod headless;
pub mod legend;
pub mod map;
pub mod query;
pub mod scheduler;
pub mod selection;
pub mod viewer;

pub use config::{NamedLocation, ViewerConfig, DEFAULT_DATA_ROOT};
pub use headless::{HeadlessMap, HeadlessStats, LayerView, TileState, Viewport};
pub use legend::Legend;
pub use map::{LayerHandle, LayerOptions, MapRenderer};
pub use query::{PendingQuery, PointQuery, PointReading, Popup};
pub use scheduler::{FrameScheduler, SchedulerConfig, SchedulerState, Transition, Visibility};
pub use selection::{LevelSelector, SelectionController};
pub use viewer::{ReadingOutcome, Viewer};
