//! Variable and level selection driving the frame cache.

use std::sync::Arc;

use frame_common::FrameError;
use frame_scheduler::{FrameScheduler, LevelSelector, SchedulerConfig, SelectionController};
use test_utils::{
    metadata, ramp_color, solid_png, uniform_archive, MemorySourceFactory, RecordingMap, DURATION,
    LEVELS, ZOOM_MAX,
};

fn setup() -> (SelectionController, FrameScheduler<RecordingMap>) {
    let metadata = metadata();
    let archive = |_: usize| uniform_archive(solid_png(ramp_color(0)), ZOOM_MAX);

    let mut factory = MemorySourceFactory::new()
        .with_series(&metadata.series("2m_temperature", None).unwrap(), DURATION, archive)
        .with_series(
            &metadata.series("mean_sea_level_pressure", None).unwrap(),
            DURATION,
            archive,
        );
    for index in 0..LEVELS.len() {
        factory = factory.with_series(
            &metadata.series("temperature", Some(index)).unwrap(),
            DURATION,
            archive,
        );
    }

    let scheduler = FrameScheduler::new(
        RecordingMap::new(),
        Arc::new(factory),
        SchedulerConfig::default(),
    );
    (SelectionController::new(), scheduler)
}

#[test]
fn test_surface_variable_hides_level_selector() {
    let (mut selection, mut scheduler) = setup();
    let metadata = metadata();

    selection
        .on_variable_changed(&mut scheduler, &metadata, "2m_temperature", 3)
        .unwrap();

    assert_eq!(selection.variable(), Some("2m_temperature"));
    assert!(selection.level_selector().is_none());
    assert_eq!(scheduler.series_key().unwrap().level_index, None);
    assert_eq!(scheduler.current_index(), Some(3));
}

#[test]
fn test_level_variable_defaults_to_first_level() {
    let (mut selection, mut scheduler) = setup();
    let metadata = metadata();

    selection
        .on_variable_changed(&mut scheduler, &metadata, "temperature", 0)
        .unwrap();

    assert_eq!(
        selection.level_selector(),
        Some(&LevelSelector {
            options: LEVELS.to_vec(),
            selected: 0,
        })
    );
    assert_eq!(selection.level_selector().unwrap().selected_level(), Some(500));
    assert_eq!(
        scheduler.map().visible_sources(),
        vec![format!("tiles/{}/temperature/lvl0/h0.pmtiles", test_utils::RUN)]
    );
}

#[test]
fn test_level_change_keeps_time_and_swaps_series() {
    let (mut selection, mut scheduler) = setup();
    let metadata = metadata();

    selection
        .on_variable_changed(&mut scheduler, &metadata, "temperature", 7)
        .unwrap();
    let generation = scheduler.generation();

    selection
        .on_level_changed(&mut scheduler, &metadata, 850, 7)
        .unwrap();

    assert_eq!(selection.level_index(), Some(1));
    assert_eq!(scheduler.series_key().unwrap().level_index, Some(1));
    assert_eq!(scheduler.current_index(), Some(7));
    assert!(scheduler.generation() > generation);
    assert_eq!(
        scheduler.map().visible_sources(),
        vec![format!("tiles/{}/temperature/lvl1/h7.pmtiles", test_utils::RUN)]
    );
}

#[test]
fn test_reselecting_level_variable_keeps_level() {
    let (mut selection, mut scheduler) = setup();
    let metadata = metadata();

    selection
        .on_variable_changed(&mut scheduler, &metadata, "temperature", 0)
        .unwrap();
    selection
        .on_level_changed(&mut scheduler, &metadata, 1000, 0)
        .unwrap();
    selection
        .on_variable_changed(&mut scheduler, &metadata, "temperature", 0)
        .unwrap();

    assert_eq!(selection.level_selector().unwrap().selected_level(), Some(1000));
    assert_eq!(scheduler.series_key().unwrap().level_index, Some(2));
}

#[test]
fn test_level_resets_after_surface_variable() {
    let (mut selection, mut scheduler) = setup();
    let metadata = metadata();

    selection
        .on_variable_changed(&mut scheduler, &metadata, "temperature", 0)
        .unwrap();
    selection
        .on_level_changed(&mut scheduler, &metadata, 850, 0)
        .unwrap();
    selection
        .on_variable_changed(&mut scheduler, &metadata, "mean_sea_level_pressure", 0)
        .unwrap();
    assert!(selection.level_selector().is_none());

    selection
        .on_variable_changed(&mut scheduler, &metadata, "temperature", 0)
        .unwrap();
    assert_eq!(selection.level_index(), Some(0));
}

#[test]
fn test_level_change_errors_leave_selection_alone() {
    let (mut selection, mut scheduler) = setup();
    let metadata = metadata();

    let err = selection
        .on_level_changed(&mut scheduler, &metadata, 850, 0)
        .unwrap_err();
    assert!(matches!(err, FrameError::NoActiveSeries));

    selection
        .on_variable_changed(&mut scheduler, &metadata, "2m_temperature", 0)
        .unwrap();
    let err = selection
        .on_level_changed(&mut scheduler, &metadata, 850, 0)
        .unwrap_err();
    assert!(matches!(err, FrameError::Internal(_)));

    selection
        .on_variable_changed(&mut scheduler, &metadata, "temperature", 0)
        .unwrap();
    let before = scheduler.state();
    let err = selection
        .on_level_changed(&mut scheduler, &metadata, 700, 0)
        .unwrap_err();
    assert!(matches!(err, FrameError::UnknownLevel(700)));
    assert_eq!(selection.level_index(), Some(0));
    assert_eq!(scheduler.state(), before);
}

#[test]
fn test_unknown_variable_is_rejected() {
    let (mut selection, mut scheduler) = setup();
    let metadata = metadata();

    selection
        .on_variable_changed(&mut scheduler, &metadata, "2m_temperature", 2)
        .unwrap();
    let err = selection
        .on_variable_changed(&mut scheduler, &metadata, "vorticity", 2)
        .unwrap_err();

    assert!(matches!(err, FrameError::UnknownVariable(_)));
    assert_eq!(selection.variable(), Some("2m_temperature"));
    assert_eq!(scheduler.current_index(), Some(2));
}
