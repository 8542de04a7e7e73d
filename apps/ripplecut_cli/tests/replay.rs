use ripplecut_cli::{replay, replay_file, Report, Script};
use ripplecut_core::settings::EditorSettings;
use ripplecut_mixer::PixelFormat;
use std::path::PathBuf;

fn run(json: &str) -> Report {
    let script = Script::from_json(json).unwrap();
    replay(&script, EditorSettings::default()).unwrap()
}

fn starts(report: &Report) -> Vec<f64> {
    report.clips.iter().map(|c| c.start).collect()
}

fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn default_move_leaves_neighbor() {
    let report = run(r#"{
        "tracks": ["video"],
        "sources": [
            {"name": "a.mp4", "duration": 10, "start": 20},
            {"name": "b.mp4", "duration": 10, "start": 30}
        ],
        "steps": [{"op": "move", "clip": 0, "via": [12, 6], "to": 1}]
    }"#);
    assert_eq!(starts(&report), vec![1.0, 30.0]);
    assert_eq!(report.clips[0].end, 11.0);
    assert!(report.can_undo);
}

#[test]
fn ripple_move_shifts_everything_after() {
    let report = run(r#"{
        "tracks": ["video"],
        "sources": [
            {"name": "a.mp4", "duration": 10, "start": 0},
            {"name": "b.mp4", "duration": 10, "start": 10},
            {"name": "c.mp4", "duration": 10, "start": 30}
        ],
        "steps": [{"op": "move", "clip": 0, "to": 5, "mode": "ripple"}]
    }"#);
    assert_eq!(starts(&report), vec![5.0, 15.0, 35.0]);
    assert_eq!(report.duration, 45.0);
}

#[test]
fn roll_trim_keeps_pair_length() {
    let report = run(r#"{
        "tracks": ["video"],
        "sources": [
            {"name": "a.mp4", "duration": 30, "start": 0, "length": 10},
            {"name": "b.mp4", "duration": 30, "start": 10, "length": 10}
        ],
        "steps": [
            {"op": "trim_start", "clip": 1, "to": 14},
            {"op": "trim_end", "clip": 0, "to": 12, "mode": "roll"}
        ]
    }"#);
    // the first trim opened a 4s gap; the roll only moves touching edges
    assert_eq!(report.clips[0].end, 12.0);
    assert_eq!(report.clips[1].start, 14.0);

    let report = run(r#"{
        "tracks": ["video"],
        "sources": [
            {"name": "a.mp4", "duration": 30, "start": 0, "length": 10},
            {"name": "b.mp4", "duration": 30, "start": 10, "length": 10}
        ],
        "steps": [
            {"op": "trim_start", "clip": 1, "to": 14},
            {"op": "trim_start", "clip": 1, "to": 10},
            {"op": "trim_end", "clip": 0, "to": 13, "mode": "roll"}
        ]
    }"#);
    assert_eq!(report.clips[0].end, 13.0);
    assert_eq!(report.clips[1].start, 13.0);
    assert_eq!(report.clips[1].end, 20.0);
    assert_eq!(report.clips[1].in_point, 3.0);
}

#[test]
fn split_then_undo_and_redo() {
    let report = run(r#"{
        "tracks": ["video"],
        "sources": [{"name": "a.mp4", "duration": 10, "start": 0}],
        "steps": [
            {"op": "split", "at": 4},
            {"op": "move", "clip": 1, "to": 6},
            {"op": "undo"}
        ]
    }"#);
    assert_eq!(starts(&report), vec![0.0, 4.0]);
    assert_eq!(report.clips[1].in_point, 4.0);
    assert!(report.can_redo);

    let report = run(r#"{
        "tracks": ["video"],
        "sources": [{"name": "a.mp4", "duration": 10, "start": 0}],
        "steps": [{"op": "split", "at": 4}, {"op": "undo"}]
    }"#);
    assert_eq!(report.clips.len(), 1);
    assert_eq!(report.clips[0].end, 10.0);
}

#[test]
fn overlap_switches_mixer_to_alpha() {
    let report = run(r#"{
        "tracks": ["video"],
        "sources": [
            {"name": "a.mp4", "duration": 10, "start": 0},
            {"name": "b.mp4", "duration": 10, "start": 5}
        ]
    }"#);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.lanes[0].format, Some(PixelFormat::Ayuv));
    assert_eq!(report.lanes[0].pads, 2);

    let report = run(r#"{
        "tracks": ["video"],
        "sources": [
            {"name": "a.mp4", "duration": 10, "start": 0},
            {"name": "b.mp4", "duration": 10, "start": 5}
        ],
        "steps": [{"op": "move", "clip": 1, "to": 20}]
    }"#);
    assert!(report.transitions.is_empty());
    assert_eq!(report.lanes[0].format, Some(PixelFormat::I420));
    assert_eq!(report.lanes[0].generation, 2);
}

#[test]
fn keyframe_step_needs_alpha() {
    let report = run(r#"{
        "sources": [{"name": "a.mp4", "duration": 10, "streams": ["video", "audio"]}],
        "steps": [{"op": "keyframe", "clip": 0, "time": 2, "value": 0.25}]
    }"#);
    let video = report
        .lanes
        .iter()
        .find(|lane| lane.format.is_some())
        .unwrap();
    assert_eq!(video.format, Some(PixelFormat::Ayuv));
    let audio = report.lanes.iter().find(|lane| lane.format.is_none()).unwrap();
    assert_eq!(audio.pads, 1);
}

#[test]
fn bad_clip_index_names_the_step() {
    let script = Script::from_json(
        r#"{"sources": [], "steps": [{"op": "move", "clip": 3, "to": 1}]}"#,
    )
    .unwrap();
    let err = replay(&script, EditorSettings::default()).unwrap_err();
    assert!(err.to_string().contains("step 0 failed"));
    assert!(format!("{err:#}").contains("no clip with index 3"));
}

#[test]
fn files_and_snapping() {
    let dir = tempfile::tempdir().unwrap();
    let script = write(
        &dir,
        "edit.json",
        r#"{
            "tracks": ["video"],
            "sources": [
                {"name": "a.mp4", "duration": 10, "start": 0},
                {"name": "b.mp4", "duration": 10, "start": 20}
            ],
            "steps": [{"op": "move", "clip": 1, "to": 10.3}]
        }"#,
    );
    let settings = write(&dir, "settings.json", r#"{"snap_distance": 500000000}"#);

    let snapped = replay_file(&script, Some(&settings)).unwrap();
    assert_eq!(snapped.clips[1].start, 10.0);

    let loose = replay_file(&script, None).unwrap();
    assert!(loose.clips[1].start > 10.2);
}

#[test]
fn missing_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = replay_file(&dir.path().join("nope.json"), None).unwrap_err();
    assert!(err.to_string().contains("failed to read script"));
}
