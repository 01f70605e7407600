use dupetriage::duplicates::{CandidateGroup, DetectionMode};
use dupetriage::review::api::{PreferFolderRequest, ToggleKeepRequest};
use dupetriage::review::{
    ApiError, ReviewApi, ReviewPhase, ReviewState, ReviewStateStore, STATE_FILE,
};
use dupetriage::scanner::FileRecord;
use dupetriage::staging::{GroupId, StagedGroup, StagingManager};
use std::fs;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    decision: PathBuf,
    groups: Vec<StagedGroup>,
}

/// Two exact groups, each with one member in `x/` and two in `y/`.
fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let root = dir.path().join("photos");
    let decision = dir.path().join("review");
    let candidates = (1..=2)
        .map(|n| {
            let files = [("x", "a"), ("y", "b"), ("y", "c")]
                .iter()
                .map(|(folder, stem)| {
                    let path = root.join(folder).join(format!("{stem}{n}.jpg"));
                    fs::create_dir_all(path.parent().unwrap()).unwrap();
                    fs::write(&path, format!("group {n}")).unwrap();
                    FileRecord::new(path, 7)
                })
                .collect();
            CandidateGroup {
                mode: DetectionMode::Exact,
                threshold: None,
                digest: format!("{n}").repeat(64),
                files,
            }
        })
        .collect();
    let groups = StagingManager::new(&decision)
        .stage_all(candidates)
        .unwrap()
        .staged;
    Fixture {
        _dir: dir,
        decision,
        groups,
    }
}

fn api(fx: &Fixture) -> ReviewApi {
    ReviewApi::new(&fx.decision, ReviewStateStore::new(&fx.decision))
}

fn keep(name: &str) -> ToggleKeepRequest {
    ToggleKeepRequest { name: name.into() }
}

#[test]
fn test_phases_follow_the_review() {
    let fx = fixture();
    let api = api(&fx);
    let group = &fx.groups[0];

    assert_eq!(api.store().phase(group.id).unwrap(), ReviewPhase::Staged);
    api.activate(group).unwrap();
    assert_eq!(api.store().phase(group.id).unwrap(), ReviewPhase::Reviewing);
    api.finished().unwrap();
    assert_eq!(api.store().phase(group.id).unwrap(), ReviewPhase::Reviewing);
    api.finished().unwrap();
    assert_eq!(api.store().phase(group.id).unwrap(), ReviewPhase::Finished);

    // Further signals change nothing.
    let again = api.finished().unwrap();
    assert!(again.confirmed);
    assert_eq!(again.finished_clicks, 2);
}

#[test]
fn test_single_signal_then_reset_keeps_selection() {
    let fx = fixture();
    let api = api(&fx);
    let group = &fx.groups[0];
    api.activate(group).unwrap();
    api.toggle_keep(&keep("a1.jpg")).unwrap();

    api.finished().unwrap();
    api.reset_finished().unwrap();
    api.finished().unwrap();

    let state = api.store().group(group.id).unwrap().unwrap();
    assert!(!state.is_finished());
    assert_eq!(state.finished_clicks, 1);
    assert!(state.keep.contains("a1.jpg"));
}

#[test]
fn test_keep_change_withdraws_pending_confirmation() {
    let fx = fixture();
    let api = api(&fx);
    api.activate(&fx.groups[0]).unwrap();

    api.finished().unwrap();
    api.toggle_keep(&keep("b1.jpg")).unwrap();
    let response = api.finished().unwrap();
    assert!(!response.confirmed);
    assert_eq!(response.finished_clicks, 1);
}

#[test]
fn test_finished_group_rejects_changes() {
    let fx = fixture();
    let api = api(&fx);
    api.activate(&fx.groups[0]).unwrap();
    api.finished().unwrap();
    api.finished().unwrap();

    assert_eq!(api.toggle_keep(&keep("a1.jpg")), Err(ApiError::GroupFinished));
    assert_eq!(api.reset_finished().map(|_| ()), Err(ApiError::GroupFinished));
}

#[test]
fn test_empty_keep_can_finish() {
    let fx = fixture();
    let api = api(&fx);
    api.activate(&fx.groups[0]).unwrap();
    api.finished().unwrap();
    api.finished().unwrap();

    let state = api.store().group(fx.groups[0].id).unwrap().unwrap();
    assert!(state.is_finished());
    assert!(state.keep.is_empty());
}

#[test]
fn test_preferred_folder_seeds_next_group() {
    let fx = fixture();
    let api = api(&fx);
    let first = &fx.groups[0];
    api.activate(first).unwrap();

    let y = first.entries[1].original.parent().unwrap().to_path_buf();
    let response = api
        .prefer_folder(&PreferFolderRequest {
            folder_path: y.to_string_lossy().into_owned(),
        })
        .unwrap();
    assert_eq!(response.keep, vec!["b1.jpg", "c1.jpg"]);

    api.finished().unwrap();
    api.finished().unwrap();

    let seeded = api.activate(&fx.groups[1]).unwrap();
    assert_eq!(
        seeded.keep.into_iter().collect::<Vec<_>>(),
        vec!["b2.jpg", "c2.jpg"]
    );
}

#[test]
fn test_earlier_preference_seeds_group_without_the_latest() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("photos");
    let decision = dir.path().join("review");
    let group = |n: u32, folders: [&str; 2]| {
        let files = folders
            .iter()
            .map(|folder| {
                let path = root.join(folder).join(format!("p{n}.jpg"));
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, format!("group {n}")).unwrap();
                FileRecord::new(path, 7)
            })
            .collect();
        CandidateGroup {
            mode: DetectionMode::Exact,
            threshold: None,
            digest: format!("{n}").repeat(64),
            files,
        }
    };
    let groups = StagingManager::new(&decision)
        .stage_all(vec![group(1, ["x", "y"]), group(2, ["x", "z"])])
        .unwrap()
        .staged;
    let api = ReviewApi::new(&decision, ReviewStateStore::new(&decision));
    let prefer = |folder: &str| {
        api.prefer_folder(&PreferFolderRequest {
            folder_path: root.join(folder).to_string_lossy().into_owned(),
        })
        .unwrap()
    };

    api.activate(&groups[0]).unwrap();
    assert_eq!(prefer("x").keep, vec!["p1.jpg"]);
    assert_eq!(prefer("y").keep, vec!["p1__1.jpg"]);

    // Preferring the same folder again clears it for this group only.
    let cleared = prefer("y");
    assert_eq!(cleared.preferred_folder, None);
    assert_eq!(cleared.keep, vec!["p1__1.jpg"]);
    let doc = api.store().load().unwrap();
    assert_eq!(doc.preferred_folders, vec![root.join("y"), root.join("x")]);

    api.finished().unwrap();
    api.finished().unwrap();

    let seeded = api.activate(&groups[1]).unwrap();
    assert_eq!(seeded.keep.into_iter().collect::<Vec<_>>(), vec!["p2.jpg"]);
    assert_eq!(seeded.preferred_folder, Some(root.join("x")));
}

#[test]
fn test_auto_finish_fires_once_per_arming() {
    let fx = fixture();
    let api = api(&fx);
    let group = &fx.groups[0];
    api.activate(group).unwrap();
    assert!(api.toggle_auto_finish().unwrap().auto_finish);

    api.toggle_keep(&keep("a1.jpg")).unwrap();
    assert_eq!(api.poll(group).unwrap(), ReviewPhase::Finished);
    let state = api.store().group(group.id).unwrap().unwrap();
    assert!(!state.auto_finish_armed);
}

#[test]
fn test_auto_finish_default_applies_to_later_exact_groups() {
    let fx = fixture();
    let api = api(&fx);
    api.activate(&fx.groups[0]).unwrap();
    api.toggle_auto_finish().unwrap();
    api.finished().unwrap();
    api.finished().unwrap();

    let second = api.activate(&fx.groups[1]).unwrap();
    assert!(second.auto_finish);
    assert!(second.auto_finish_armed);
}

#[test]
fn test_auto_finish_never_fires_for_perceptual_state() {
    let mut state = ReviewState::new(vec!["a.jpg".to_string()], true);
    for mode in [DetectionMode::Ahash, DetectionMode::Phash] {
        assert!(!state.evaluate_auto_finish(mode));
        assert!(!state.is_finished());
    }
    assert!(state.evaluate_auto_finish(DetectionMode::Exact));
    assert!(state.is_finished());
}

#[test]
fn test_corrupt_state_file_is_moved_aside() {
    let fx = fixture();
    let store = ReviewStateStore::new(&fx.decision);
    fs::write(fx.decision.join(STATE_FILE), b"{ not json").unwrap();

    let doc = store.load().unwrap();
    assert!(doc.groups.is_empty());
    assert!(!fx.decision.join(STATE_FILE).exists());

    let aside: Vec<_> = fs::read_dir(&fx.decision)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&format!("{STATE_FILE}.corrupt-")))
        .collect();
    assert_eq!(aside.len(), 1);
}

#[test]
fn test_malformed_entry_only_fails_its_group() {
    let fx = fixture();
    let api = api(&fx);
    api.activate(&fx.groups[0]).unwrap();
    api.activate(&fx.groups[1]).unwrap();

    let path = fx.decision.join(STATE_FILE);
    let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    doc["groups"]["1"] = serde_json::json!("garbage");
    fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    assert!(api.store().group(GroupId(1)).is_err());
    assert_eq!(api.store().phase(GroupId(2)).unwrap(), ReviewPhase::Reviewing);
    api.toggle_keep(&keep("a2.jpg")).unwrap();
}

#[test]
fn test_concurrent_writers_lose_no_update() {
    let fx = fixture();
    let api = api(&fx);
    api.activate(&fx.groups[0]).unwrap();
    let names = ["a1.jpg", "b1.jpg", "c1.jpg"];

    std::thread::scope(|scope| {
        for name in names {
            let api = api.clone();
            scope.spawn(move || {
                for _ in 0..3 {
                    api.toggle_keep(&keep(name)).unwrap();
                }
            });
        }
    });

    // Each name was toggled an odd number of times.
    let state = api.store().group(fx.groups[0].id).unwrap().unwrap();
    assert_eq!(state.keep.len(), 3);
}
