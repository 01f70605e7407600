use clap::Parser;
use dupetriage::cli::Cli;
use dupetriage::config::{RunConfig, Settings};
use dupetriage::duplicates::{CandidateGroup, DetectionMode};
use dupetriage::error::ExitCode;
use dupetriage::orchestrator::Orchestrator;
use dupetriage::review::api::ToggleKeepRequest;
use dupetriage::review::{ReviewApi, ReviewStateStore, STATE_FILE};
use dupetriage::scanner::FileRecord;
use dupetriage::staging::{
    read_manifest, ResumeError, RunResumer, StagedGroup, StagingManager, MANIFEST_FILE, META_FILE,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct Area {
    _dir: TempDir,
    root: PathBuf,
    decision: PathBuf,
}

fn area() -> Area {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("photos");
    let decision = root.join("_DECISION_DUPES");
    fs::create_dir_all(&root).unwrap();
    Area {
        _dir: dir,
        root,
        decision,
    }
}

fn candidate(root: &Path, names: &[&str], mode: DetectionMode, digest: &str) -> CandidateGroup {
    let files = names
        .iter()
        .map(|name| {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("content {digest}")).unwrap();
            FileRecord::new(path, 12)
        })
        .collect();
    CandidateGroup {
        mode,
        threshold: mode.is_perceptual().then_some(5),
        digest: digest.repeat(16),
        files,
    }
}

fn stage(area: &Area, groups: Vec<CandidateGroup>) -> Vec<StagedGroup> {
    StagingManager::new(&area.decision)
        .stage_all(groups)
        .unwrap()
        .staged
}

fn finish(area: &Area, group: &StagedGroup, keep: &str) {
    let api = ReviewApi::new(&area.decision, ReviewStateStore::new(&area.decision));
    api.activate(group).unwrap();
    api.toggle_keep(&ToggleKeepRequest { name: keep.into() })
        .unwrap();
    api.finished().unwrap();
    api.finished().unwrap();
}

fn config(root: &Path, extra: &[&str]) -> RunConfig {
    let mut args = vec!["dupetriage", root.to_str().unwrap(), "--port", "0"];
    args.extend_from_slice(extra);
    let settings = Settings {
        poll_interval_ms: 10,
        retry_delay_ms: 1,
        ..Settings::default()
    };
    RunConfig::from_cli(&Cli::try_parse_from(args).unwrap(), &settings).unwrap()
}

#[test]
fn test_resume_reports_pending_groups_without_scanning() {
    let area = area();
    let staged = stage(
        &area,
        vec![
            candidate(&area.root, &["a/1.jpg", "b/1.jpg"], DetectionMode::Exact, "aaaa"),
            candidate(&area.root, &["a/2.jpg", "b/2.jpg"], DetectionMode::Exact, "bbbb"),
            candidate(&area.root, &["a/3.jpg", "b/3.jpg"], DetectionMode::Exact, "cccc"),
        ],
    );
    finish(&area, &staged[0], "1.jpg");

    // New duplicates that a scan would find; a resume must not pick them up.
    fs::write(area.root.join("new1.jpg"), b"fresh").unwrap();
    fs::write(area.root.join("new2.jpg"), b"fresh").unwrap();

    let store = ReviewStateStore::new(&area.decision);
    let report = RunResumer::new(&area.decision, None).resume(&store).unwrap();

    assert_eq!(report.mode, Some(DetectionMode::Exact));
    assert_eq!(report.groups.len(), 3);
    assert_eq!(report.pending, 2);
    assert!(area.root.join("new1.jpg").exists());
}

#[test]
fn test_resume_completes_interrupted_move() {
    let area = area();
    let staged = stage(
        &area,
        vec![candidate(
            &area.root,
            &["x/a.jpg", "y/a.jpg"],
            DetectionMode::Exact,
            "dddd",
        )],
    );
    let group = &staged[0];
    let entries = read_manifest(&group.dir).unwrap();
    assert_eq!(entries.len(), 2);

    // Put one member back as if the move had not happened yet.
    let pending = &entries[1];
    fs::rename(group.dir.join(&pending.staged_name), &pending.original).unwrap();

    let store = ReviewStateStore::new(&area.decision);
    let report = RunResumer::new(&area.decision, None).resume(&store).unwrap();

    assert_eq!(report.completed_moves, 1);
    assert!(group.dir.join(&pending.staged_name).exists());
    assert!(!pending.original.exists());
}

#[test]
fn test_resume_rebuilds_missing_meta() {
    let area = area();
    let staged = stage(
        &area,
        vec![candidate(
            &area.root,
            &["x/a.jpg", "y/a.jpg"],
            DetectionMode::Phash,
            "eeee",
        )],
    );
    let group = &staged[0];
    fs::remove_file(group.dir.join(META_FILE)).unwrap();

    let store = ReviewStateStore::new(&area.decision);
    let report = RunResumer::new(&area.decision, None).resume(&store).unwrap();

    assert_eq!(report.mode, Some(DetectionMode::Phash));
    assert_eq!(report.groups[0].meta.threshold, Some(5));
    assert!(group.dir.join(META_FILE).exists());
}

#[test]
fn test_resume_skips_folder_without_manifest() {
    let area = area();
    let staged = stage(
        &area,
        vec![
            candidate(&area.root, &["a/1.jpg", "b/1.jpg"], DetectionMode::Exact, "aaaa"),
            candidate(&area.root, &["a/2.jpg", "b/2.jpg"], DetectionMode::Exact, "bbbb"),
        ],
    );
    fs::remove_file(staged[1].dir.join(MANIFEST_FILE)).unwrap();

    let store = ReviewStateStore::new(&area.decision);
    let report = RunResumer::new(&area.decision, None).resume(&store).unwrap();

    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.skipped_dirs, vec![staged[1].dir_name.clone()]);
}

#[test]
fn test_mode_mismatch_is_config_error_before_mutation() {
    let area = area();
    let staged = stage(
        &area,
        vec![candidate(
            &area.root,
            &["x/a.jpg", "y/a.jpg"],
            DetectionMode::Exact,
            "ffff",
        )],
    );
    let group = &staged[0];
    let entries = read_manifest(&group.dir).unwrap();
    fs::rename(group.dir.join(&entries[0].staged_name), &entries[0].original).unwrap();

    let err = Orchestrator::new(
        config(&area.root, &["--mode", "phash"]),
        Arc::new(AtomicBool::new(false)),
    )
    .run()
    .unwrap_err();

    assert_eq!(ExitCode::for_error(&err), ExitCode::InvalidConfig);
    assert!(matches!(
        err.downcast_ref::<ResumeError>(),
        Some(ResumeError::ModeMismatch { .. })
    ));
    // The interrupted move was left alone.
    assert!(entries[0].original.exists());
    assert!(!group.dir.join(&entries[0].staged_name).exists());
}

#[test]
fn test_mixed_mode_area_is_rejected() {
    let area = area();
    stage(
        &area,
        vec![candidate(&area.root, &["a/1.jpg", "b/1.jpg"], DetectionMode::Exact, "aaaa")],
    );
    // A second run staged with another mode into the same area.
    let other = StagingManager::new(&area.decision)
        .stage_group(
            dupetriage::staging::GroupId(2),
            candidate(&area.root, &["a/2.png", "b/2.png"], DetectionMode::Ahash, "bbbb"),
        )
        .unwrap();
    assert!(other.dir.exists());

    let store = ReviewStateStore::new(&area.decision);
    let err = RunResumer::new(&area.decision, None)
        .resume(&store)
        .unwrap_err();
    assert!(err.is_config_error());
    assert!(matches!(err, ResumeError::MixedModes { .. }));
}

#[test]
fn test_orchestrator_restores_already_finished_groups() {
    let area = area();
    let staged = stage(
        &area,
        vec![
            candidate(&area.root, &["a/1.jpg", "b/1.jpg"], DetectionMode::Exact, "aaaa"),
            candidate(&area.root, &["a/2.jpg", "b/2.jpg"], DetectionMode::Exact, "bbbb"),
        ],
    );
    for group in &staged {
        let keep = group.entries[0].staged_name.clone();
        finish(&area, group, &keep);
    }

    let outcome = Orchestrator::new(config(&area.root, &[]), Arc::new(AtomicBool::new(false)))
        .run()
        .unwrap();

    assert_eq!(outcome.exit_code(), ExitCode::Success);
    assert_eq!(outcome.restored_groups, 2);
    assert!(area.root.join("a/1.jpg").exists());
    assert!(area.root.join("a/2.jpg").exists());
    assert!(!area.root.join("b/1.jpg").exists());
    assert!(!area.root.join("b/2.jpg").exists());
    assert!(!area.decision.exists());
}

#[test]
fn test_malformed_group_state_skips_only_that_group() {
    let area = area();
    let staged = stage(
        &area,
        vec![
            candidate(&area.root, &["a/1.jpg", "b/1.jpg"], DetectionMode::Exact, "aaaa"),
            candidate(&area.root, &["a/2.jpg", "b/2.jpg"], DetectionMode::Exact, "bbbb"),
        ],
    );
    finish(&area, &staged[0], "1.jpg");
    finish(&area, &staged[1], "2.jpg");

    let state_path = area.decision.join(STATE_FILE);
    let mut doc: serde_json::Value =
        serde_json::from_slice(&fs::read(&state_path).unwrap()).unwrap();
    doc["groups"]["1"] = serde_json::json!({ "keep": 42 });
    fs::write(&state_path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let outcome = Orchestrator::new(config(&area.root, &[]), Arc::new(AtomicBool::new(false)))
        .run()
        .unwrap();

    assert_eq!(outcome.exit_code(), ExitCode::PartialSuccess);
    assert_eq!(outcome.restored_groups, 1);
    assert!(staged[0].dir.exists());
    assert!(!staged[1].dir.exists());
    assert!(area.root.join("a/2.jpg").exists());
    assert!(area.decision.exists());
}
