use clap::Parser;
use dupetriage::actions::{RestoreEngine, RetryPolicy};
use dupetriage::cli::Cli;
use dupetriage::config::{RunConfig, Settings};
use dupetriage::duplicates::{DetectionMode, DuplicateFinder, FinderConfig};
use dupetriage::error::ExitCode;
use dupetriage::orchestrator::Orchestrator;
use dupetriage::review::api::ToggleKeepRequest;
use dupetriage::review::{ReviewApi, ReviewPhase, ReviewStateStore, STATE_FILE};
use dupetriage::scanner::WalkerConfig;
use dupetriage::staging::{GroupId, StagingManager, DEFAULT_DECISION_FOLDER};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

/// `x/a.jpg`, `y/b.jpg`, `y/c.jpg` share content; `x/unique.jpg` does not.
fn photo_tree() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("photos");
    fs::create_dir_all(root.join("x")).unwrap();
    fs::create_dir_all(root.join("y")).unwrap();
    fs::write(root.join("x/a.jpg"), b"identical bytes").unwrap();
    fs::write(root.join("y/b.jpg"), b"identical bytes").unwrap();
    fs::write(root.join("y/c.jpg"), b"identical bytes").unwrap();
    fs::write(root.join("x/unique.jpg"), b"something else entirely").unwrap();
    (dir, root)
}

fn fast_settings() -> Settings {
    Settings {
        poll_interval_ms: 10,
        retry_delay_ms: 1,
        delete_retries: 2,
        ..Settings::default()
    }
}

fn run_config(root: &Path, extra: &[&str]) -> RunConfig {
    let mut args = vec!["dupetriage", root.to_str().unwrap(), "--port", "0", "-q"];
    args.extend_from_slice(extra);
    let cli = Cli::try_parse_from(args).unwrap();
    RunConfig::from_cli(&cli, &fast_settings()).unwrap()
}

fn wait_for_active(store: &ReviewStateStore) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline {
        if store.load().unwrap().active.is_some() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("no group became active");
}

#[test]
fn test_library_pipeline_keep_one() {
    let (_dir, root) = photo_tree();
    let decision = root.join(DEFAULT_DECISION_FOLDER);

    let finder = DuplicateFinder::new(FinderConfig::default().with_walker_config(
        WalkerConfig::new(false, false, Some(decision.clone())),
    ));
    let (groups, summary) = finder.find_duplicates(&root).unwrap();
    assert_eq!(summary.total_files, 4);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 3);

    let report = StagingManager::new(&decision).stage_all(groups).unwrap();
    assert_eq!(report.staged.len(), 1);
    let group = &report.staged[0];
    assert!(!root.join("x/a.jpg").exists());
    assert!(group.dir.join("a.jpg").exists());

    let store = ReviewStateStore::new(&decision);
    let api = ReviewApi::new(&decision, store.clone());
    api.activate(group).unwrap();
    api.toggle_keep(&ToggleKeepRequest {
        name: "a.jpg".into(),
    })
    .unwrap();
    assert!(!api.finished().unwrap().confirmed);
    assert_eq!(api.poll(group).unwrap(), ReviewPhase::Reviewing);
    assert!(api.finished().unwrap().confirmed);
    assert_eq!(api.poll(group).unwrap(), ReviewPhase::Finished);

    let keep = store.group(group.id).unwrap().unwrap().keep;
    let engine = RestoreEngine::new(RetryPolicy::new(2, Duration::from_millis(1)));
    let restored = engine.restore_group(group, &keep);

    assert!(restored.is_complete());
    assert_eq!(fs::read(root.join("x/a.jpg")).unwrap(), b"identical bytes");
    assert!(!root.join("y/b.jpg").exists());
    assert!(!root.join("y/c.jpg").exists());
    assert!(root.join("x/unique.jpg").exists());
    assert!(!group.dir.exists());

    store.remove_group(group.id).unwrap();
    assert!(engine.cleanup_decision_root(&decision, &store).unwrap());
    assert!(!decision.exists());
}

#[test]
fn test_orchestrator_end_to_end() {
    let (_dir, root) = photo_tree();
    let config = run_config(&root, &[]);
    let decision = config.decision_root.clone();
    let flag = Arc::new(AtomicBool::new(false));

    let runner = {
        let flag = Arc::clone(&flag);
        std::thread::spawn(move || Orchestrator::new(config, flag).run())
    };

    let store = ReviewStateStore::new(&decision);
    wait_for_active(&store);

    let api = ReviewApi::new(&decision, store);
    let view = api.group_view().unwrap();
    let active = view.group.unwrap();
    assert_eq!(active.mode, DetectionMode::Exact);
    assert_eq!(active.items.len(), 3);
    assert!(active.keep.is_empty());

    api.toggle_keep(&ToggleKeepRequest {
        name: "a.jpg".into(),
    })
    .unwrap();
    api.finished().unwrap();
    api.finished().unwrap();

    let outcome = runner.join().unwrap().unwrap();
    assert_eq!(outcome.exit_code(), ExitCode::Success);
    assert_eq!(outcome.restored_groups, 1);
    assert!(!flag.load(Ordering::SeqCst));

    assert!(root.join("x/a.jpg").exists());
    assert!(!root.join("y/b.jpg").exists());
    assert!(!root.join("y/c.jpg").exists());
    assert!(root.join("x/unique.jpg").exists());
    assert!(!decision.exists());
}

#[test]
fn test_leftover_state_is_not_applied_to_new_groups() {
    let (_dir, root) = photo_tree();
    let config = run_config(&root, &[]);
    let decision = config.decision_root.clone();
    fs::create_dir_all(&decision).unwrap();
    fs::write(
        decision.join(STATE_FILE),
        br#"{"groups":{"1":{"keep":[],"finished_clicks":2}}}"#,
    )
    .unwrap();

    let runner = std::thread::spawn(move || {
        Orchestrator::new(config, Arc::new(AtomicBool::new(false))).run()
    });

    let store = ReviewStateStore::new(&decision);
    wait_for_active(&store);

    let api = ReviewApi::new(&decision, store.clone());
    let state = store.group(GroupId(1)).unwrap().unwrap();
    assert_eq!(state.finished_clicks, 0);
    assert!(state.group_dir.is_some_and(|dir| dir.starts_with("group_0001_sha_")));
    assert!(api.group_view().unwrap().group.unwrap().keep.is_empty());
    assert!(!root.join("y/b.jpg").exists());

    api.toggle_keep(&ToggleKeepRequest {
        name: "a.jpg".into(),
    })
    .unwrap();
    api.finished().unwrap();
    api.finished().unwrap();

    let outcome = runner.join().unwrap().unwrap();
    assert_eq!(outcome.exit_code(), ExitCode::Success);
    assert!(root.join("x/a.jpg").exists());
    assert!(!root.join("y/b.jpg").exists());
}

#[test]
fn test_orchestrator_no_duplicates() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.jpg"), b"one").unwrap();
    fs::write(dir.path().join("b.jpg"), b"two").unwrap();
    let config = run_config(dir.path(), &[]);
    let decision = config.decision_root.clone();

    let outcome = Orchestrator::new(config, Arc::new(AtomicBool::new(false)))
        .run()
        .unwrap();

    assert_eq!(outcome.exit_code(), ExitCode::NoDuplicates);
    assert!(!decision.exists());
}

#[test]
fn test_orchestrator_dry_run_touches_nothing() {
    let (_dir, root) = photo_tree();
    let config = run_config(&root, &["--dry-run"]);
    let decision = config.decision_root.clone();

    let outcome = Orchestrator::new(config, Arc::new(AtomicBool::new(false)))
        .run()
        .unwrap();

    assert_eq!(outcome.exit_code(), ExitCode::Success);
    assert!(!decision.exists());
    for name in ["x/a.jpg", "y/b.jpg", "y/c.jpg"] {
        assert!(root.join(name).exists());
    }
}

#[test]
fn test_orchestrator_interrupted_scan() {
    let (_dir, root) = photo_tree();
    let config = run_config(&root, &[]);

    let err = Orchestrator::new(config, Arc::new(AtomicBool::new(true)))
        .run()
        .unwrap_err();

    assert_eq!(ExitCode::for_error(&err), ExitCode::Interrupted);
    assert!(root.join("x/a.jpg").exists());
}

#[test]
fn test_include_all_and_extension_policy() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"same").unwrap();
    fs::write(dir.path().join("b.txt"), b"same").unwrap();

    let images_only = DuplicateFinder::with_defaults();
    let (groups, _) = images_only.find_duplicates(dir.path()).unwrap();
    assert!(groups.is_empty());

    let everything = DuplicateFinder::new(
        FinderConfig::default().with_walker_config(WalkerConfig::new(true, false, None)),
    );
    let (groups, _) = everything.find_duplicates(dir.path()).unwrap();
    assert_eq!(groups.len(), 1);
}

#[test]
fn test_perceptual_pipeline_groups_resized_copies() {
    let dir = tempdir().unwrap();
    let img = image::RgbImage::from_fn(96, 96, |x, y| {
        let v = (((x / 24) * 53 + (y / 24) * 97) % 256) as u8;
        image::Rgb([v, v, v])
    });
    img.save(dir.path().join("a.png")).unwrap();
    image::imageops::resize(&img, 48, 48, image::imageops::FilterType::Triangle)
        .save(dir.path().join("b.png"))
        .unwrap();
    fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

    let finder = DuplicateFinder::new(
        FinderConfig::default()
            .with_mode(DetectionMode::Phash)
            .with_threshold(10),
    );
    let (groups, summary) = finder.find_duplicates(dir.path()).unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].mode, DetectionMode::Phash);
    assert_eq!(groups[0].threshold, Some(10));
    assert_eq!(summary.skipped.len(), 1);
}
