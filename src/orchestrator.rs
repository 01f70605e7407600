//! The run loop.
//!
//! 1. Resume the groups already in the decision area, or scan, group and
//!    stage new ones.
//! 2. Start the review server.
//! 3. For each group in folder order: activate it, poll the store until it
//!    is finished, restore it and drop its state.
//! 4. Remove the decision area once no group is left in it.
//!
//! The loop and the server share nothing in memory; the store is the only
//! channel between them. Ctrl+C stops the loop between polls and leaves the
//! area as it is, ready to resume.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::actions::RestoreEngine;
use crate::config::RunConfig;
use crate::duplicates::{DetectionMode, DuplicateFinder, FinderConfig};
use crate::error::ExitCode;
use crate::progress::ProgressCallback;
use crate::review::{start_server, ReviewApi, ReviewPhase, ReviewStateStore};
use crate::scanner::WalkerConfig;
use crate::staging::{RunResumer, StagedGroup, StagingManager};

/// How a run ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Groups available for review (staged now or resumed)
    pub groups: usize,
    /// Groups fully restored and cleaned up
    pub restored_groups: usize,
    /// Groups that could not be staged
    pub failed_groups: usize,
    /// Groups skipped or left with files behind
    pub incomplete_groups: usize,
    /// No duplicates to review
    pub nothing_to_do: bool,
    /// Stopped by Ctrl+C
    pub interrupted: bool,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.interrupted {
            ExitCode::Interrupted
        } else if self.failed_groups > 0 || self.incomplete_groups > 0 {
            ExitCode::PartialSuccess
        } else if self.nothing_to_do {
            ExitCode::NoDuplicates
        } else {
            ExitCode::Success
        }
    }
}

enum GroupResult {
    Restored,
    Incomplete,
    Interrupted,
}

/// Drives one run from scan (or resume) to cleanup.
pub struct Orchestrator {
    config: RunConfig,
    shutdown: Arc<AtomicBool>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Orchestrator {
    /// Create an orchestrator for a validated configuration.
    #[must_use]
    pub fn new(config: RunConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            config,
            shutdown,
            progress: None,
        }
    }

    /// Report scan and staging progress.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run to completion.
    ///
    /// # Errors
    ///
    /// Fails on configuration errors found while resuming (before anything
    /// is moved), an interrupted scan, or when the decision area or the
    /// review server cannot be set up.
    pub fn run(&self) -> Result<RunOutcome> {
        let decision_root = &self.config.decision_root;
        let store = ReviewStateStore::new(decision_root);
        let resumer = RunResumer::new(decision_root.clone(), self.config.mode);
        let mut outcome = RunOutcome::default();

        let groups = if resumer.has_groups()? {
            if self.config.dry_run {
                log::info!(
                    "Dry run: {} already holds groups; nothing to plan",
                    decision_root.display()
                );
                return Ok(outcome);
            }
            let report = resumer.resume(&store)?;
            log::info!(
                "Resuming {} group(s), {} pending review ({} move(s) completed, {} dropped)",
                report.groups.len(),
                report.pending,
                report.completed_moves,
                report.dropped_entries
            );
            outcome.incomplete_groups += report.skipped_dirs.len();
            report.groups
        } else {
            if !self.config.dry_run && store.path().exists() {
                log::warn!(
                    "Discarding review state left without groups: {}",
                    store.path().display()
                );
                store.remove()?;
            }
            let mode = self.config.mode.unwrap_or_default();
            let staged = self.scan_and_stage(mode, &mut outcome)?;
            if self.config.dry_run {
                return Ok(outcome);
            }
            staged
        };

        outcome.groups = groups.len();
        if groups.is_empty() {
            outcome.nothing_to_do = outcome.failed_groups == 0;
            self.cleanup(&store);
            return Ok(outcome);
        }
        if self.is_shutdown_requested() {
            outcome.interrupted = true;
            return Ok(outcome);
        }

        self.review_all(&groups, &store, &mut outcome)?;

        if !outcome.interrupted {
            self.cleanup(&store);
        }
        Ok(outcome)
    }

    fn scan_and_stage(
        &self,
        mode: DetectionMode,
        outcome: &mut RunOutcome,
    ) -> Result<Vec<StagedGroup>> {
        let walker_config = WalkerConfig::new(
            self.config.include_all,
            self.config.skip_hidden,
            Some(self.config.decision_root.clone()),
        );
        let mut finder_config = FinderConfig::default()
            .with_mode(mode)
            .with_threshold(self.config.threshold)
            .with_io_threads(self.config.io_threads)
            .with_walker_config(walker_config)
            .with_shutdown_flag(Arc::clone(&self.shutdown));
        if let Some(progress) = &self.progress {
            finder_config = finder_config.with_progress_callback(Arc::clone(progress));
        }

        let (candidates, summary) =
            DuplicateFinder::new(finder_config).find_duplicates(&self.config.root)?;
        log::info!(
            "Scanned {} file(s) ({}) in {:.1?}: {} group(s), {} reclaimable",
            summary.total_files,
            summary.total_size_display(),
            summary.scan_duration,
            summary.duplicate_groups,
            summary.reclaimable_display()
        );
        let unreadable = summary.skipped.len() + summary.scan_errors.len();
        if unreadable > 0 {
            log::warn!("{} file(s) could not be read or decoded", unreadable);
        }

        if candidates.is_empty() {
            log::info!("No duplicates found");
            outcome.nothing_to_do = true;
            return Ok(Vec::new());
        }

        let mut manager = StagingManager::new(self.config.decision_root.clone())
            .with_dry_run(self.config.dry_run);
        if let Some(progress) = &self.progress {
            manager = manager.with_progress_callback(Arc::clone(progress));
        }
        let report = manager
            .stage_all(candidates)
            .context("Failed to prepare the decision folder")?;

        outcome.failed_groups = report.failed.len();
        log::info!(
            "{} {} file(s) into {} group(s) under {}",
            if self.config.dry_run { "Would stage" } else { "Staged" },
            report.staged_files(),
            report.staged.len(),
            self.config.decision_root.display()
        );
        Ok(report.staged)
    }

    fn review_all(
        &self,
        groups: &[StagedGroup],
        store: &ReviewStateStore,
        outcome: &mut RunOutcome,
    ) -> Result<()> {
        let api = Arc::new(ReviewApi::new(
            self.config.decision_root.clone(),
            store.clone(),
        ));
        let server = start_server(Arc::clone(&api), &self.config.host, self.config.port)?;
        log::info!("Review API listening at {}", server.url());

        let engine = RestoreEngine::new(self.config.retry).with_trash(self.config.use_trash);

        for group in groups {
            match self.review_group(group, &api, &engine) {
                GroupResult::Restored => outcome.restored_groups += 1,
                GroupResult::Incomplete => outcome.incomplete_groups += 1,
                GroupResult::Interrupted => {
                    outcome.interrupted = true;
                    break;
                }
            }
        }

        server.shutdown();
        log::info!(
            "Restored {} of {} group(s)",
            outcome.restored_groups,
            groups.len()
        );
        Ok(())
    }

    /// Wait for `group` to be finished, then apply the decision.
    fn review_group(
        &self,
        group: &StagedGroup,
        api: &ReviewApi,
        engine: &RestoreEngine,
    ) -> GroupResult {
        let store = api.store();

        match store.phase_for(group.id, &group.dir_name) {
            Ok(ReviewPhase::Finished) => {
                log::info!("Group {} was already decided", group.id);
            }
            Ok(_) => {
                if let Err(e) = api.activate(group) {
                    log::error!("Skipping group {}: {}", group.id, e);
                    return GroupResult::Incomplete;
                }
                log::info!(
                    "Reviewing group {} ({} files, {})",
                    group.id,
                    group.entries.len(),
                    group.mode()
                );
                let started = Instant::now();
                loop {
                    if self.is_shutdown_requested() {
                        return GroupResult::Interrupted;
                    }
                    match api.poll(group) {
                        Ok(ReviewPhase::Finished) => break,
                        Ok(_) => {}
                        Err(e) => {
                            log::error!("Skipping group {}: {}", group.id, e);
                            return GroupResult::Incomplete;
                        }
                    }
                    std::thread::sleep(self.config.poll_interval);
                }
                log::debug!("Group {} decided after {:.1?}", group.id, started.elapsed());
            }
            Err(e) => {
                log::error!("Skipping group {}: {}", group.id, e);
                return GroupResult::Incomplete;
            }
        }

        let keep: BTreeSet<String> = match store.group_for(group.id, &group.dir_name) {
            Ok(Some(state)) => state.keep,
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                log::error!("Skipping group {}: {}", group.id, e);
                return GroupResult::Incomplete;
            }
        };

        let report = engine.restore_group(group, &keep);
        if !report.is_complete() {
            for path in &report.stuck {
                log::warn!("Left behind: {}", path.display());
            }
            return GroupResult::Incomplete;
        }
        if let Err(e) = store.remove_group(group.id) {
            log::warn!("Could not clear state of group {}: {}", group.id, e);
        }
        GroupResult::Restored
    }

    fn cleanup(&self, store: &ReviewStateStore) {
        let engine = RestoreEngine::new(self.config.retry);
        if let Err(e) = engine.cleanup_decision_root(&self.config.decision_root, store) {
            log::warn!(
                "Could not clean up {}: {}",
                self.config.decision_root.display(),
                e
            );
        }
    }
}
