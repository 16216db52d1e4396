//! Pipeline orchestrator for executing installation tasks in phases.
//!
//! A boot loader installation runs two ordered phases:
//!
//! 1. **bootloader**: rescue images, configuration, installation, BLS entries
//! 2. **initramfs**: initrd regeneration and the late boot loader fix-ups
//!
//! Tasks run strictly one after another; the first failure stops the
//! pipeline and later tasks are not attempted.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::runner::ProcessRunner;
use crate::tasks::InstallationTask;

pub const PHASE_BOOTLOADER: &str = "bootloader";
pub const PHASE_INITRAMFS: &str = "initramfs";

/// Pipeline orchestrator for executing tasks in phases.
pub struct Pipeline<'a> {
    phases: Vec<(&'static str, &'a [InstallationTask])>,
}

impl<'a> Pipeline<'a> {
    /// Creates a pipeline with the two installation phases.
    pub fn new(bootloader: &'a [InstallationTask], initramfs: &'a [InstallationTask]) -> Self {
        Self {
            phases: vec![(PHASE_BOOTLOADER, bootloader), (PHASE_INITRAMFS, initramfs)],
        }
    }

    /// Creates a pipeline running a single phase.
    pub fn single(phase_name: &'static str, tasks: &'a [InstallationTask]) -> Self {
        Self {
            phases: vec![(phase_name, tasks)],
        }
    }

    /// Returns true if the pipeline has no tasks to execute.
    pub fn is_empty(&self) -> bool {
        self.phases.iter().all(|(_, tasks)| tasks.is_empty())
    }

    /// Returns the total number of tasks across all phases.
    pub fn total_tasks(&self) -> usize {
        self.phases.iter().map(|(_, tasks)| tasks.len()).sum()
    }

    /// Executes all phases in order.
    pub fn run(&self, runner: &ProcessRunner) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        info!(
            dry_run = runner.dry_run(),
            isolation = runner.isolation_name(),
            "starting pipeline with {} task(s)",
            self.total_tasks()
        );
        for (phase_name, tasks) in &self.phases {
            self.run_phase(phase_name, tasks, runner)?;
        }
        info!("pipeline completed successfully");
        Ok(())
    }

    fn run_phase(
        &self,
        phase_name: &str,
        tasks: &[InstallationTask],
        runner: &ProcessRunner,
    ) -> Result<()> {
        if tasks.is_empty() {
            debug!("skipping empty {} phase", phase_name);
            return Ok(());
        }

        info!("running {} phase ({} task(s))", phase_name, tasks.len());

        for (index, task) in tasks.iter().enumerate() {
            info!("running {} {}/{}: {}", phase_name, index + 1, tasks.len(), task.name());
            task.run(runner).with_context(|| {
                format!("failed to run {} {} ({})", phase_name, index + 1, task.name())
            })?;
        }

        Ok(())
    }
}
