//! Batch orchestration: one file at a time, every task per file, then
//! reconcile and write.

use crate::config::AppConfig;
use crate::error::CoreError;
use crate::formats::{self, FormatFilter, InputSource};
use crate::image;
use crate::metadata::{MetadataStore, WriteOptions};
use crate::models::{file_name_of, ProcessingOutcome, RunSummary, TagPreview, TaskFailure};
use crate::reconcile::{preview, reconcile, PendingWrites, PREVIEW_CHARS};
use providers::{ProviderError, VisionProvider};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Called before each file with `(index, total, file_name)`; `index` is 1-based.
pub type ProgressFn = dyn Fn(usize, usize, &str) + Send + Sync;

#[derive(Default)]
pub struct BatchOptions {
    pub dry_run: bool,
    /// Checked before each file; once set no further file starts.
    pub cancel: Option<Arc<AtomicBool>>,
    pub on_progress: Option<Box<ProgressFn>>,
}

impl BatchOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

pub struct Pipeline {
    config: Arc<AppConfig>,
    generator: Arc<dyn VisionProvider>,
    metadata: Arc<dyn MetadataStore>,
}

impl Pipeline {
    pub fn new(
        config: Arc<AppConfig>,
        generator: Arc<dyn VisionProvider>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            generator,
            metadata,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Resolves the input using the configured formats, recursion and excludes.
    pub fn collect_inputs(&self, source: &InputSource) -> Result<Vec<PathBuf>, CoreError> {
        let filter = FormatFilter::new(&self.config.image_formats);
        formats::collect_inputs(source, &filter, self.config.recursive, &self.config.exclude)
    }

    pub async fn run(&self, files: &[PathBuf], opts: &BatchOptions) -> RunSummary {
        let total = files.len();
        let mut summary = RunSummary::start(total, opts.dry_run);

        for collision in self.config.tag_collisions() {
            warn!(
                tag = %collision.tag,
                tasks = ?collision.tasks,
                "tag is written by several tasks, the last one wins"
            );
        }
        info!(
            files = total,
            tasks = self.config.enabled_tasks().count(),
            provider = self.generator.name(),
            dry_run = opts.dry_run,
            "starting batch"
        );

        for (i, path) in files.iter().enumerate() {
            if opts.is_cancelled() {
                warn!(processed = i, total, "cancelled, stopping before next file");
                summary.cancelled = true;
                break;
            }
            let file_name = file_name_of(path);
            if let Some(cb) = &opts.on_progress {
                cb(i + 1, total, &file_name);
            }
            info!("[{}/{}] processing {}", i + 1, total, file_name);
            let outcome = self.process_file(path, opts.dry_run).await;
            summary.record(outcome);
        }

        summary.finish();
        info!(
            successful = summary.successful.len(),
            failed = summary.failed.len(),
            cancelled = summary.cancelled,
            "batch finished"
        );
        summary
    }

    /// Processes one image. Failures end up in the outcome, never as `Err`.
    pub async fn process_file(&self, path: &Path, dry_run: bool) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome::new(path.to_path_buf());
        match self.try_process(path, dry_run, &mut outcome).await {
            Ok(()) => outcome.success = true,
            Err(e) => {
                error!(file = %outcome.file_name, error = %e, "file failed");
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }

    async fn try_process(
        &self,
        path: &Path,
        dry_run: bool,
        outcome: &mut ProcessingOutcome,
    ) -> Result<(), CoreError> {
        let cfg = &self.config;
        image::check_file(path, cfg.max_file_size_mb).await?;
        let image = image::load_for_ai(path, self.metadata.as_ref()).await?;

        let mut pending = PendingWrites::new();
        let mut attempted = 0usize;
        let mut first_error: Option<ProviderError> = None;
        for task in cfg.enabled_tasks() {
            attempted += 1;
            match self.generate(&image, &cfg.prompt_for(task)).await {
                Ok(text) => {
                    debug!(task = %task.name, preview = %preview(&text, PREVIEW_CHARS), "generated");
                    pending.add_task_output(&task.tags, &text);
                }
                Err(e) => {
                    warn!(task = %task.name, error = %e, "task failed, skipping");
                    outcome.task_failures.push(TaskFailure {
                        task: task.name.clone(),
                        error: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        if pending.is_empty() {
            let all_failed = attempted > 0 && outcome.task_failures.len() == attempted;
            if all_failed && cfg.fail_on_no_output {
                if let Some(e) = first_error {
                    return Err(e.into());
                }
            }
            warn!(file = %outcome.file_name, "no AI output generated, nothing to write");
            outcome
                .warnings
                .push("no AI output generated, nothing to write".to_string());
            return Ok(());
        }

        let existing = self.metadata.read_tags(path, &pending.tag_names()).await?;
        let decided = reconcile(
            pending.values(),
            pending.policies(),
            &existing,
            cfg.default_overwrite_policy,
        );
        for skipped in &decided.skipped {
            info!(tag = %skipped.tag, existing = %skipped.existing, "keeping existing value");
        }
        outcome.skipped = decided.skipped.clone();

        if decided.is_empty() {
            info!(file = %outcome.file_name, "no tags to write, skip");
            return Ok(());
        }

        if dry_run {
            for (tag, value) in &decided.writes {
                let shown = preview(value, PREVIEW_CHARS);
                info!(tag = %tag, value = %shown, "dry run, would write");
                outcome.dry_run_preview.push(TagPreview {
                    tag: tag.clone(),
                    preview: shown,
                });
            }
            return Ok(());
        }

        let opts = WriteOptions {
            in_place: !cfg.preserve_original,
        };
        let report = self.metadata.write_tags(path, &decided.writes, opts).await?;
        for w in &report.warnings {
            debug!(file = %outcome.file_name, warning = %w, "exiftool warning");
        }
        info!(
            file = %outcome.file_name,
            tags = decided.writes.len(),
            updated = report.updated,
            unchanged = report.unchanged,
            "metadata written"
        );
        outcome.warnings.extend(report.warnings);
        outcome.written = decided.writes;
        Ok(())
    }

    async fn generate(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        let limit = self.config.ai_model.timeout();
        match tokio::time::timeout(limit, self.generator.generate(image, prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(limit)),
        }
    }
}
