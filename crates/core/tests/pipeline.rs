use async_trait::async_trait;
use exifcraft_core::config::{AppConfig, TagBinding, TaskConfig};
use exifcraft_core::error::MetadataError;
use exifcraft_core::formats::InputSource;
use exifcraft_core::metadata::{MetadataStore, WriteOptions, WriteReport};
use exifcraft_core::reconcile::{OverwritePolicy, TagSnapshot, WriteSet};
use exifcraft_core::{BatchOptions, CoreError, Pipeline};
use providers::{ModelConfig, ModelOptions, ProviderError, ProviderKind, VisionProvider};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Answers by prompt; images whose bytes contain `fail_marker` get `Timeout`.
#[derive(Default)]
struct FakeGenerator {
    answers: HashMap<String, String>,
    fail_marker: Option<Vec<u8>>,
    fail_prompt: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    fn answering(pairs: &[(&str, &str)]) -> Self {
        Self {
            answers: pairs
                .iter()
                .map(|(p, a)| (p.to_string(), a.to_string()))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VisionProvider for FakeGenerator {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate(&self, image: &[u8], prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(marker) = &self.fail_marker {
            if image.windows(marker.len()).any(|w| w == marker.as_slice()) {
                return Err(ProviderError::Timeout(Duration::from_secs(60)));
            }
        }
        if self.fail_prompt.as_deref() == Some(prompt) {
            return Err(ProviderError::MalformedResponse);
        }
        self.answers
            .get(prompt)
            .cloned()
            .ok_or(ProviderError::MalformedResponse)
    }
}

/// In-memory tags per file. Writes also append to the file so byte-level
/// checks can tell whether anything was written.
#[derive(Default)]
struct FakeStore {
    tags: Mutex<HashMap<PathBuf, TagSnapshot>>,
    reads: Mutex<Vec<Vec<String>>>,
    writes: Mutex<Vec<(PathBuf, WriteSet, bool)>>,
    fail_write_for: Option<String>,
}

impl FakeStore {
    fn with_existing(path: &Path, tags: &[(&str, serde_json::Value)]) -> Self {
        let store = FakeStore::default();
        store.tags.lock().unwrap().insert(
            path.to_path_buf(),
            tags.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        );
        store
    }
}

#[async_trait]
impl MetadataStore for FakeStore {
    async fn init(&self) -> Result<(), MetadataError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MetadataError> {
        Ok(())
    }

    async fn read_tags(&self, path: &Path, tags: &[String]) -> Result<TagSnapshot, MetadataError> {
        self.reads.lock().unwrap().push(tags.to_vec());
        let all = self.tags.lock().unwrap();
        Ok(all
            .get(path)
            .map(|snap| {
                snap.iter()
                    .filter(|(k, _)| tags.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_tags(
        &self,
        path: &Path,
        values: &WriteSet,
        opts: WriteOptions,
    ) -> Result<WriteReport, MetadataError> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if self.fail_write_for.as_deref() == Some(name.as_str()) {
            return Err(MetadataError::Write("Error: Not a valid JPG".into()));
        }
        let mut bytes = std::fs::read(path)?;
        bytes.extend_from_slice(b"XMP");
        std::fs::write(path, bytes)?;
        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), values.clone(), opts.in_place));
        Ok(WriteReport {
            updated: 1,
            ..Default::default()
        })
    }

    async fn extract_binary_tag(
        &self,
        _path: &Path,
        _tag: &str,
    ) -> Result<Option<Vec<u8>>, MetadataError> {
        Ok(None)
    }
}

fn binding(name: &str, policy: Option<OverwritePolicy>) -> TagBinding {
    TagBinding {
        name: name.to_string(),
        overwrite_policy: policy,
    }
}

fn task(name: &str, prompt: &str, tags: Vec<TagBinding>) -> TaskConfig {
    TaskConfig {
        name: name.to_string(),
        prompt: prompt.to_string(),
        tags,
        enabled: true,
    }
}

fn config(tasks: Vec<TaskConfig>) -> AppConfig {
    AppConfig {
        tasks,
        ai_model: ModelConfig {
            provider: ProviderKind::Mock,
            endpoint: String::new(),
            model: String::new(),
            key: None,
            options: ModelOptions::default(),
            timeout_secs: 60,
        },
        image_formats: vec![".jpg".into()],
        preserve_original: true,
        overwrite_original: None,
        base_prompt: None,
        default_overwrite_policy: OverwritePolicy::Allow,
        fail_on_no_output: true,
        max_file_size_mb: 100,
        recursive: false,
        exclude: vec![],
        verbose: false,
        dry_run: false,
    }
}

fn title_task() -> TaskConfig {
    task("title", "title?", vec![binding("Title", None)])
}

fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|n| {
            let p = dir.join(n);
            std::fs::write(&p, format!("image bytes of {}", n)).unwrap();
            p
        })
        .collect()
}

fn pipeline(cfg: AppConfig, generator: FakeGenerator, store: Arc<FakeStore>) -> Pipeline {
    Pipeline::new(Arc::new(cfg), Arc::new(generator), store)
}

#[tokio::test]
async fn one_timeout_fails_only_that_file() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let mut generator = FakeGenerator::answering(&[("title?", "Sunset")]);
    generator.fail_marker = Some(b"of b.jpg".to_vec());
    let store = Arc::new(FakeStore::default());
    let p = pipeline(config(vec![title_task()]), generator, store.clone());

    let summary = p.run(&files, &BatchOptions::default()).await;

    assert_eq!(summary.successful, vec!["a.jpg", "c.jpg"]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].file_name, "b.jpg");
    assert_eq!(summary.failed[0].error, "AI request timed out after 60s");
    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!(store.writes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn slow_generator_hits_configured_timeout() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["slow.jpg"]);
    let mut generator = FakeGenerator::answering(&[("title?", "Sunset")]);
    generator.delay = Some(Duration::from_secs(5));
    let mut cfg = config(vec![title_task()]);
    cfg.ai_model.timeout_secs = 1;
    let p = pipeline(cfg, generator, Arc::new(FakeStore::default()));

    let summary = p.run(&files, &BatchOptions::default()).await;
    assert_eq!(summary.failed[0].error, "AI request timed out after 1s");
}

#[tokio::test]
async fn failures_are_isolated_per_file() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["1.jpg", "2.jpg", "3.jpg", "4.jpg"]);
    let generator = FakeGenerator::answering(&[("title?", "Sunset")]);
    let store = Arc::new(FakeStore {
        fail_write_for: Some("2.jpg".into()),
        ..Default::default()
    });
    std::fs::remove_file(&files[2]).unwrap();
    let p = pipeline(config(vec![title_task()]), generator, store.clone());

    let summary = p.run(&files, &BatchOptions::default()).await;

    assert_eq!(summary.outcomes.len(), 4);
    assert_eq!(summary.successful, vec!["1.jpg", "4.jpg"]);
    let errors: Vec<_> = summary.failed.iter().map(|f| f.error.as_str()).collect();
    assert_eq!(
        errors,
        vec![
            "failed to write metadata: Error: Not a valid JPG",
            "file does not exist"
        ]
    );
}

#[tokio::test]
async fn dry_run_leaves_files_untouched() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg", "b.jpg"]);
    let before: Vec<_> = files
        .iter()
        .map(|f| {
            let meta = std::fs::metadata(f).unwrap();
            (
                blake3::hash(&std::fs::read(f).unwrap()),
                meta.len(),
                meta.modified().unwrap(),
            )
        })
        .collect();
    let long = "x".repeat(150);
    let generator = FakeGenerator::answering(&[("title?", long.as_str())]);
    let store = Arc::new(FakeStore::default());
    let p = pipeline(config(vec![title_task()]), generator, store.clone());

    let opts = BatchOptions {
        dry_run: true,
        ..Default::default()
    };
    let summary = p.run(&files, &opts).await;

    assert!(summary.dry_run);
    assert_eq!(summary.successful.len(), 2);
    assert!(store.writes.lock().unwrap().is_empty());
    // Same decision path as a real run: the snapshot is still read.
    assert_eq!(store.reads.lock().unwrap().len(), 2);
    let preview = &summary.outcomes[0].dry_run_preview;
    assert_eq!(preview.len(), 1);
    assert_eq!(preview[0].tag, "Title");
    assert_eq!(preview[0].preview, format!("{}...", "x".repeat(100)));
    assert!(summary.outcomes[0].written.is_empty());

    for (f, (hash, len, mtime)) in files.iter().zip(before) {
        let meta = std::fs::metadata(f).unwrap();
        assert_eq!(blake3::hash(&std::fs::read(f).unwrap()), hash);
        assert_eq!(meta.len(), len);
        assert_eq!(meta.modified().unwrap(), mtime);
    }
}

#[tokio::test]
async fn reads_exactly_the_pending_tags() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let tasks = vec![
        task(
            "desc",
            "describe",
            vec![binding("Description", None), binding("ImageDescription", None)],
        ),
        title_task(),
    ];
    let generator = FakeGenerator::answering(&[("describe", "A hill"), ("title?", "Hill")]);
    let store = Arc::new(FakeStore::default());
    let p = pipeline(config(tasks), generator, store.clone());

    p.run(&files, &BatchOptions::default()).await;

    let reads = store.reads.lock().unwrap();
    assert_eq!(reads.len(), 1);
    let mut requested = reads[0].clone();
    requested.sort();
    assert_eq!(requested, vec!["Description", "ImageDescription", "Title"]);
}

#[tokio::test]
async fn avoid_policy_keeps_existing_values() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let tasks = vec![task(
        "meta",
        "meta?",
        vec![
            binding("Title", Some(OverwritePolicy::Avoid)),
            binding("Description", Some(OverwritePolicy::Avoid)),
            binding("Subject", Some(OverwritePolicy::Allow)),
        ],
    )];
    let store = Arc::new(FakeStore::with_existing(
        &files[0],
        &[
            ("Title", json!("Old")),
            ("Description", json!("  ")),
            ("Subject", json!(["keep"])),
        ],
    ));
    let generator = FakeGenerator::answering(&[("meta?", "New")]);
    let p = pipeline(config(tasks), generator, store.clone());

    let summary = p.run(&files, &BatchOptions::default()).await;

    let outcome = &summary.outcomes[0];
    assert!(outcome.success);
    assert_eq!(
        outcome.written.keys().collect::<Vec<_>>(),
        vec!["Description", "Subject"]
    );
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].tag, "Title");
    assert_eq!(outcome.skipped[0].existing, "Old");

    let writes = store.writes.lock().unwrap();
    assert!(!writes[0].1.contains_key("Title"));
}

#[tokio::test]
async fn everything_skipped_writes_nothing() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let tasks = vec![task(
        "title",
        "title?",
        vec![binding("Title", Some(OverwritePolicy::Avoid))],
    )];
    let store = Arc::new(FakeStore::with_existing(&files[0], &[("Title", json!("Old"))]));
    let generator = FakeGenerator::answering(&[("title?", "New")]);
    let p = pipeline(config(tasks), generator, store.clone());

    let summary = p.run(&files, &BatchOptions::default()).await;
    assert_eq!(summary.successful, vec!["a.jpg"]);
    assert!(store.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn later_task_wins_on_shared_tag() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let tasks = vec![
        task("first", "one", vec![binding("Description", None)]),
        task("second", "two", vec![binding("Description", None)]),
    ];
    let generator = FakeGenerator::answering(&[("one", "A"), ("two", "B")]);
    let store = Arc::new(FakeStore::default());
    let p = pipeline(config(tasks), generator, store.clone());

    p.run(&files, &BatchOptions::default()).await;
    let writes = store.writes.lock().unwrap();
    assert_eq!(writes[0].1["Description"], "B");
}

#[tokio::test]
async fn failed_task_does_not_stop_the_others() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let tasks = vec![
        task("broken", "broken?", vec![binding("Title", None)]),
        task("desc", "describe", vec![binding("Description", None)]),
    ];
    let mut generator = FakeGenerator::answering(&[("describe", "A hill")]);
    generator.fail_prompt = Some("broken?".into());
    let p = pipeline(config(tasks), generator, Arc::new(FakeStore::default()));

    let summary = p.run(&files, &BatchOptions::default()).await;
    let outcome = &summary.outcomes[0];
    assert!(outcome.success);
    assert_eq!(outcome.task_failures.len(), 1);
    assert_eq!(outcome.task_failures[0].task, "broken");
    assert_eq!(outcome.written.keys().collect::<Vec<_>>(), vec!["Description"]);
}

#[tokio::test]
async fn no_output_can_complete_with_warning() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let mut generator = FakeGenerator::answering(&[]);
    generator.fail_prompt = Some("title?".into());
    let mut cfg = config(vec![title_task()]);
    cfg.fail_on_no_output = false;
    let store = Arc::new(FakeStore::default());
    let p = pipeline(cfg, generator, store.clone());

    let summary = p.run(&files, &BatchOptions::default()).await;
    assert_eq!(summary.successful, vec!["a.jpg"]);
    assert_eq!(summary.outcomes[0].warnings.len(), 1);
    assert!(store.reads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disabled_tasks_and_base_prompt() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let mut off = task("off", "never", vec![binding("Comment", None)]);
    off.enabled = false;
    let mut cfg = config(vec![off, title_task()]);
    cfg.base_prompt = Some("Be brief. ".into());
    let generator = Arc::new(FakeGenerator::answering(&[("Be brief. title?", "Hill")]));
    let store = Arc::new(FakeStore::default());
    let p = Pipeline::new(Arc::new(cfg), generator.clone(), store.clone());

    let summary = p.run(&files, &BatchOptions::default()).await;
    assert!(summary.outcomes[0].success);
    assert_eq!(*generator.prompts.lock().unwrap(), vec!["Be brief. title?"]);
}

#[tokio::test]
async fn in_place_follows_preserve_original() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg"]);
    let mut cfg = config(vec![title_task()]);
    cfg.preserve_original = false;
    let store = Arc::new(FakeStore::default());
    let p = pipeline(cfg, FakeGenerator::answering(&[("title?", "Hill")]), store.clone());

    p.run(&files, &BatchOptions::default()).await;
    assert!(store.writes.lock().unwrap()[0].2);
}

#[tokio::test]
async fn cancel_stops_before_next_file() {
    let dir = tempdir().unwrap();
    let files = write_images(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let opts = BatchOptions {
        dry_run: false,
        cancel: Some(cancel),
        on_progress: Some(Box::new(move |i: usize, total: usize, name: &str| {
            seen_cb.lock().unwrap().push((i, total, name.to_string()));
            if i == 2 {
                flag.store(true, Ordering::SeqCst);
            }
        })),
    };
    let p = pipeline(
        config(vec![title_task()]),
        FakeGenerator::answering(&[("title?", "Hill")]),
        Arc::new(FakeStore::default()),
    );

    let summary = p.run(&files, &opts).await;

    assert!(summary.cancelled);
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(1, 3, "a.jpg".to_string()), (2, 3, "b.jpg".to_string())]
    );
}

#[tokio::test]
async fn collect_inputs_uses_config() {
    let dir = tempdir().unwrap();
    write_images(dir.path(), &["b.JPG", "a.jpg", "notes.txt", "skip.jpg"]);
    let mut cfg = config(vec![title_task()]);
    cfg.exclude = vec!["skip.*".into()];
    let p = pipeline(cfg, FakeGenerator::default(), Arc::new(FakeStore::default()));

    let files = p
        .collect_inputs(&InputSource::Directory(dir.path().to_path_buf()))
        .unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.jpg", "b.JPG"]);

    let empty = tempdir().unwrap();
    let err = p
        .collect_inputs(&InputSource::Directory(empty.path().to_path_buf()))
        .unwrap_err();
    assert!(matches!(err, CoreError::NoImageFiles));
}
