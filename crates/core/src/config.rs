use crate::error::CoreError;
use crate::reconcile::OverwritePolicy;
use providers::{ModelConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

pub const ENV_PREFIX: &str = "EXIFCRAFT";
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;

/// Keys arrive lower-cased from the `config` crate, so the camelCase
/// spellings of older config files are accepted through lower-case aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub tasks: Vec<TaskConfig>,
    #[serde(alias = "aimodel", alias = "aiModel")]
    pub ai_model: ModelConfig,
    #[serde(
        default = "default_image_formats",
        alias = "imageformats",
        alias = "imageFormats"
    )]
    pub image_formats: Vec<String>,
    /// Keep exiftool's `_original` backup instead of editing in place.
    #[serde(
        default = "default_true",
        alias = "preserveoriginal",
        alias = "preserveOriginal"
    )]
    pub preserve_original: bool,
    /// Inverse spelling of `preserve_original`; wins when present.
    #[serde(
        default,
        skip_serializing,
        alias = "overwriteoriginal",
        alias = "overwriteOriginal"
    )]
    pub overwrite_original: Option<bool>,
    #[serde(default, alias = "baseprompt", alias = "basePrompt")]
    pub base_prompt: Option<String>,
    #[serde(default)]
    pub default_overwrite_policy: OverwritePolicy,
    #[serde(default = "default_true")]
    pub fail_on_no_output: bool,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default, alias = "dryrun", alias = "dryRun")]
    pub dry_run: bool,
}

/// Top-level keys `AppConfig` understands, in the lower-cased form the
/// `config` crate hands over.
const KNOWN_KEYS: &[&str] = &[
    "tasks",
    "ai_model",
    "aimodel",
    "image_formats",
    "imageformats",
    "preserve_original",
    "preserveoriginal",
    "overwrite_original",
    "overwriteoriginal",
    "base_prompt",
    "baseprompt",
    "default_overwrite_policy",
    "fail_on_no_output",
    "max_file_size_mb",
    "recursive",
    "exclude",
    "verbose",
    "dry_run",
    "dryrun",
];

/// Keys not recognised by `AppConfig`, sorted. Matching ignores case.
pub fn unknown_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|k| !KNOWN_KEYS.contains(&k.to_lowercase().as_str()))
        .map(str::to_string)
        .collect();
    unknown.sort();
    unknown
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub prompt: String,
    pub tags: Vec<TagBinding>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTagBinding")]
pub struct TagBinding {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite_policy: Option<OverwritePolicy>,
}

/// Accepted spellings of a binding: a bare tag name, an explicit
/// `overwrite_policy`, or the boolean `allow_overwrite` / `avoid_overwrite`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTagBinding {
    Name(String),
    Full {
        name: String,
        #[serde(default, alias = "overwritepolicy", alias = "overwritePolicy")]
        overwrite_policy: Option<OverwritePolicy>,
        #[serde(default, alias = "allowoverwrite", alias = "allowOverwrite")]
        allow_overwrite: Option<bool>,
        #[serde(default, alias = "avoidoverwrite", alias = "avoidOverwrite")]
        avoid_overwrite: Option<bool>,
    },
}

impl TryFrom<RawTagBinding> for TagBinding {
    type Error = String;

    fn try_from(raw: RawTagBinding) -> Result<Self, Self::Error> {
        match raw {
            RawTagBinding::Name(name) => Ok(TagBinding {
                name,
                overwrite_policy: None,
            }),
            RawTagBinding::Full {
                name,
                overwrite_policy,
                allow_overwrite,
                avoid_overwrite,
            } => {
                let from_allow = allow_overwrite.map(|allow| {
                    if allow {
                        OverwritePolicy::Allow
                    } else {
                        OverwritePolicy::Avoid
                    }
                });
                let from_avoid = avoid_overwrite.map(|avoid| {
                    if avoid {
                        OverwritePolicy::Avoid
                    } else {
                        OverwritePolicy::Allow
                    }
                });
                let mut policy = None;
                for candidate in [overwrite_policy, from_allow, from_avoid]
                    .into_iter()
                    .flatten()
                {
                    match policy {
                        Some(existing) if existing != candidate => {
                            return Err(format!(
                                "tag '{}' has contradictory overwrite settings",
                                name
                            ));
                        }
                        _ => policy = Some(candidate),
                    }
                }
                Ok(TagBinding {
                    name,
                    overwrite_policy: policy,
                })
            }
        }
    }
}

/// Two or more enabled tasks writing the same tag; the later task wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCollision {
    pub tag: String,
    pub tasks: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_file_size_mb() -> u64 {
    DEFAULT_MAX_FILE_SIZE_MB
}

pub fn default_image_formats() -> Vec<String> {
    [
        ".jpg", ".jpeg", ".png", ".heic", ".heif", ".tif", ".tiff", ".webp", ".nef", ".raf",
        ".cr2", ".arw", ".dng", ".raw",
    ]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Lower-cases extensions and gives them a leading dot.
pub fn normalize_formats(formats: &[String]) -> Vec<String> {
    let mut out: Vec<String> = formats
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty() && f != ".")
        .map(|f| {
            if f.starts_with('.') {
                f
            } else {
                format!(".{}", f)
            }
        })
        .collect();
    let mut seen = std::collections::HashSet::new();
    out.retain(|f| seen.insert(f.clone()));
    out
}

impl AppConfig {
    pub fn enabled_tasks(&self) -> impl Iterator<Item = &TaskConfig> {
        self.tasks.iter().filter(|t| t.enabled)
    }

    pub fn prompt_for(&self, task: &TaskConfig) -> String {
        format!("{}{}", self.base_prompt.as_deref().unwrap_or(""), task.prompt)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |msg: String| -> Result<(), CoreError> { Err(CoreError::InvalidConfig(msg)) };

        if self.tasks.is_empty() {
            return invalid("at least one task must be configured".into());
        }
        for (i, task) in self.tasks.iter().enumerate() {
            if task.name.trim().is_empty() {
                return invalid(format!("tasks[{}] must contain a valid name", i));
            }
            if task.prompt.trim().is_empty() {
                return invalid(format!("tasks[{}] must contain a valid prompt", i));
            }
            if task.tags.is_empty() {
                return invalid(format!("tasks[{}] must contain at least one tag", i));
            }
            for (j, tag) in task.tags.iter().enumerate() {
                if tag.name.trim().is_empty() {
                    return invalid(format!("tasks[{}].tags[{}] must contain a valid name", i, j));
                }
            }
        }

        let model = &self.ai_model;
        // openai may leave the endpoint empty and fall back to OPENAI_BASE_URL.
        let endpoint_required = match model.provider {
            ProviderKind::Ollama => true,
            ProviderKind::OpenAi => !model.endpoint.is_empty(),
            ProviderKind::Mock => false,
        };
        if endpoint_required
            && !(model.endpoint.starts_with("http://") || model.endpoint.starts_with("https://"))
        {
            return invalid(format!(
                "ai_model.endpoint must be an http(s) URL, got '{}'",
                model.endpoint
            ));
        }
        if let Some(t) = model.options.temperature {
            if !(0.0..=2.0).contains(&t) {
                return invalid(format!("ai_model.options.temperature must be within 0..=2, got {}", t));
            }
        }
        if model.options.max_tokens == Some(0) {
            return invalid("ai_model.options.max_tokens must be positive".into());
        }
        if model.timeout_secs == 0 {
            return invalid("ai_model.timeout_secs must be positive".into());
        }

        if self.image_formats.is_empty() {
            return invalid("image_formats must list at least one extension".into());
        }
        if self.max_file_size_mb == 0 {
            return invalid("max_file_size_mb must be positive".into());
        }
        for pattern in &self.exclude {
            if let Err(e) = globset::Glob::new(pattern) {
                return invalid(format!("exclude pattern '{}': {}", pattern, e));
            }
        }
        Ok(())
    }

    /// Tags bound by more than one enabled task, in first-seen order.
    pub fn tag_collisions(&self) -> Vec<TagCollision> {
        let mut seen: Vec<TagCollision> = Vec::new();
        for task in self.enabled_tasks() {
            for binding in &task.tags {
                match seen.iter_mut().find(|c| c.tag == binding.name) {
                    Some(c) => {
                        if !c.tasks.contains(&task.name) {
                            c.tasks.push(task.name.clone());
                        }
                    }
                    None => seen.push(TagCollision {
                        tag: binding.name.clone(),
                        tasks: vec![task.name.clone()],
                    }),
                }
            }
        }
        seen.retain(|c| c.tasks.len() > 1);
        seen
    }
}

/// Loads the config file (JSON, TOML or YAML by extension), applies
/// `EXIFCRAFT_*` environment overrides, normalises and validates it.
pub fn load(path: &Path) -> Result<AppConfig, CoreError> {
    if !path.is_file() {
        return Err(CoreError::ConfigNotFound(path.to_path_buf()));
    }
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    let keys: HashMap<String, config::Value> = settings.clone().try_deserialize()?;
    for key in unknown_keys(keys.keys().map(String::as_str)) {
        warn!(key = %key, path = %path.display(), "ignoring unknown config key");
    }
    let mut cfg: AppConfig = settings.try_deserialize()?;
    if let Some(overwrite) = cfg.overwrite_original.take() {
        cfg.preserve_original = !overwrite;
    }
    cfg.image_formats = normalize_formats(&cfg.image_formats);
    cfg.validate()?;
    Ok(cfg)
}
