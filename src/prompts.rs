use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// One declarative template: metadata, generation knobs, and the text body.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    pub metadata: TemplateMetadata,
    #[serde(default)]
    pub config: TemplateConfig,
    pub template: TemplateBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateConfig {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateBody {
    pub content: String,
}

impl PromptTemplate {
    pub fn content(&self) -> &str {
        &self.template.content
    }
}

/// Store of prompt and report templates, loaded once from a directory of
/// TOML files. Files that fail to parse are skipped with a warning so one
/// broken template does not take down the whole store.
#[derive(Debug, Default)]
pub struct PromptStore {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptStore {
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut templates = HashMap::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("prompt directory {} unreadable: {e}", dir.display());
                return Self { templates };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(template) => {
                    debug!("loaded template '{}'", template.metadata.name);
                    templates.insert(Self::stem(&path), template);
                }
                Err(e) => warn!("skipping template {}: {e}", path.display()),
            }
        }

        Self { templates }
    }

    fn load_file(path: &PathBuf) -> Result<PromptTemplate, PipelineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Internal(format!("read {}: {e}", path.display())))?;
        config::Config::builder()
            .add_source(config::File::from_str(&raw, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PipelineError::Internal(format!("parse {}: {e}", path.display())))
    }

    fn stem(path: &Path) -> String {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, key: &str, content: &str) {
        self.templates.insert(
            key.to_string(),
            PromptTemplate {
                metadata: TemplateMetadata {
                    name: key.to_string(),
                    description: String::new(),
                    version: None,
                },
                config: TemplateConfig::default(),
                template: TemplateBody {
                    content: content.to_string(),
                },
            },
        );
    }
}
