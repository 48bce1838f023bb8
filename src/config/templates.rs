use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::{ClosingError, Result};
use crate::templates::{Template, TemplateKind, TemplateStore};

/// One entry of `templates.toml`.
#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(rename = "type")]
    kind: TemplateKind,
    file: String,
    #[serde(default)]
    name: Option<String>,
}

/// Templates listed in `templates.toml`, bodies read from `templates/`.
#[derive(Debug, Default)]
pub struct FileTemplates {
    templates: BTreeMap<String, Template>,
}

impl FileTemplates {
    /// Load the index and every body it lists. A missing index means no
    /// templates; a listed body that cannot be read is skipped.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("templates.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let index: BTreeMap<String, IndexEntry> =
            toml::from_str(&content).map_err(|e| ClosingError::ConfigParse { path, source: e })?;

        let dir = templates_dir(config_dir);
        let mut templates = BTreeMap::new();
        for (id, entry) in index {
            let file = dir.join(&entry.file);
            match fs::read_to_string(&file) {
                Ok(content) => {
                    templates.insert(
                        id.clone(),
                        Template {
                            name: entry.name.unwrap_or_else(|| id.clone()),
                            id,
                            kind: entry.kind,
                            content,
                        },
                    );
                }
                Err(err) => warn!(template = %id, file = %file.display(), error = %err, "template body unreadable"),
            }
        }
        Ok(Self { templates })
    }
}

pub fn templates_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("templates")
}

impl TemplateStore for FileTemplates {
    fn template(&self, id: &str) -> Option<Template> {
        self.templates.get(id).cloned()
    }

    fn list_templates(&self) -> Vec<Template> {
        self.templates.values().cloned().collect()
    }
}
