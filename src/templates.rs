//! Template store seam. The orchestrator only sees [`TemplateStore`];
//! the CLI backs it with the config directory, tests with
//! [`MemoryTemplates`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::DocType;

/// Template bucket, used to pick a default template per document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Act,
    Invoice,
    Timesheet,
    Custom,
}

impl TemplateKind {
    pub fn for_doc_type(doc_type: DocType) -> Self {
        match doc_type {
            DocType::Avr => Self::Act,
            DocType::App | DocType::Ipr => Self::Custom,
            DocType::Invoice => Self::Invoice,
            DocType::ServiceAssign => Self::Timesheet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Act => "act",
            Self::Invoice => "invoice",
            Self::Timesheet => "timesheet",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub kind: TemplateKind,
    pub content: String,
}

pub trait TemplateStore {
    fn template(&self, id: &str) -> Option<Template>;
    fn list_templates(&self) -> Vec<Template>;

    /// First template of the bucket `doc_type` falls into.
    fn default_for(&self, doc_type: DocType) -> Option<Template> {
        let kind = TemplateKind::for_doc_type(doc_type);
        self.list_templates().into_iter().find(|t| t.kind == kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTemplates {
    templates: BTreeMap<String, Template>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, kind: TemplateKind, content: &str) -> Self {
        self.insert(Template {
            id: id.to_string(),
            name: id.to_string(),
            kind,
            content: content.to_string(),
        });
        self
    }

    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }
}

impl TemplateStore for MemoryTemplates {
    fn template(&self, id: &str) -> Option<Template> {
        self.templates.get(id).cloned()
    }

    fn list_templates(&self) -> Vec<Template> {
        self.templates.values().cloned().collect()
    }
}
