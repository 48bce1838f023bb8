//! Closing package generation: task resolution, grouping into document
//! plans, rendering and persistence.

mod builder;
mod context;
mod grouping;
pub mod narrative;
mod resolver;

pub use builder::{create_package, source_hash, OutputTarget, PackageServices};
pub use context::{format_russian_date, short_name};
pub use grouping::{build_groups, resolve_rate_hour, GroupPlan};
pub use resolver::{resolve_task, ResolvedTask};

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::money::VatMode;
use crate::store::{DocType, Id, PerformerType};

use narrative::NarrativeOptions;

/// Task metadata: the keys the engine reads, plus everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_individual_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_contract_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(alias = "projectKey", skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    #[serde(alias = "projectName", skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billable: Option<bool>,
    #[serde(alias = "forceIncluded", skip_serializing_if = "Option::is_none")]
    pub force_included: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskMeta {
    /// Non-empty trimmed hint value.
    pub(crate) fn hint(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// One task as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(alias = "jira_id")]
    pub id: String,
    #[serde(default)]
    pub assignee_id: Option<Id>,
    pub hours: Decimal,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub contract_id: Option<Id>,
    #[serde(default)]
    pub company_inn: Option<String>,
    /// Type given to a performer materialized from hints.
    #[serde(default)]
    pub performer_type: Option<PerformerType>,
    #[serde(default)]
    pub meta: TaskMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProjectGrouping {
    Off,
    #[default]
    Auto,
    Force,
}

impl ProjectGrouping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Force => "force",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageOptions {
    pub include_timesheets: bool,
    pub norm_hours: Option<Decimal>,
    pub include_by_projects: ProjectGrouping,
    pub autopick_contract: bool,
    pub allow_selfemployed_without_receipt: bool,
    /// Explicit template per document type.
    pub templates: BTreeMap<DocType, String>,
    /// Template used for every type without an explicit mapping.
    pub template_id: Option<String>,
    pub template_variables: BTreeMap<String, String>,
    pub narrative: NarrativeOptions,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            include_timesheets: false,
            norm_hours: None,
            include_by_projects: ProjectGrouping::Auto,
            autopick_contract: true,
            allow_selfemployed_without_receipt: false,
            templates: BTreeMap::new(),
            template_id: None,
            template_variables: BTreeMap::new(),
            narrative: NarrativeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRequest {
    #[serde(default)]
    pub ta_id: Option<Id>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Marks a lazily created assignment as carrying IP.
    #[serde(default)]
    pub has_ip: bool,
    pub tasks: Vec<TaskInput>,
    #[serde(default)]
    pub options: PackageOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageWarning {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupInfo {
    pub performer_type: Option<PerformerType>,
    pub project_id: Option<String>,
    pub tasks: Vec<String>,
    pub pair_id: Option<String>,
}

/// What a package run creates (or created, when reused).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewDocument {
    pub doc_type: DocType,
    pub counterparty: String,
    pub contract_id: Id,
    pub amount_total: Decimal,
    pub vat_mode: VatMode,
    pub group_info: GroupInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedDocument {
    pub id: Id,
    pub doc_type: DocType,
    pub contract_id: Id,
    pub performer_id: Option<Id>,
    pub version: u32,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageResponse {
    pub package_id: Id,
    pub package_no: String,
    pub reused: bool,
    pub will_create: Vec<PreviewDocument>,
    pub warnings: Vec<PackageWarning>,
    pub documents: Vec<GeneratedDocument>,
}
