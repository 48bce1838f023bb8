use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::{Approval, Role};
use crate::money::VatMode;

pub type Id = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformerType {
    Employee,
    Gph,
    Selfemployed,
    Ip,
    Company,
}

impl PerformerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Gph => "gph",
            Self::Selfemployed => "selfemployed",
            Self::Ip => "ip",
            Self::Company => "company",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyType {
    Company,
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    #[default]
    Hour,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpTransferMode {
    #[default]
    Embedded,
    Separate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Draft,
    #[default]
    Active,
    Expired,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    Avr,
    App,
    Ipr,
    Invoice,
    ServiceAssign,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avr => "AVR",
            Self::App => "APP",
            Self::Ipr => "IPR",
            Self::Invoice => "INVOICE",
            Self::ServiceAssign => "SERVICE_ASSIGN",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Avr => "Акт выполненных работ",
            Self::App => "Акт передачи прав",
            Self::Ipr => "Промежуточный акт",
            Self::Invoice => "Счет-фактура",
            Self::ServiceAssign => "Служебное задание",
        }
    }

    /// Document types that carry the plan's money figures.
    pub fn carries_amounts(&self) -> bool {
        matches!(self, Self::Avr | Self::App | Self::Invoice)
    }

    /// Document types that carry hours and the hourly rate.
    pub fn carries_hours(&self) -> bool {
        matches!(self, Self::Avr | Self::ServiceAssign)
    }

    /// Document types linked by a pair id when IP is transferred
    /// separately.
    pub fn is_paired(&self) -> bool {
        matches!(self, Self::Avr | Self::App | Self::ServiceAssign)
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVR" => Ok(Self::Avr),
            "APP" => Ok(Self::App),
            "IPR" => Ok(Self::Ipr),
            "INVOICE" => Ok(Self::Invoice),
            "SERVICE_ASSIGN" => Ok(Self::ServiceAssign),
            other => Err(format!("unknown document type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default)]
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub inn: Option<String>,
    #[serde(default)]
    pub kpp: Option<String>,
    #[serde(default)]
    pub signatory: Option<String>,
    #[serde(default)]
    pub is_ip: bool,
    #[serde(default)]
    pub default_vat_mode: VatMode,
}

/// Identity hints kept next to a performer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    #[serde(default)]
    pub id: Id,
    pub full_name: String,
    #[serde(rename = "type")]
    pub performer_type: PerformerType,
    #[serde(default)]
    pub inn: Option<String>,
    #[serde(default)]
    pub tax_notes: TaxNotes,
    /// `legacy` or `hint` for records materialized during resolution.
    #[serde(default)]
    pub source: Option<String>,
}

/// Contract metadata: recognized keys plus everything else passed through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_hours: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npd_receipt_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npd_receipt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npd_check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ContractMeta {
    /// A self-employed performer's tax receipt has been confirmed.
    pub fn receipt_confirmed(&self) -> bool {
        [self.npd_receipt_confirmed, self.npd_receipt, self.npd_check]
            .into_iter()
            .any(|flag| flag == Some(true))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub id: Id,
    pub number: String,
    #[serde(default)]
    pub contract_date: Option<NaiveDate>,
    pub party_type: PartyType,
    #[serde(default)]
    pub company_id: Option<Id>,
    #[serde(default)]
    pub performer_id: Option<Id>,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    #[serde(default)]
    pub vat_mode: VatMode,
    #[serde(default)]
    pub rate_type: RateType,
    pub rate_value: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub act_by_projects: bool,
    #[serde(default)]
    pub ip_transfer_mode: IpTransferMode,
    #[serde(default)]
    pub status: ContractStatus,
    #[serde(default)]
    pub meta: ContractMeta,
}

pub fn default_currency() -> String {
    "RUB".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyIndividual {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub inn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyClient {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inn: Option<String>,
    #[serde(default)]
    pub kpp: Option<String>,
    #[serde(default)]
    pub signatory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyContract {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub contractor_id: Option<String>,
    #[serde(default)]
    pub rate: Decimal,
    #[serde(default)]
    pub rate_type: Option<RateType>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub created_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechAssignment {
    #[serde(default)]
    pub id: Id,
    pub number: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default)]
    pub has_ip: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageMeta {
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub task_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosingPackage {
    pub id: Id,
    pub ta_id: Id,
    pub package_no: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: String,
    pub source_hash: String,
    #[serde(default)]
    pub meta: PackageMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of one task as it entered a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: String,
    pub key: String,
    pub summary: String,
    pub description: String,
    pub status: String,
    pub hours: Decimal,
    pub assignee: String,
    pub project_key: String,
    pub project_name: String,
    pub billable: bool,
    pub force_included: bool,
    pub hourly_rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterpartyKind {
    Company,
    Individual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub performer_type: Option<PerformerType>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub task_items: Vec<TaskItem>,
    #[serde(default)]
    pub source_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default)]
    pub narrative_enabled: bool,
    #[serde(default)]
    pub summary_preview: Vec<String>,
    #[serde(default)]
    pub approval: Approval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Id,
    pub package_id: Id,
    pub ta_id: Id,
    #[serde(default)]
    pub pair_id: Option<String>,
    pub doc_type: DocType,
    #[serde(default)]
    pub template_id: Option<String>,
    pub counterparty_kind: CounterpartyKind,
    #[serde(default)]
    pub counterparty_id: Option<Id>,
    pub contract_id: Id,
    #[serde(default)]
    pub performer_id: Option<Id>,
    #[serde(default)]
    pub project_id: Option<String>,
    pub vat_mode: VatMode,
    pub currency: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default)]
    pub hours: Option<Decimal>,
    #[serde(default)]
    pub rate_hour: Option<Decimal>,
    pub amount_wo_vat: Decimal,
    pub vat_amount: Decimal,
    pub amount_total: Decimal,
    pub version: u32,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub meta: DocumentMeta,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesheetRow {
    pub task_id: String,
    pub hours: Decimal,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timesheet {
    pub id: Id,
    pub document_id: Id,
    pub rows: Vec<TimesheetRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Id,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub actor_id: Option<String>,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Last id handed out per table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub company: Id,
    pub performer: Id,
    pub contract: Id,
    pub tech_assignment: Id,
    pub package: Id,
    pub document: Id,
    pub timesheet: Id,
    pub audit: Id,
}

pub fn next_id(counter: &mut Id) -> Id {
    *counter += 1;
    *counter
}
