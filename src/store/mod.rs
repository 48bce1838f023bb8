//! JSON-backed store of directory records, packages and documents.
//!
//! Every mutation runs against a clone of the [`Database`]; the clone
//! replaces the live copy and is written to disk only when the closure
//! returns `Ok`. A failing transaction leaves the disk as it was.
//! File-backed transactions run under an exclusive lock on a sibling
//! `.lock` file and re-read the state first.

mod records;

pub use records::*;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ClosingError, Result};

/// Billing period, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `01.03.2025 — 31.03.2025`
    pub fn display_range(&self) -> String {
        format!(
            "{} — {}",
            self.start.format("%d.%m.%Y"),
            self.end.format("%d.%m.%Y")
        )
    }
}

/// Filters for [`Directory::active_contracts`].
#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub performer_id: Option<Id>,
    pub company_inn: Option<String>,
}

/// Read side of the counterparty directory.
pub trait Directory {
    /// Active contracts whose validity overlaps `period`.
    fn active_contracts(&self, period: &Period, filter: &ContractFilter) -> Vec<Contract>;
    fn performer(&self, id: Id) -> Option<Performer>;
    fn company_by_id(&self, id: Id) -> Option<Company>;
    fn company_by_inn(&self, inn: &str) -> Option<Company>;
}

/// One audit line: who did what to which entity, and how it ended.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub actor_id: Option<String>,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub payload: Value,
    pub error_code: Option<String>,
}

pub trait AuditSink {
    fn record_audit(&mut self, record: AuditRecord);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub companies: Vec<Company>,
    pub performers: Vec<Performer>,
    pub contracts: Vec<Contract>,
    pub legacy_individuals: Vec<LegacyIndividual>,
    pub legacy_clients: Vec<LegacyClient>,
    pub legacy_contracts: Vec<LegacyContract>,
    pub users: Vec<User>,
    pub tech_assignments: Vec<TechAssignment>,
    pub packages: Vec<ClosingPackage>,
    pub documents: Vec<DocumentRecord>,
    pub timesheets: Vec<Timesheet>,
    pub audit_log: Vec<AuditEntry>,
    pub counters: Counters,
}

/// Digits of an INN, or `None` when nothing is left.
pub fn normalize_inn(inn: &str) -> Option<String> {
    let digits: String = inn.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

impl Database {
    pub fn company(&self, id: Id) -> Option<&Company> {
        self.companies.iter().find(|c| c.id == id)
    }

    pub fn contract(&self, id: Id) -> Option<&Contract> {
        self.contracts.iter().find(|c| c.id == id)
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn tech_assignment(&self, id: Id) -> Option<&TechAssignment> {
        self.tech_assignments.iter().find(|t| t.id == id)
    }

    pub fn package(&self, id: Id) -> Option<&ClosingPackage> {
        self.packages.iter().find(|p| p.id == id)
    }

    pub fn document(&self, id: Id) -> Option<&DocumentRecord> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn document_mut(&mut self, id: Id) -> Option<&mut DocumentRecord> {
        self.documents.iter_mut().find(|d| d.id == id)
    }

    pub fn package_documents(&self, package_id: Id) -> Vec<&DocumentRecord> {
        self.documents
            .iter()
            .filter(|d| d.package_id == package_id)
            .collect()
    }

    pub fn legacy_individual(&self, id: &str) -> Option<&LegacyIndividual> {
        self.legacy_individuals.iter().find(|l| l.id == id)
    }

    pub fn legacy_client(&self, id: &str) -> Option<&LegacyClient> {
        self.legacy_clients.iter().find(|l| l.id == id)
    }

    pub fn legacy_contract(&self, id: &str) -> Option<&LegacyContract> {
        self.legacy_contracts.iter().find(|l| l.id == id)
    }

    pub fn insert_company(&mut self, mut company: Company) -> Id {
        company.id = next_id(&mut self.counters.company);
        let id = company.id;
        self.companies.push(company);
        id
    }

    pub fn insert_performer(&mut self, mut performer: Performer) -> Id {
        performer.id = next_id(&mut self.counters.performer);
        let id = performer.id;
        self.performers.push(performer);
        id
    }

    pub fn insert_contract(&mut self, mut contract: Contract) -> Id {
        contract.id = next_id(&mut self.counters.contract);
        let id = contract.id;
        self.contracts.push(contract);
        id
    }

    /// Insert or replace a user by id.
    pub fn upsert_user(&mut self, user: User) {
        match self.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => self.users.push(user),
        }
    }
}

impl Directory for Database {
    fn active_contracts(&self, period: &Period, filter: &ContractFilter) -> Vec<Contract> {
        let company_ids: Option<Vec<Id>> = filter
            .company_inn
            .as_deref()
            .and_then(normalize_inn)
            .map(|inn| {
                self.companies
                    .iter()
                    .filter(|c| c.inn.as_deref().and_then(normalize_inn).as_deref() == Some(inn.as_str()))
                    .map(|c| c.id)
                    .collect()
            });

        self.contracts
            .iter()
            .filter(|c| c.status == ContractStatus::Active)
            .filter(|c| c.valid_from <= period.end && c.valid_to >= period.start)
            .filter(|c| filter.performer_id.map_or(true, |id| c.performer_id == Some(id)))
            .filter(|c| match &company_ids {
                Some(ids) => c.company_id.is_some_and(|id| ids.contains(&id)),
                None => true,
            })
            .cloned()
            .collect()
    }

    fn performer(&self, id: Id) -> Option<Performer> {
        self.performers.iter().find(|p| p.id == id).cloned()
    }

    fn company_by_id(&self, id: Id) -> Option<Company> {
        self.company(id).cloned()
    }

    fn company_by_inn(&self, inn: &str) -> Option<Company> {
        let inn = normalize_inn(inn)?;
        self.companies
            .iter()
            .find(|c| c.inn.as_deref().and_then(normalize_inn).as_deref() == Some(inn.as_str()))
            .cloned()
    }
}

impl AuditSink for Database {
    fn record_audit(&mut self, record: AuditRecord) {
        let id = next_id(&mut self.counters.audit);
        self.audit_log.push(AuditEntry {
            id,
            at: Utc::now(),
            actor_id: record.actor_id,
            action: record.action,
            entity: record.entity,
            entity_id: record.entity_id,
            payload: record.payload,
            error_code: record.error_code,
        });
    }
}

/// The database plus the file it lives in.
pub struct Store {
    path: PathBuf,
    db: Database,
}

impl Store {
    /// Load `path`, or start empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let db = read_database(&path)?;
        Ok(Self { path, db })
    }

    /// In-memory store that never touches the disk.
    pub fn in_memory(db: Database) -> Self {
        Self {
            path: PathBuf::new(),
            db,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against a draft copy and commit it only on success.
    ///
    /// A file-backed store holds the state lock for the whole call and
    /// starts from the file's current content, so writers are serialized
    /// and each one sees what the previous one committed.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let _lock = self.lock()?;
        self.reload()?;
        let mut draft = self.db.clone();
        let value = f(&mut draft)?;
        self.write(&draft)?;
        self.db = draft;
        Ok(value)
    }

    /// Record a failed operation in the audit log, outside any transaction.
    pub fn record_failure(
        &mut self,
        actor_id: Option<&str>,
        action: &str,
        entity: &str,
        entity_id: &str,
        error: &ClosingError,
    ) -> Result<()> {
        let _lock = self.lock()?;
        self.reload()?;
        self.db.record_audit(AuditRecord {
            actor_id: actor_id.map(str::to_string),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            payload: serde_json::json!({ "message": error.to_string(), "details": error.details() }),
            error_code: Some(error.code().to_string()),
        });
        self.write(&self.db)
    }

    fn is_file_backed(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    /// Exclusive lock on `<state>.lock`, released when the file is dropped.
    fn lock(&self) -> Result<Option<File>> {
        if !self.is_file_backed() {
            return Ok(None);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("json.lock"))?;
        file.lock_exclusive()?;
        Ok(Some(file))
    }

    fn reload(&mut self) -> Result<()> {
        if self.is_file_backed() {
            self.db = read_database(&self.path)?;
        }
        Ok(())
    }

    /// Write the database next to its final path, then rename over it.
    fn write(&self, db: &Database) -> Result<()> {
        if !self.is_file_backed() {
            return Ok(());
        }
        let content = serde_json::to_string_pretty(db).map_err(|e| {
            ClosingError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            ))
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "store saved");
        Ok(())
    }
}

fn read_database(path: &Path) -> Result<Database> {
    if !path.exists() {
        return Ok(Database::default());
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| ClosingError::StateParse {
        path: path.to_path_buf(),
        source,
    })
}
