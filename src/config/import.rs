use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ClosingError, Result};
use crate::store::{
    next_id, AuditRecord, AuditSink, Company, Contract, Database, Id, LegacyClient,
    LegacyContract, LegacyIndividual, Performer, Store, TechAssignment, User,
};

/// Directory records loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DirectoryImport {
    pub companies: Vec<Company>,
    pub performers: Vec<Performer>,
    pub contracts: Vec<Contract>,
    pub users: Vec<User>,
    pub tech_assignments: Vec<TechAssignment>,
    pub legacy_individuals: Vec<LegacyIndividual>,
    pub legacy_clients: Vec<LegacyClient>,
    pub legacy_contracts: Vec<LegacyContract>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub companies: usize,
    pub performers: usize,
    pub contracts: usize,
    pub users: usize,
    pub tech_assignments: usize,
    pub legacy_records: usize,
}

pub fn read_import(path: &Path) -> Result<DirectoryImport> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| ClosingError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Insert or replace records by id. Records without an id (0) get the
/// next free one.
fn upsert<T>(
    table: &mut Vec<T>,
    counter: &mut Id,
    records: Vec<T>,
    id_of: impl Fn(&mut T) -> &mut Id,
) -> usize {
    let count = records.len();
    for mut record in records {
        let id = *id_of(&mut record);
        if id == 0 {
            *id_of(&mut record) = next_id(counter);
        } else if id > *counter {
            *counter = id;
        }
        let id = *id_of(&mut record);
        match table.iter_mut().position(|existing| *id_of(existing) == id) {
            Some(index) => table[index] = record,
            None => table.push(record),
        }
    }
    count
}

fn upsert_by_key<T>(table: &mut Vec<T>, records: Vec<T>, key: impl Fn(&T) -> String) -> usize {
    let count = records.len();
    for record in records {
        let id = key(&record);
        match table.iter().position(|existing| key(existing) == id) {
            Some(index) => table[index] = record,
            None => table.push(record),
        }
    }
    count
}

pub fn apply_import(db: &mut Database, import: DirectoryImport) -> ImportSummary {
    let counters = &mut db.counters;
    ImportSummary {
        companies: upsert(&mut db.companies, &mut counters.company, import.companies, |c| &mut c.id),
        performers: upsert(&mut db.performers, &mut counters.performer, import.performers, |p| &mut p.id),
        contracts: upsert(&mut db.contracts, &mut counters.contract, import.contracts, |c| &mut c.id),
        tech_assignments: upsert(
            &mut db.tech_assignments,
            &mut counters.tech_assignment,
            import.tech_assignments,
            |t| &mut t.id,
        ),
        users: upsert_by_key(&mut db.users, import.users, |u| u.id.clone()),
        legacy_records: upsert_by_key(&mut db.legacy_individuals, import.legacy_individuals, |l| l.id.clone())
            + upsert_by_key(&mut db.legacy_clients, import.legacy_clients, |l| l.id.clone())
            + upsert_by_key(&mut db.legacy_contracts, import.legacy_contracts, |l| l.id.clone()),
    }
}

/// Read `path` and merge it into the store in one transaction.
pub fn import_directory(store: &mut Store, path: &Path) -> Result<ImportSummary> {
    let import = read_import(path)?;
    store.transaction(|db| {
        let summary = apply_import(db, import);
        db.record_audit(AuditRecord {
            actor_id: None,
            action: "directory.import".to_string(),
            entity: "directory".to_string(),
            entity_id: path.display().to_string(),
            payload: serde_json::to_value(&summary).unwrap_or_default(),
            error_code: None,
        });
        info!(
            companies = summary.companies,
            performers = summary.performers,
            contracts = summary.contracts,
            "directory imported"
        );
        Ok(summary)
    })
}
