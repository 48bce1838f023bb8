use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use crate::error::{ClosingError, Result};
use crate::money::{round_amount, VatMode};
use crate::store::{
    normalize_inn, Company, Contract, ContractFilter, ContractMeta, ContractStatus, Database,
    Directory, IpTransferMode, LegacyIndividual, PartyType, Performer, PerformerType, Period,
    RateType, TaxNotes,
};

use super::{PackageOptions, TaskInput, TaskMeta};

const UNKNOWN_PERFORMER: &str = "Неизвестный исполнитель";
const LEGACY_CONTRACT_YEARS: i32 = 5;

/// A task bound to its performer and contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub task_id: String,
    pub performer: Option<Performer>,
    pub contract: Contract,
    pub hours: Decimal,
    pub project_id: Option<String>,
    pub status: Option<String>,
    pub meta: TaskMeta,
}

/// Resolve one task. Shadow performers, companies and contracts created
/// from legacy data are written into `db`.
pub fn resolve_task(
    db: &mut Database,
    input: &TaskInput,
    period: &Period,
    options: &PackageOptions,
) -> Result<ResolvedTask> {
    let performer = match input.assignee_id {
        Some(id) => Some(db.performer(id).ok_or_else(|| {
            ClosingError::not_found(
                "Performer not found",
                json!({ "assignee_id": id, "task_id": input.id }),
            )
        })?),
        None => resolve_performer_from_hints(db, input),
    };

    let contract = resolve_contract(db, input, performer.as_ref(), period, options)?;
    ensure_contract_valid(&contract, input, period)?;

    let hours = round_amount(input.hours);
    if hours <= Decimal::ZERO {
        return Err(ClosingError::validation(
            "Task hours must be positive",
            json!({ "task_id": input.id, "hours": input.hours }),
        ));
    }

    debug!(
        task = %input.id,
        performer = ?performer.as_ref().map(|p| p.id),
        contract = contract.id,
        "task resolved"
    );

    Ok(ResolvedTask {
        task_id: input.id.clone(),
        performer,
        contract,
        hours,
        project_id: input.project_id.clone(),
        status: input.status.clone(),
        meta: input.meta.clone(),
    })
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn tax_note_matches(value: &Option<String>, wanted: &str) -> bool {
    value.as_deref().is_some_and(|v| normalize(v) == wanted)
}

/// Performer by email, then full name, then account id. Falls back to
/// legacy records and finally to the raw hints.
fn resolve_performer_from_hints(db: &mut Database, input: &TaskInput) -> Option<Performer> {
    let meta = &input.meta;
    let email = TaskMeta::hint(&meta.email).map(normalize);
    let name = TaskMeta::hint(&meta.assignee).map(normalize);
    let account = TaskMeta::hint(&meta.account_id).map(normalize);

    if let Some(email) = &email {
        if let Some(found) = db
            .performers
            .iter()
            .find(|p| tax_note_matches(&p.tax_notes.email, email))
        {
            return Some(found.clone());
        }
    }
    if let Some(name) = &name {
        if let Some(found) = db.performers.iter().find(|p| normalize(&p.full_name) == *name) {
            return Some(found.clone());
        }
    }
    if let Some(account) = &account {
        if let Some(found) = db
            .performers
            .iter()
            .find(|p| tax_note_matches(&p.tax_notes.account_id, account))
        {
            return Some(found.clone());
        }
    }

    materialize_performer(
        db,
        TaskMeta::hint(&meta.assignee),
        TaskMeta::hint(&meta.email),
        TaskMeta::hint(&meta.account_id),
        TaskMeta::hint(&meta.legacy_individual_id),
        input.performer_type,
    )
}

fn find_legacy_individual<'a>(
    db: &'a Database,
    legacy_id: Option<&str>,
    email: Option<&str>,
    account: Option<&str>,
    name: Option<&str>,
) -> Option<&'a LegacyIndividual> {
    let by_id = legacy_id.and_then(|id| db.legacy_individual(id));
    let by_email = || {
        let email = normalize(email?);
        db.legacy_individuals
            .iter()
            .find(|l| l.email.as_deref().is_some_and(|e| normalize(e) == email))
    };
    let by_account = || {
        let account = normalize(account?);
        db.legacy_individuals
            .iter()
            .find(|l| l.external_id.as_deref().is_some_and(|e| normalize(e) == account))
    };
    let by_name = || {
        let name = normalize(name?);
        db.legacy_individuals
            .iter()
            .rev()
            .find(|l| normalize(&l.name) == name)
    };
    by_id.or_else(by_email).or_else(by_account).or_else(by_name)
}

/// Create a shadow performer from a legacy individual or from hints.
/// Nothing is created when there is neither.
fn materialize_performer(
    db: &mut Database,
    name: Option<&str>,
    email: Option<&str>,
    account: Option<&str>,
    legacy_id: Option<&str>,
    performer_type: Option<PerformerType>,
) -> Option<Performer> {
    let legacy = find_legacy_individual(db, legacy_id, email, account, name).cloned();
    if legacy.is_none() && name.is_none() && email.is_none() && account.is_none() {
        return None;
    }

    let full_name = match &legacy {
        Some(legacy) => legacy.name.clone(),
        None => name.or(email).unwrap_or(UNKNOWN_PERFORMER).to_string(),
    };
    let performer = Performer {
        id: 0,
        full_name,
        performer_type: performer_type.unwrap_or(PerformerType::Gph),
        inn: legacy.as_ref().and_then(|l| l.inn.clone()),
        tax_notes: TaxNotes {
            email: email.map(str::to_string),
            account_id: account.map(str::to_string),
            ..TaxNotes::default()
        },
        source: Some(if legacy.is_some() { "legacy" } else { "hint" }.to_string()),
    };
    let id = db.insert_performer(performer);
    debug!(performer = id, "shadow performer created");
    db.performer(id)
}

fn resolve_contract(
    db: &mut Database,
    input: &TaskInput,
    performer: Option<&Performer>,
    period: &Period,
    options: &PackageOptions,
) -> Result<Contract> {
    if let Some(id) = input.contract_id {
        return db.contract(id).cloned().ok_or_else(|| {
            ClosingError::no_contract(
                "Contract not found",
                json!({ "contract_id": id, "task_id": input.id }),
            )
        });
    }

    let filter = ContractFilter {
        performer_id: performer.map(|p| p.id),
        company_inn: input.company_inn.clone(),
    };
    let candidates = db.active_contracts(period, &filter);
    let mut candidates = narrow_by_hints(db, candidates, &input.meta);

    if candidates.is_empty() {
        if let Some(legacy_id) = TaskMeta::hint(&input.meta.legacy_contract_id) {
            if let Some(contract) =
                migrate_legacy_contract(db, legacy_id, performer, input.company_inn.as_deref())
            {
                return Ok(contract);
            }
        }
        return Err(ClosingError::no_contract(
            "No contract matches the task",
            json!({ "task_id": input.id }),
        ));
    }
    if candidates.len() > 1 && !options.autopick_contract {
        return Err(ClosingError::no_contract(
            "Several contracts match the task, pick one",
            json!({
                "task_id": input.id,
                "contract_ids": candidates.iter().map(|c| c.id).collect::<Vec<_>>(),
            }),
        ));
    }

    let performer_id = performer.map(|p| p.id);
    let position = candidates
        .iter()
        .position(|c| c.performer_id.is_some() && c.performer_id == performer_id)
        .unwrap_or(0);
    Ok(candidates.swap_remove(position))
}

/// Keep only candidates whose performer matches each hint; a hint that
/// would remove every candidate is ignored.
fn narrow_by_hints(db: &Database, candidates: Vec<Contract>, meta: &TaskMeta) -> Vec<Contract> {
    let performer_of = |c: &Contract| c.performer_id.and_then(|id| db.performer(id));
    let mut candidates = candidates;

    let checks: [(Option<String>, fn(&Performer, &str) -> bool); 3] = [
        (TaskMeta::hint(&meta.assignee).map(normalize), |p, v| {
            normalize(&p.full_name) == v
        }),
        (TaskMeta::hint(&meta.email).map(normalize), |p, v| {
            tax_note_matches(&p.tax_notes.email, v)
        }),
        (TaskMeta::hint(&meta.account_id).map(normalize), |p, v| {
            tax_note_matches(&p.tax_notes.account_id, v)
        }),
    ];

    for (hint, matches) in checks {
        let Some(hint) = hint else { continue };
        let filtered: Vec<Contract> = candidates
            .iter()
            .filter(|c| performer_of(*c).is_some_and(|p| matches(&p, &hint)))
            .cloned()
            .collect();
        if !filtered.is_empty() {
            candidates = filtered;
        }
    }
    candidates
}

fn ensure_contract_valid(contract: &Contract, input: &TaskInput, period: &Period) -> Result<()> {
    if contract.status != ContractStatus::Active || contract.valid_to < period.end {
        return Err(ClosingError::ContractExpired {
            message: format!("Contract {} is not valid for the period", contract.number),
            details: json!({
                "contract_id": contract.id,
                "task_id": input.id,
                "valid_to": contract.valid_to,
            }),
        });
    }
    Ok(())
}

/// Company for a legacy client, found by INN or created.
fn company_from_legacy(
    db: &mut Database,
    client_id: Option<&str>,
    inn_hint: Option<&str>,
) -> Option<Company> {
    let legacy = client_id.and_then(|id| db.legacy_client(id)).cloned();
    let inn = legacy
        .as_ref()
        .and_then(|l| l.inn.as_deref())
        .or(inn_hint)
        .and_then(normalize_inn)?;

    if let Some(existing) = db.company_by_inn(&inn) {
        return Some(existing);
    }
    let company = Company {
        id: 0,
        name: legacy
            .as_ref()
            .map(|l| l.name.clone())
            .unwrap_or_else(|| format!("Компания {inn}")),
        inn: Some(inn),
        kpp: legacy.as_ref().and_then(|l| l.kpp.clone()),
        signatory: legacy.as_ref().and_then(|l| l.signatory.clone()),
        is_ip: false,
        default_vat_mode: VatMode::NoVat,
    };
    let id = db.insert_company(company);
    db.company(id).cloned()
}

/// `today` plus `years`, with 29 February falling back to the 28th.
fn add_years(today: NaiveDate, years: i32) -> NaiveDate {
    let year = today.year() + years;
    NaiveDate::from_ymd_opt(year, today.month(), today.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, today.month(), 28))
        .unwrap_or(today)
}

/// First-class contract for a legacy contract id, created on first use.
fn migrate_legacy_contract(
    db: &mut Database,
    legacy_id: &str,
    performer: Option<&Performer>,
    company_inn: Option<&str>,
) -> Option<Contract> {
    let legacy = db.legacy_contract(legacy_id).cloned()?;

    let performer = match performer {
        Some(p) => Some(p.clone()),
        None => legacy.contractor_id.as_deref().and_then(|contractor| {
            let individual = db.legacy_individual(contractor).cloned()?;
            materialize_performer(
                db,
                Some(&individual.name),
                individual.email.as_deref(),
                individual.external_id.as_deref(),
                Some(&individual.id),
                None,
            )
        }),
    };
    let company = company_from_legacy(db, legacy.client_id.as_deref(), company_inn);

    if let Some(existing) = db
        .contracts
        .iter()
        .find(|c| c.meta.legacy_contract_id.as_deref() == Some(legacy.id.as_str()))
    {
        return Some(existing.clone());
    }
    if company.is_none() && performer.is_none() {
        return None;
    }

    let today = Utc::now().date_naive();
    let contract = Contract {
        id: 0,
        number: legacy
            .number
            .clone()
            .unwrap_or_else(|| format!("LEGACY-{}", legacy.id)),
        contract_date: Some(today),
        party_type: if company.is_some() {
            PartyType::Company
        } else {
            PartyType::Individual
        },
        company_id: company.as_ref().map(|c| c.id),
        performer_id: performer.as_ref().map(|p| p.id),
        valid_from: today,
        valid_to: add_years(today, LEGACY_CONTRACT_YEARS),
        vat_mode: VatMode::NoVat,
        rate_type: legacy.rate_type.unwrap_or(RateType::Hour),
        rate_value: legacy.rate,
        currency: legacy.currency.clone().unwrap_or_else(|| "RUB".to_string()),
        act_by_projects: false,
        ip_transfer_mode: IpTransferMode::Embedded,
        status: ContractStatus::Active,
        meta: ContractMeta {
            source: Some("legacy".to_string()),
            legacy_contract_id: Some(legacy.id.clone()),
            ..ContractMeta::default()
        },
    };
    let id = db.insert_contract(contract);
    debug!(contract = id, legacy = %legacy.id, "legacy contract migrated");
    db.contract(id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leap_day_contracts_end_on_the_28th() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(add_years(today, 5), NaiveDate::from_ymd_opt(2029, 2, 28).unwrap());
    }
}
