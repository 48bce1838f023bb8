use rust_decimal::Decimal;
use serde_json::json;
use tracing::warn;

use crate::error::{ClosingError, Result};
use crate::money::{round_amount, round_rate, VatMode};
use crate::store::{
    Contract, CounterpartyKind, Directory, DocType, Id, IpTransferMode, PartyType, Performer,
    PerformerType, RateType,
};

use super::{PackageOptions, PackageWarning, ProjectGrouping, ResolvedTask};

const DEFAULT_NORM_HOURS: Decimal = Decimal::from_parts(168, 0, 0, false, 0);

/// Tasks that end up in the same set of documents, with their totals.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    pub contract: Contract,
    pub performer: Option<Performer>,
    pub performer_type: PerformerType,
    pub project_bucket: Option<String>,
    pub vat_mode: VatMode,
    pub currency: String,
    pub doc_types: Vec<DocType>,
    pub pair_id: Option<String>,
    pub tasks: Vec<ResolvedTask>,
    pub hours: Decimal,
    pub rate_hour: Decimal,
    pub amount_wo_vat: Decimal,
    pub vat_amount: Decimal,
    pub amount_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupKey {
    contract_id: Id,
    performer_id: Option<Id>,
    vat_mode: VatMode,
    currency: String,
    project_bucket: Option<String>,
    doc_types: Vec<DocType>,
}

impl GroupPlan {
    fn key(&self) -> GroupKey {
        GroupKey {
            contract_id: self.contract.id,
            performer_id: self.performer.as_ref().map(|p| p.id),
            vat_mode: self.vat_mode,
            currency: self.currency.clone(),
            project_bucket: self.project_bucket.clone(),
            doc_types: self.doc_types.clone(),
        }
    }

    /// Company name for company contracts, otherwise the performer's name,
    /// otherwise the contract number.
    pub fn counterparty_name(&self, directory: &impl Directory) -> String {
        counterparty_name(directory, &self.contract, self.performer.as_ref())
    }

    pub fn counterparty(&self) -> (CounterpartyKind, Option<Id>) {
        if self.contract.party_type == PartyType::Company {
            if let Some(company_id) = self.contract.company_id {
                return (CounterpartyKind::Company, Some(company_id));
            }
        }
        match &self.performer {
            Some(performer) => (CounterpartyKind::Individual, Some(performer.id)),
            None => match self.contract.party_type {
                PartyType::Company => (CounterpartyKind::Company, None),
                PartyType::Individual => (CounterpartyKind::Individual, None),
            },
        }
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.task_id.clone()).collect()
    }

    /// Recompute every total from the task list.
    fn finalize(&mut self, norm_hours: Option<Decimal>) {
        self.hours = self.tasks.iter().map(|t| t.hours).sum();
        if self.performer_type == PerformerType::Employee {
            self.rate_hour = Decimal::ZERO;
            self.amount_wo_vat = Decimal::ZERO;
            self.vat_amount = Decimal::ZERO;
            self.amount_total = Decimal::ZERO;
            return;
        }
        self.rate_hour = resolve_rate_hour(&self.contract, norm_hours);
        self.amount_wo_vat = round_amount(self.hours * self.rate_hour);
        self.vat_amount = self.vat_mode.vat_on(self.amount_wo_vat);
        self.amount_total = round_amount(self.amount_wo_vat + self.vat_amount);
    }
}

pub(crate) fn counterparty_name(
    directory: &impl Directory,
    contract: &Contract,
    performer: Option<&Performer>,
) -> String {
    if contract.party_type == PartyType::Company {
        if let Some(company) = contract
            .company_id
            .and_then(|id| directory.company_by_id(id))
        {
            return company.name;
        }
    }
    let performer = performer
        .cloned()
        .or_else(|| contract.performer_id.and_then(|id| directory.performer(id)));
    match performer {
        Some(performer) => performer.full_name,
        None => contract.number.clone(),
    }
}

/// Hourly rate of a contract. Monthly rates are spread over the norm
/// hours: the option, then the contract's own norm, then 168.
pub fn resolve_rate_hour(contract: &Contract, norm_hours: Option<Decimal>) -> Decimal {
    let rate = contract.rate_value;
    if contract.rate_type == RateType::Hour || rate.is_zero() {
        return round_rate(rate);
    }
    let norm = norm_hours
        .or(contract.meta.norm_hours)
        .filter(|n| *n > Decimal::ZERO)
        .unwrap_or(DEFAULT_NORM_HOURS);
    round_rate(rate / norm)
}

fn detect_performer_type(
    task: &ResolvedTask,
    contract_performer: Option<&Performer>,
) -> PerformerType {
    if let Some(performer) = &task.performer {
        return performer.performer_type;
    }
    if let Some(performer) = contract_performer {
        return performer.performer_type;
    }
    match task.contract.party_type {
        PartyType::Company => PerformerType::Company,
        PartyType::Individual => PerformerType::Gph,
    }
}

fn project_bucket(task: &ResolvedTask, grouping: ProjectGrouping) -> Option<String> {
    match grouping {
        ProjectGrouping::Off => None,
        ProjectGrouping::Force => task.project_id.clone(),
        ProjectGrouping::Auto if task.contract.act_by_projects => task.project_id.clone(),
        ProjectGrouping::Auto => None,
    }
}

/// Document types a performer type needs, and whether they form a pair.
pub(crate) fn doc_types_for(
    performer_type: PerformerType,
    contract: &Contract,
    has_ip: bool,
) -> (Vec<DocType>, bool) {
    let separate_ip = has_ip && contract.ip_transfer_mode == IpTransferMode::Separate;
    let mut doc_types = Vec::new();
    if performer_type == PerformerType::Employee {
        doc_types.push(DocType::ServiceAssign);
        if separate_ip {
            doc_types.push(DocType::App);
        }
    } else {
        doc_types.push(DocType::Avr);
        if separate_ip {
            doc_types.push(DocType::App);
        }
        if contract.vat_mode.requires_invoice() {
            doc_types.push(DocType::Invoice);
        }
    }
    (doc_types, separate_ip)
}

/// Partition resolved tasks into plans, in order of first appearance,
/// and compute their totals.
pub fn build_groups(
    directory: &impl Directory,
    tasks: Vec<ResolvedTask>,
    has_ip: bool,
    options: &PackageOptions,
    warnings: &mut Vec<PackageWarning>,
) -> Result<Vec<GroupPlan>> {
    let mut plans: Vec<GroupPlan> = Vec::new();

    for task in tasks {
        let contract_performer = task
            .contract
            .performer_id
            .and_then(|id| directory.performer(id));
        let performer_type = detect_performer_type(&task, contract_performer.as_ref());
        let (doc_types, paired) = doc_types_for(performer_type, &task.contract, has_ip);

        let candidate = GroupPlan {
            contract: task.contract.clone(),
            performer: task.performer.clone().or(contract_performer),
            performer_type,
            project_bucket: project_bucket(&task, options.include_by_projects),
            vat_mode: task.contract.vat_mode,
            currency: task.contract.currency.clone(),
            doc_types,
            pair_id: None,
            tasks: Vec::new(),
            hours: Decimal::ZERO,
            rate_hour: Decimal::ZERO,
            amount_wo_vat: Decimal::ZERO,
            vat_amount: Decimal::ZERO,
            amount_total: Decimal::ZERO,
        };

        let key = candidate.key();
        let plan = match plans.iter().position(|p| p.key() == key) {
            Some(index) => &mut plans[index],
            None => {
                let mut plan = candidate;
                if paired {
                    plan.pair_id = Some(uuid::Uuid::new_v4().simple().to_string());
                }
                plans.push(plan);
                let last = plans.len() - 1;
                &mut plans[last]
            }
        };
        plan.tasks.push(task);
    }

    for plan in &mut plans {
        plan.finalize(options.norm_hours);
        check_selfemployed_receipt(directory, plan, options, warnings)?;
    }
    Ok(plans)
}

fn check_selfemployed_receipt(
    directory: &impl Directory,
    plan: &GroupPlan,
    options: &PackageOptions,
    warnings: &mut Vec<PackageWarning>,
) -> Result<()> {
    if plan.performer_type != PerformerType::Selfemployed || plan.contract.meta.receipt_confirmed() {
        return Ok(());
    }
    let details = json!({ "contract_id": plan.contract.id });
    if !options.allow_selfemployed_without_receipt {
        return Err(ClosingError::SelfemployedNoReceipt {
            message: "Tax receipt for the self-employed performer is not confirmed".to_string(),
            details,
        });
    }
    let counterparty = plan.counterparty_name(directory);
    warn!(contract = plan.contract.id, %counterparty, "self-employed receipt not confirmed");
    warnings.push(PackageWarning {
        kind: "selfemployed_check".to_string(),
        message: format!("Для самозанятого требуется чек НПД ({counterparty})"),
        details,
    });
    Ok(())
}
