//! Placeholder values handed to a document template.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::money::{amount_to_words, format_currency, format_hours, format_number_plain, round_amount};
use crate::render::html::escape;
use crate::store::{Database, Directory, DocumentRecord, PartyType, Period, TaskItem};

use super::GroupPlan;

const MONTHS_GENITIVE: [&str; 12] = [
    "января", "февраля", "марта", "апреля", "мая", "июня", "июля", "августа", "сентября",
    "октября", "ноября", "декабря",
];

/// `«05» марта 2025`
pub fn format_russian_date(date: NaiveDate) -> String {
    let month = MONTHS_GENITIVE[date.month0() as usize];
    format!("«{:02}» {} {}", date.day(), month, date.year())
}

/// `Иванов Иван Иванович` → `Иванов И.И.`
pub fn short_name(full_name: &str) -> String {
    let cleaned = full_name.replace('\u{a0}', " ").replace('.', " ");
    let mut parts = cleaned.split_whitespace();
    let Some(surname) = parts.next() else {
        return String::new();
    };
    let initials: String = parts
        .filter_map(|part| part.chars().next())
        .flat_map(|first| first.to_uppercase().chain(std::iter::once('.')))
        .collect();
    format!("{surname} {initials}").trim().to_string()
}

/// Whether values go into markup or into a plain-text template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    Markup,
    Plain,
}

impl Flavor {
    fn text(&self, value: &str) -> String {
        match self {
            Self::Markup => escape(value),
            Self::Plain => value.to_string(),
        }
    }
}

/// Task table rows: title, hours, rate and amount per task.
pub(crate) fn task_table_rows(items: &[TaskItem], rate: Decimal, currency: &str) -> String {
    let dash = || "—".to_string();
    let mut rows: Vec<[String; 4]> = items
        .iter()
        .map(|item| {
            let key = if item.key.trim().is_empty() { item.id.trim() } else { item.key.trim() };
            let details: Vec<&str> = [item.summary.trim(), item.description.trim()]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect();
            let title = match (key.is_empty(), details.is_empty()) {
                (false, false) => format!("{key} — {}", details.join("; ")),
                (false, true) => key.to_string(),
                (true, false) => details.join("; "),
                (true, true) => dash(),
            };
            let hours = round_amount(item.hours);
            let amount = round_amount(hours * rate);
            [
                title,
                format_hours(hours),
                if rate.is_zero() { dash() } else { format_currency(rate, currency) },
                if amount.is_zero() { dash() } else { format_currency(amount, currency) },
            ]
        })
        .collect();
    if rows.is_empty() {
        rows.push([dash(), dash(), dash(), dash()]);
    }

    rows.iter()
        .map(|cells| {
            let cells: String = cells
                .iter()
                .map(|cell| format!("<td><p>{}</p></td>", escape(cell)))
                .collect();
            format!("<tr>{cells}</tr>")
        })
        .collect()
}

pub(crate) struct ContextInput<'a> {
    pub plan: &'a GroupPlan,
    pub document: &'a DocumentRecord,
    pub period: &'a Period,
    pub paragraphs: &'a [String],
    pub items: &'a [TaskItem],
    pub variables: &'a BTreeMap<String, String>,
}

/// Build the placeholder map for one document. Caller variables are
/// applied last and inserted verbatim.
pub(crate) fn build_context(
    db: &Database,
    input: &ContextInput<'_>,
    flavor: Flavor,
) -> BTreeMap<String, String> {
    let plan = input.plan;
    let contract = &plan.contract;
    let currency = contract.currency.as_str();
    let mut ctx = BTreeMap::new();
    let put = |ctx: &mut BTreeMap<String, String>, key: &str, value: &str| {
        ctx.insert(key.to_string(), flavor.text(value));
    };

    let paragraphs: Vec<&str> = input
        .paragraphs
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    let (body, numbered, table_rows) = match flavor {
        Flavor::Markup => (
            paragraphs
                .iter()
                .map(|p| format!("<p>{}</p>", escape(p)))
                .collect::<Vec<_>>()
                .join("\n"),
            format!(
                "<ol>{}</ol>",
                paragraphs
                    .iter()
                    .map(|p| format!("<li>{}</li>", escape(p)))
                    .collect::<String>()
            ),
            task_table_rows(input.items, plan.rate_hour, currency),
        ),
        Flavor::Plain => {
            let body = paragraphs.join("\n");
            let numbered = paragraphs
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{}. {p}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            (body.clone(), numbered, body)
        }
    };
    ctx.insert("gptBody".into(), body);
    ctx.insert("bodygpt".into(), numbered);
    ctx.insert("tableTasks".into(), table_rows.clone());
    ctx.insert("table1".into(), table_rows.clone());
    ctx.insert("table2".into(), table_rows);

    let period = input.period;
    put(&mut ctx, "startPeriodDate", &period.start.format("%d.%m.%Y").to_string());
    put(&mut ctx, "endPeriodDate", &period.end.format("%d.%m.%Y").to_string());
    put(&mut ctx, "period", &period.display_range());
    put(&mut ctx, "date", &format_russian_date(period.end));
    put(&mut ctx, "docType", input.document.doc_type.as_str());
    put(&mut ctx, "docTitle", input.document.doc_type.title());

    put(&mut ctx, "totalHours", &format_hours(plan.hours));
    put(&mut ctx, "totalAmount", &format_currency(plan.amount_total, currency));
    put(&mut ctx, "totalAmountWithoutVat", &format_currency(plan.amount_wo_vat, currency));
    put(&mut ctx, "vatAmount", &format_currency(plan.vat_amount, currency));
    put(&mut ctx, "totalAmountNumeric", &format_number_plain(plan.amount_total));
    put(&mut ctx, "totalAmountWords", &amount_to_words(plan.amount_total));
    put(&mut ctx, "vatAmountNumeric", &format_number_plain(plan.vat_amount));
    put(&mut ctx, "vatAmountWords", &amount_to_words(plan.vat_amount));

    let first_meta = plan.tasks.first().map(|t| &t.meta);
    let project_key = first_meta.and_then(|m| m.project_key.clone()).unwrap_or_default();
    let project_name = first_meta.and_then(|m| m.project_name.clone()).unwrap_or_default();
    put(&mut ctx, "projectKey", &project_key);
    put(&mut ctx, "projectName", &project_name);

    let performer_name = plan
        .performer
        .as_ref()
        .map(|p| p.full_name.trim().to_string())
        .unwrap_or_default();
    if let Some(performer) = &plan.performer {
        put(&mut ctx, "employeeName", &performer.full_name);
        put(&mut ctx, "employeeInn", performer.inn.as_deref().unwrap_or_default());
    }

    let company = contract.company_id.and_then(|id| db.company_by_id(id));
    let legacy_contract = contract
        .meta
        .legacy_contract_id
        .as_deref()
        .and_then(|id| db.legacy_contract(id));
    let legacy_client = legacy_contract
        .and_then(|l| l.client_id.as_deref())
        .and_then(|id| db.legacy_client(id));
    let legacy_performer = legacy_contract
        .and_then(|l| l.contractor_id.as_deref())
        .and_then(|id| db.legacy_individual(id));

    if let (Some(company), None) = (&company, legacy_client) {
        put(&mut ctx, "companyName", &company.name);
        put(&mut ctx, "clientInn", company.inn.as_deref().unwrap_or_default());
        put(&mut ctx, "clientKpp", company.kpp.as_deref().unwrap_or_default());
        if let Some(signatory) = &company.signatory {
            put(&mut ctx, "seoFullName", signatory);
            put(&mut ctx, "seoShortName", &short_name(signatory));
        }
    }
    if let Some(client) = legacy_client {
        put(&mut ctx, "companyName", &client.name);
        if let Some(signatory) = &client.signatory {
            put(&mut ctx, "seoFullName", signatory);
            put(&mut ctx, "seoShortName", &short_name(signatory));
        }
        if let Some(inn) = &client.inn {
            put(&mut ctx, "clientInn", inn);
        }
        if let Some(kpp) = &client.kpp {
            put(&mut ctx, "clientKpp", kpp);
        }
    }

    put(&mut ctx, "contractNumber", &contract.number);
    put(&mut ctx, "employeeContractNumber", &contract.number);
    let contract_date = contract
        .contract_date
        .or_else(|| legacy_contract.and_then(|l| l.created_at));
    if let Some(date) = contract_date {
        put(&mut ctx, "employeeContractDate", &date.format("%d.%m.%Y").to_string());
    }

    let performer_name = if performer_name.is_empty() {
        legacy_performer.map(|l| l.name.clone()).unwrap_or_default()
    } else {
        performer_name
    };
    let contractor_company = match (&company, contract.party_type) {
        (Some(company), PartyType::Company) => company.name.clone(),
        _ => performer_name.clone(),
    };
    if !performer_name.is_empty() {
        put(&mut ctx, "contractorSeoFullName", &performer_name);
        put(&mut ctx, "contractorseoShortName", &short_name(&performer_name));
    }
    if !contractor_company.is_empty() {
        put(&mut ctx, "contractorCompanyName", &contractor_company);
    }

    let act_number = if contract.number.is_empty() {
        input.document.id.to_string()
    } else {
        format!("{}-{:02}", contract.number, input.document.version)
    };
    put(&mut ctx, "actNumber", &act_number);

    for (key, value) in input.variables {
        ctx.insert(key.clone(), value.clone());
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_uses_initials() {
        assert_eq!(short_name("Иванов Иван Иванович"), "Иванов И.И.");
        assert_eq!(short_name("Петров"), "Петров");
        assert_eq!(short_name("  "), "");
    }

    #[test]
    fn russian_date_uses_genitive_month() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(format_russian_date(date), "«05» марта 2025");
    }
}
