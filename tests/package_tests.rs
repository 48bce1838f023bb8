use std::fs;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use closing::documents::{list_documents, resolve_document_file};
use closing::money::VatMode;
use closing::package::narrative::{NarrativeError, NarrativeGenerator, NarrativePrompt, NoNarrative};
use closing::package::{
    build_groups, create_package, resolve_task, OutputTarget, PackageOptions, PackageRequest,
    PackageResponse, PackageServices, ProjectGrouping, TaskInput, TaskMeta,
};
use closing::render::OutputFormat;
use closing::store::{
    Company, Contract, ContractMeta, ContractStatus, Database, DocType, Id, IpTransferMode,
    LegacyClient, LegacyContract, LegacyIndividual, PartyType, Performer, PerformerType, Period,
    RateType, Store, TaxNotes, TechAssignment,
};
use closing::templates::{MemoryTemplates, TemplateKind};
use closing::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn performer(name: &str, performer_type: PerformerType, email: Option<&str>) -> Performer {
    Performer {
        id: 0,
        full_name: name.to_string(),
        performer_type,
        inn: Some("500100732259".to_string()),
        tax_notes: TaxNotes {
            email: email.map(str::to_string),
            ..TaxNotes::default()
        },
        source: None,
    }
}

fn contract(number: &str, company_id: Id, performer_id: Id, vat_mode: VatMode, rate: Decimal) -> Contract {
    Contract {
        id: 0,
        number: number.to_string(),
        contract_date: Some(date(2025, 1, 10)),
        party_type: PartyType::Individual,
        company_id: Some(company_id),
        performer_id: Some(performer_id),
        valid_from: date(2025, 1, 1),
        valid_to: date(2025, 12, 31),
        vat_mode,
        rate_type: RateType::Hour,
        rate_value: rate,
        currency: "RUB".to_string(),
        act_by_projects: false,
        ip_transfer_mode: IpTransferMode::Embedded,
        status: ContractStatus::Active,
        meta: ContractMeta::default(),
    }
}

fn company(db: &mut Database) -> Id {
    db.insert_company(Company {
        id: 0,
        name: "ООО Ромашка".to_string(),
        inn: Some("7701234567".to_string()),
        kpp: Some("770101001".to_string()),
        signatory: Some("Иванов Иван Иванович".to_string()),
        is_ip: false,
        default_vat_mode: VatMode::NoVat,
    })
}

/// One company, one performer of `performer_type`, one contract `Д-1`
/// at 1000 RUB per hour.
fn directory_with(performer_type: PerformerType, configure: impl FnOnce(&mut Contract)) -> Database {
    let mut db = Database::default();
    let company_id = company(&mut db);
    let performer_id = db.insert_performer(performer(
        "Петров Пётр Петрович",
        performer_type,
        Some("petrov@example.com"),
    ));
    let mut c = contract("Д-1", company_id, performer_id, VatMode::NoVat, dec!(1000));
    configure(&mut c);
    db.insert_contract(c);
    db
}

fn directory() -> Database {
    directory_with(PerformerType::Gph, |_| {})
}

fn task(id: &str, assignee_id: Option<Id>, hours: Decimal) -> TaskInput {
    TaskInput {
        id: id.to_string(),
        assignee_id,
        hours,
        project_id: None,
        status: Some("done".to_string()),
        contract_id: None,
        company_inn: None,
        performer_type: None,
        meta: TaskMeta::default(),
    }
}

fn request(tasks: Vec<TaskInput>) -> PackageRequest {
    PackageRequest {
        ta_id: None,
        period_start: date(2025, 3, 1),
        period_end: date(2025, 3, 31),
        has_ip: false,
        tasks,
        options: PackageOptions::default(),
    }
}

fn two_tasks() -> Vec<TaskInput> {
    vec![task("PRJ-1", Some(1), dec!(10)), task("PRJ-2", Some(1), dec!(2.5))]
}

fn run_with(
    store: &mut Store,
    request: &PackageRequest,
    templates: &MemoryTemplates,
    narrator: &dyn NarrativeGenerator,
    dir: &Path,
) -> Result<PackageResponse> {
    let services = PackageServices {
        templates,
        narrator,
        output: OutputTarget {
            dir: dir.to_path_buf(),
            format: OutputFormat::Json,
        },
    };
    create_package(store, request, &services, Some("tester"))
}

fn run(store: &mut Store, request: &PackageRequest, dir: &Path) -> Result<PackageResponse> {
    run_with(store, request, &MemoryTemplates::new(), &NoNarrative, dir)
}

#[test]
fn test_single_contract_produces_one_act() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());

    let response = run(&mut store, &request(two_tasks()), out.path()).unwrap();

    assert!(!response.reused);
    assert_eq!(response.package_no, "AUTO-20250301-20250331-1");
    assert_eq!(response.documents.len(), 1);
    assert_eq!(response.documents[0].doc_type, DocType::Avr);
    assert_eq!(response.documents[0].version, 1);
    assert_eq!(response.will_create[0].amount_total, dec!(12500));
    assert_eq!(response.will_create[0].counterparty, "Петров Пётр Петрович");
    assert_eq!(response.will_create[0].group_info.tasks, vec!["PRJ-1", "PRJ-2"]);

    let doc = &store.db().documents[0];
    assert_eq!(doc.hours, Some(dec!(12.5)));
    assert_eq!(doc.rate_hour, Some(dec!(1000)));
    assert_eq!(doc.amount_wo_vat, dec!(12500));
    assert_eq!(doc.vat_amount, dec!(0));
    assert_eq!(doc.pair_id, None);
    assert_eq!(doc.meta.task_items.len(), 2);
    assert!(doc.file_path.as_ref().unwrap().exists());
    assert!(store.db().audit_log.iter().any(|e| e.action == "package.create"));
}

#[test]
fn test_identical_request_reuses_package() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());

    let first = run(&mut store, &request(two_tasks()), out.path()).unwrap();
    let mut reversed = two_tasks();
    reversed.reverse();
    let second = run(&mut store, &request(reversed), out.path()).unwrap();

    assert!(second.reused);
    assert_eq!(second.package_id, first.package_id);
    assert_eq!(second.documents, first.documents);
    assert!(second.warnings.is_empty());
    assert_eq!(store.db().packages.len(), 1);
    assert_eq!(store.db().documents.len(), 1);
    assert!(store.db().audit_log.iter().any(|e| e.action == "package.reuse"));
}

#[test]
fn test_changed_tasks_bump_document_version() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());

    let first = run(&mut store, &request(two_tasks()), out.path()).unwrap();
    let changed = vec![task("PRJ-1", Some(1), dec!(11)), task("PRJ-2", Some(1), dec!(2.5))];
    let second = run(&mut store, &request(changed), out.path()).unwrap();

    assert!(!second.reused);
    assert_eq!(second.package_no, "AUTO-20250301-20250331-2");
    assert_eq!(second.documents[0].version, 2);
    assert_eq!(second.will_create[0].amount_total, dec!(13500));
    assert_eq!(store.db().documents.len(), 2);
    assert_eq!(store.db().tech_assignments.len(), 1);

    // the earlier version stays downloadable
    let (path, name) = resolve_document_file(
        store.db(),
        out.path(),
        first.package_id,
        first.documents[0].id,
    )
    .unwrap();
    assert!(path.exists());
    assert_eq!(name, format!("doc-{}.json", first.documents[0].id));
    assert_eq!(list_documents(store.db(), None)[0].id, second.documents[0].id);
}

#[test]
fn test_vat_contract_adds_invoice_with_rounded_vat() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Company, |c| {
        c.party_type = PartyType::Company;
        c.vat_mode = VatMode::Vat20;
        c.rate_value = dec!(99.995);
    }));

    let response = run(&mut store, &request(vec![task("PRJ-1", Some(1), dec!(1))]), out.path()).unwrap();

    let types: Vec<DocType> = response.documents.iter().map(|d| d.doc_type).collect();
    assert_eq!(types, vec![DocType::Avr, DocType::Invoice]);
    for doc in &store.db().documents {
        assert_eq!(doc.amount_wo_vat, dec!(100.00));
        assert_eq!(doc.vat_amount, dec!(20.00));
        assert_eq!(doc.amount_total, dec!(120.00));
    }
    assert_eq!(response.will_create[0].counterparty, "ООО Ромашка");
    assert_eq!(store.db().documents[1].hours, None);
}

#[test]
fn test_employee_with_separate_ip_gets_paired_documents() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Employee, |c| {
        c.ip_transfer_mode = IpTransferMode::Separate;
    }));
    let mut req = request(two_tasks());
    req.has_ip = true;

    let response = run(&mut store, &req, out.path()).unwrap();

    let types: Vec<DocType> = response.documents.iter().map(|d| d.doc_type).collect();
    assert_eq!(types, vec![DocType::ServiceAssign, DocType::App]);

    let docs = &store.db().documents;
    assert!(docs[0].pair_id.is_some());
    assert_eq!(docs[0].pair_id, docs[1].pair_id);
    for doc in docs {
        assert_eq!(doc.amount_total, dec!(0));
    }
    assert_eq!(docs[0].hours, Some(dec!(12.5)));
    assert_eq!(docs[0].rate_hour, Some(dec!(0)));
    assert_eq!(docs[1].hours, None);
}

#[test]
fn test_contractor_with_separate_ip_pairs_act_and_transfer() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Gph, |c| {
        c.ip_transfer_mode = IpTransferMode::Separate;
    }));
    let mut req = request(two_tasks());
    req.has_ip = true;

    run(&mut store, &req, out.path()).unwrap();

    let docs = &store.db().documents;
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].doc_type, DocType::Avr);
    assert_eq!(docs[1].doc_type, DocType::App);
    assert!(docs[0].pair_id.is_some());
    assert_eq!(docs[0].pair_id, docs[1].pair_id);
    assert_eq!(docs[1].amount_total, dec!(12500));
}

#[test]
fn test_embedded_ip_needs_no_transfer_act() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut req = request(two_tasks());
    req.has_ip = true;

    let response = run(&mut store, &req, out.path()).unwrap();

    assert_eq!(response.documents.len(), 1);
    assert_eq!(store.db().documents[0].pair_id, None);
}

#[test]
fn test_selfemployed_without_receipt_fails_and_is_audited() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Selfemployed, |_| {}));

    let err = run(&mut store, &request(two_tasks()), out.path()).unwrap_err();

    assert_eq!(err.code(), "selfemployed_no_receipt");
    let db = store.db();
    assert!(db.packages.is_empty());
    assert!(db.documents.is_empty());
    assert!(db.tech_assignments.is_empty());
    let last = db.audit_log.last().unwrap();
    assert_eq!(last.action, "package.create");
    assert_eq!(last.error_code.as_deref(), Some("selfemployed_no_receipt"));
}

#[test]
fn test_selfemployed_without_receipt_can_be_allowed_with_warning() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Selfemployed, |_| {}));
    let mut req = request(two_tasks());
    req.options.allow_selfemployed_without_receipt = true;

    let response = run(&mut store, &req, out.path()).unwrap();

    assert_eq!(response.documents.len(), 1);
    assert_eq!(response.warnings.len(), 1);
    assert_eq!(response.warnings[0].kind, "selfemployed_check");
}

#[test]
fn test_selfemployed_with_confirmed_receipt_passes() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Selfemployed, |c| {
        c.meta.npd_receipt_confirmed = Some(true);
    }));

    let response = run(&mut store, &request(two_tasks()), out.path()).unwrap();

    assert!(response.warnings.is_empty());
    assert_eq!(response.documents.len(), 1);
}

#[test]
fn test_project_grouping_modes() {
    let tasks = || {
        let mut a = task("PRJ-1", Some(1), dec!(4));
        a.project_id = Some("A".to_string());
        let mut b = task("PRJ-2", Some(1), dec!(6));
        b.project_id = Some("B".to_string());
        vec![a, b]
    };

    for (grouping, expected) in [
        (ProjectGrouping::Force, 2),
        (ProjectGrouping::Off, 1),
        (ProjectGrouping::Auto, 1),
    ] {
        let out = TempDir::new().unwrap();
        let mut store = Store::in_memory(directory());
        let mut req = request(tasks());
        req.options.include_by_projects = grouping;

        let response = run(&mut store, &req, out.path()).unwrap();
        assert_eq!(response.documents.len(), expected, "grouping {}", grouping.as_str());
    }
}

#[test]
fn test_auto_grouping_follows_contract_flag() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Gph, |c| {
        c.act_by_projects = true;
    }));
    let mut a = task("PRJ-1", Some(1), dec!(4));
    a.project_id = Some("A".to_string());
    let mut b = task("PRJ-2", Some(1), dec!(6));
    b.project_id = Some("B".to_string());

    run(&mut store, &request(vec![a, b]), out.path()).unwrap();

    let projects: Vec<Option<String>> = store
        .db()
        .documents
        .iter()
        .map(|d| d.project_id.clone())
        .collect();
    assert_eq!(projects, vec![Some("A".to_string()), Some("B".to_string())]);
    assert_eq!(store.db().documents[0].amount_total, dec!(4000));
}

#[test]
fn test_missing_explicit_template_is_not_found() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut req = request(two_tasks());
    req.options.templates.insert(DocType::Avr, "nope".to_string());

    let err = run(&mut store, &req, out.path()).unwrap_err();

    assert_eq!(err.code(), "not_found");
    assert!(store.db().documents.is_empty());
}

#[test]
fn test_template_context_is_rendered() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let templates = MemoryTemplates::new().with(
        "act",
        TemplateKind::Act,
        "<p>Акт № ${actNumber}</p><p>${totalAmount}</p><p>${totalAmountWords}</p>\
         <p>${companyName}</p><p>${seoShortName}</p><p>${custom}</p>",
    );
    let mut req = request(two_tasks());
    req.options
        .template_variables
        .insert("custom".to_string(), "Особая отметка".to_string());

    run_with(&mut store, &req, &templates, &NoNarrative, out.path()).unwrap();

    let doc = &store.db().documents[0];
    assert_eq!(doc.template_id.as_deref(), Some("act"));
    let rendered = std::fs::read_to_string(doc.file_path.as_ref().unwrap()).unwrap();
    assert!(rendered.contains("Акт № Д-1-01"));
    assert!(rendered.contains("12 500.00 RUB"));
    assert!(rendered.contains("Двенадцать тысяч пятьсот рублей ноль копеек"));
    assert!(rendered.contains("ООО Ромашка"));
    assert!(rendered.contains("Иванов И.И."));
    assert!(rendered.contains("Особая отметка"));
}

#[test]
fn test_no_active_contract_in_period() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut req = request(two_tasks());
    req.period_start = date(2026, 3, 1);
    req.period_end = date(2026, 3, 31);

    let err = run(&mut store, &req, out.path()).unwrap_err();

    assert_eq!(err.code(), "no_contract_resolved");
}

#[test]
fn test_contract_ending_inside_period_is_expired() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory_with(PerformerType::Gph, |c| {
        c.valid_to = date(2025, 3, 15);
    }));

    let err = run(&mut store, &request(two_tasks()), out.path()).unwrap_err();

    assert_eq!(err.code(), "contract_expired");
}

#[test]
fn test_several_contracts_need_autopick() {
    let out = TempDir::new().unwrap();
    let mut db = directory();
    db.insert_contract(contract("Д-2", 1, 1, VatMode::NoVat, dec!(2000)));
    let mut store = Store::in_memory(db);

    let mut req = request(two_tasks());
    req.options.autopick_contract = false;
    let err = run(&mut store, &req, out.path()).unwrap_err();
    assert_eq!(err.code(), "no_contract_resolved");
    assert_eq!(err.details()["contract_ids"], serde_json::json!([1, 2]));

    let response = run(&mut store, &request(two_tasks()), out.path()).unwrap();
    assert_eq!(response.documents.len(), 1);
}

#[test]
fn test_email_hint_resolves_performer() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut t = task("PRJ-1", None, dec!(3));
    t.meta.email = Some(" PETROV@example.com ".to_string());

    let response = run(&mut store, &request(vec![t]), out.path()).unwrap();

    assert_eq!(response.documents[0].performer_id, Some(1));
    assert_eq!(store.db().performers.len(), 1);
}

#[test]
fn test_unknown_assignee_hint_creates_shadow_performer() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut t = task("PRJ-1", None, dec!(3));
    t.contract_id = Some(1);
    t.meta.assignee = Some("Сидоров Сидор".to_string());

    let response = run(&mut store, &request(vec![t]), out.path()).unwrap();

    let db = store.db();
    assert_eq!(db.performers.len(), 2);
    let shadow = &db.performers[1];
    assert_eq!(shadow.full_name, "Сидоров Сидор");
    assert_eq!(shadow.performer_type, PerformerType::Gph);
    assert_eq!(shadow.source.as_deref(), Some("hint"));
    assert_eq!(response.documents[0].performer_id, Some(shadow.id));
}

#[test]
fn test_legacy_contract_is_migrated_on_first_use() {
    let out = TempDir::new().unwrap();
    let mut db = Database::default();
    db.legacy_clients.push(LegacyClient {
        id: "c1".to_string(),
        name: "ООО Легаси".to_string(),
        inn: Some("7800000000".to_string()),
        kpp: None,
        signatory: None,
    });
    db.legacy_individuals.push(LegacyIndividual {
        id: "i1".to_string(),
        name: "Смирнов Семён".to_string(),
        email: Some("smirnov@example.com".to_string()),
        external_id: None,
        inn: None,
    });
    db.legacy_contracts.push(LegacyContract {
        id: "lc1".to_string(),
        number: None,
        client_id: Some("c1".to_string()),
        contractor_id: Some("i1".to_string()),
        rate: dec!(500),
        rate_type: None,
        currency: None,
        created_at: None,
    });
    let mut store = Store::in_memory(db);
    let mut t = task("OLD-1", None, dec!(2));
    t.meta.legacy_contract_id = Some("lc1".to_string());

    let response = run(&mut store, &request(vec![t]), out.path()).unwrap();

    let db = store.db();
    assert_eq!(db.contracts.len(), 1);
    let migrated = &db.contracts[0];
    assert_eq!(migrated.number, "LEGACY-lc1");
    assert_eq!(migrated.meta.source.as_deref(), Some("legacy"));
    assert_eq!(migrated.vat_mode, VatMode::NoVat);
    assert_eq!(db.performers[0].source.as_deref(), Some("legacy"));
    assert_eq!(db.companies[0].name, "ООО Легаси");
    assert_eq!(response.will_create[0].counterparty, "ООО Легаси");
    assert_eq!(response.will_create[0].amount_total, dec!(1000));
}

#[test]
fn test_timesheets_follow_hour_documents() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut req = request(two_tasks());
    req.options.include_timesheets = true;

    run(&mut store, &req, out.path()).unwrap();

    let timesheets = &store.db().timesheets;
    assert_eq!(timesheets.len(), 1);
    assert_eq!(timesheets[0].document_id, store.db().documents[0].id);
    assert_eq!(timesheets[0].rows.len(), 2);
    assert_eq!(timesheets[0].rows[1].hours, dec!(2.5));
}

struct CannedNarrator(std::result::Result<&'static str, ()>);

impl NarrativeGenerator for CannedNarrator {
    fn enabled(&self) -> bool {
        true
    }

    fn generate(&self, prompt: &NarrativePrompt) -> std::result::Result<String, NarrativeError> {
        assert!(prompt.user.contains("PRJ-1"));
        self.0
            .map(str::to_string)
            .map_err(|_| NarrativeError::Request("offline".to_string()))
    }
}

#[test]
fn test_narrative_paragraphs_come_from_generator() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut t = task("PRJ-1", Some(1), dec!(3));
    t.meta.summary = Some("доработка отчёта".to_string());
    let mut req = request(vec![t]);
    req.options.narrative.enabled = true;

    let narrator = CannedNarrator(Ok("1. Работы выполнены.\n\n2. Всё сдано."));
    run_with(&mut store, &req, &MemoryTemplates::new(), &narrator, out.path()).unwrap();

    let meta = &store.db().documents[0].meta;
    assert!(meta.narrative_enabled);
    assert_eq!(meta.summary_preview, vec!["Работы выполнены.", "Всё сдано."]);
}

#[test]
fn test_narrative_failure_falls_back_to_task_summaries() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let mut t = task("PRJ-1", Some(1), dec!(3));
    t.meta.summary = Some("доработка отчёта".to_string());
    let mut req = request(vec![t]);
    req.options.narrative.enabled = true;

    let narrator = CannedNarrator(Err(()));
    run_with(&mut store, &req, &MemoryTemplates::new(), &narrator, out.path()).unwrap();

    assert_eq!(
        store.db().documents[0].meta.summary_preview,
        vec!["Выполнена задача PRJ-1: Доработка отчёта."]
    );
}

#[test]
fn test_failed_run_leaves_store_untouched() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());
    let tasks = vec![task("PRJ-1", Some(1), dec!(2)), task("PRJ-2", Some(99), dec!(2))];

    let err = run(&mut store, &request(tasks), out.path()).unwrap_err();

    assert_eq!(err.code(), "not_found");
    assert!(store.db().tech_assignments.is_empty());
    assert!(store.db().packages.is_empty());
    assert_eq!(store.db().audit_log.len(), 1);
}

#[test]
fn test_request_validation() {
    let out = TempDir::new().unwrap();
    let mut store = Store::in_memory(directory());

    let err = run(&mut store, &request(Vec::new()), out.path()).unwrap_err();
    assert_eq!(err.code(), "validation_failed");

    let mut reversed = request(two_tasks());
    reversed.period_start = date(2025, 4, 1);
    let err = run(&mut store, &reversed, out.path()).unwrap_err();
    assert_eq!(err.code(), "validation_failed");

    let err = run(&mut store, &request(vec![task("PRJ-1", Some(1), dec!(0))]), out.path()).unwrap_err();
    assert_eq!(err.code(), "validation_failed");

    let mut unknown_ta = request(two_tasks());
    unknown_ta.ta_id = Some(42);
    let err = run(&mut store, &unknown_ta, out.path()).unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[test]
fn test_resolution_and_grouping_are_repeatable() {
    let mut db = directory();
    let period = Period::new(date(2025, 3, 1), date(2025, 3, 31));
    let options = PackageOptions::default();
    let input = task("PRJ-1", Some(1), dec!(2));

    let first = resolve_task(&mut db, &input, &period, &options).unwrap();
    let second = resolve_task(&mut db, &input, &period, &options).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.contract, db.contracts[0]);
    assert_eq!(first.performer.as_ref(), db.performers.first());

    let mut warnings = Vec::new();
    let plans = build_groups(&db, vec![first], false, &options, &mut warnings).unwrap();
    let again = build_groups(&db, vec![second], false, &options, &mut warnings).unwrap();
    assert_eq!(plans, again);
}

#[test]
fn test_shared_tech_assignment_number_is_a_unique_violation() {
    let out = TempDir::new().unwrap();
    let mut db = directory();
    for id in [7, 8] {
        db.tech_assignments.push(TechAssignment {
            id,
            number: "ТЗ-3".to_string(),
            period_start: date(2025, 3, 1),
            period_end: date(2025, 3, 31),
            has_ip: false,
            created_at: Utc::now(),
        });
    }
    let mut store = Store::in_memory(db);

    let mut first = request(two_tasks());
    first.ta_id = Some(7);
    assert_eq!(run(&mut store, &first, out.path()).unwrap().package_no, "ТЗ-3-1");

    let mut second = request(two_tasks());
    second.ta_id = Some(8);
    let err = run(&mut store, &second, out.path()).unwrap_err();
    assert_eq!(err.code(), "unique_violation");
    assert_eq!(err.details()["package_no"], "ТЗ-3-1");
    assert_eq!(store.db().packages.len(), 1);
    assert_eq!(store.db().documents.len(), 1);
}

#[test]
fn test_unwritable_failure_audit_keeps_the_original_error() {
    let out = TempDir::new().unwrap();
    let state = out.path().join("state.json");
    fs::write(&state, serde_json::to_string(&directory()).unwrap()).unwrap();
    let mut store = Store::open(state.clone()).unwrap();
    // The temp file used by every save is now a directory.
    fs::create_dir(out.path().join("state.json.tmp")).unwrap();

    let tasks = vec![task("PRJ-1", Some(99), dec!(2))];
    let err = run(&mut store, &request(tasks), out.path()).unwrap_err();

    assert_eq!(err.code(), "not_found");
    let on_disk = Store::open(state).unwrap();
    assert!(on_disk.db().audit_log.is_empty());
}
