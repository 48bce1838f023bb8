use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{ClosingError, Result};
use crate::render::html::escape;
use crate::render::{self, looks_like_markup, OutputFormat, RenderedDocument};
use crate::store::{
    next_id, AuditRecord, AuditSink, ClosingPackage, Database, DocType, DocumentMeta,
    DocumentRecord, Id, PackageMeta, Period, Store, TaskItem, TechAssignment, Timesheet,
    TimesheetRow,
};
use crate::templates::{Template, TemplateStore};

use super::context::{build_context, ContextInput, Flavor};
use super::grouping::{build_groups, counterparty_name, GroupPlan};
use super::narrative::{summary_paragraphs, NarrativeGenerator};
use super::resolver::{resolve_task, ResolvedTask};
use super::{
    GeneratedDocument, GroupInfo, PackageRequest, PackageResponse, PackageWarning,
    PreviewDocument,
};

/// Where rendered documents are written.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    pub dir: PathBuf,
    pub format: OutputFormat,
}

/// Collaborators a package run calls into.
pub struct PackageServices<'a> {
    pub templates: &'a dyn TemplateStore,
    pub narrator: &'a dyn NarrativeGenerator,
    pub output: OutputTarget,
}

/// Generate (or reuse) the closing package for a request. The whole run
/// is one transaction; on failure nothing is stored and every file the
/// run wrote is removed.
pub fn create_package(
    store: &mut Store,
    request: &PackageRequest,
    services: &PackageServices<'_>,
    actor_id: Option<&str>,
) -> Result<PackageResponse> {
    let mut written = Vec::new();
    let result = store.transaction(|db| {
        PackageBuilder {
            db,
            request,
            services,
            actor_id,
            written: &mut written,
            warnings: Vec::new(),
        }
        .execute()
    });

    if let Err(err) = &result {
        for path in &written {
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %remove_err, "could not remove file of failed package");
            }
        }
        if let Err(audit_err) =
            store.record_failure(actor_id, "package.create", "closing_package", "", err)
        {
            warn!(error = %audit_err, "could not record failed package run");
        }
    }
    result
}

/// SHA-256 over the resolved task set and the options that shape the
/// output. Keys are serialized in sorted order.
pub fn source_hash(request: &PackageRequest, tasks: &[ResolvedTask]) -> String {
    let mut sorted: Vec<&ResolvedTask> = tasks.iter().collect();
    sorted.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    let tasks: Vec<_> = sorted
        .iter()
        .map(|task| {
            json!({
                "task_id": task.task_id,
                "contract_id": task.contract.id,
                "performer_id": task.performer.as_ref().map(|p| p.id),
                "hours": task.hours.to_string(),
                "project_id": task.project_id,
            })
        })
        .collect();
    let options = &request.options;
    let basis = json!({
        "ta_id": request.ta_id,
        "period_start": request.period_start,
        "period_end": request.period_end,
        "has_ip": request.has_ip,
        "tasks": tasks,
        "options": {
            "include_timesheets": options.include_timesheets,
            "norm_hours": options.norm_hours.map(|n| n.normalize().to_string()),
            "include_by_projects": options.include_by_projects.as_str(),
            "autopick_contract": options.autopick_contract,
        },
    });
    hex::encode(Sha256::digest(basis.to_string().as_bytes()))
}

struct PackageBuilder<'a, 'b> {
    db: &'b mut Database,
    request: &'a PackageRequest,
    services: &'a PackageServices<'a>,
    actor_id: Option<&'a str>,
    written: &'b mut Vec<PathBuf>,
    warnings: Vec<PackageWarning>,
}

impl PackageBuilder<'_, '_> {
    fn execute(mut self) -> Result<PackageResponse> {
        let request = self.request;
        self.validate()?;
        let period = Period::new(request.period_start, request.period_end);
        let ta = self.tech_assignment(&period)?;

        let mut tasks = Vec::with_capacity(request.tasks.len());
        for input in &request.tasks {
            tasks.push(resolve_task(self.db, input, &period, &request.options)?);
        }
        let hash = source_hash(request, &tasks);

        if let Some(package_id) = self.find_package(&ta, &period, &hash) {
            return self.reuse(package_id);
        }

        let package = self.new_package(&ta, &period, &hash, tasks.len())?;
        let plans = build_groups(&*self.db, tasks, ta.has_ip, &request.options, &mut self.warnings)?;

        let mut will_create = Vec::new();
        let mut documents = Vec::new();
        for plan in &plans {
            self.persist_plan(plan, &package, &period, &mut will_create, &mut documents)?;
        }

        self.db.record_audit(AuditRecord {
            actor_id: self.actor_id.map(str::to_string),
            action: "package.create".to_string(),
            entity: "closing_package".to_string(),
            entity_id: package.id.to_string(),
            payload: json!({
                "ta_id": ta.id,
                "documents": documents.len(),
                "warnings": self.warnings.iter().map(|w| w.kind.as_str()).collect::<Vec<_>>(),
            }),
            error_code: None,
        });
        info!(
            package = package.id,
            number = %package.package_no,
            documents = documents.len(),
            "package created"
        );

        Ok(PackageResponse {
            package_id: package.id,
            package_no: package.package_no,
            reused: false,
            will_create,
            warnings: self.warnings,
            documents,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.request.period_start > self.request.period_end {
            return Err(ClosingError::validation(
                "Period start must not be after period end",
                json!({ "period_start": "period_start > period_end" }),
            ));
        }
        if self.request.tasks.is_empty() {
            return Err(ClosingError::validation(
                "No tasks selected for the package",
                json!({ "tasks": "empty" }),
            ));
        }
        Ok(())
    }

    fn tech_assignment(&mut self, period: &Period) -> Result<TechAssignment> {
        if let Some(id) = self.request.ta_id {
            return self.db.tech_assignment(id).cloned().ok_or_else(|| {
                ClosingError::not_found("Tech assignment not found", json!({ "ta_id": id }))
            });
        }

        let number = format!(
            "AUTO-{}-{}",
            period.start.format("%Y%m%d"),
            period.end.format("%Y%m%d")
        );
        let has_ip = self.request.has_ip;
        if let Some(existing) = self
            .db
            .tech_assignments
            .iter_mut()
            .rev()
            .find(|t| t.number == number && t.period_start == period.start && t.period_end == period.end)
        {
            existing.has_ip |= has_ip;
            return Ok(existing.clone());
        }

        let ta = TechAssignment {
            id: next_id(&mut self.db.counters.tech_assignment),
            number,
            period_start: period.start,
            period_end: period.end,
            has_ip,
            created_at: Utc::now(),
        };
        self.db.tech_assignments.push(ta.clone());
        Ok(ta)
    }

    fn find_package(&self, ta: &TechAssignment, period: &Period, hash: &str) -> Option<Id> {
        self.db
            .packages
            .iter()
            .find(|p| {
                p.ta_id == ta.id
                    && p.period_start == period.start
                    && p.period_end == period.end
                    && p.source_hash == hash
            })
            .map(|p| p.id)
    }

    /// Same inputs as an earlier run: touch the package, create nothing.
    fn reuse(self, package_id: Id) -> Result<PackageResponse> {
        let db = self.db;
        let package_no = match db.packages.iter_mut().find(|p| p.id == package_id) {
            Some(package) => {
                package.updated_at = Utc::now();
                package.package_no.clone()
            }
            None => String::new(),
        };

        let mut will_create = Vec::new();
        let mut documents = Vec::new();
        for document in db.package_documents(package_id) {
            will_create.push(preview_of(db, document));
            documents.push(generated_of(document));
        }

        db.record_audit(AuditRecord {
            actor_id: self.actor_id.map(str::to_string),
            action: "package.reuse".to_string(),
            entity: "closing_package".to_string(),
            entity_id: package_id.to_string(),
            payload: json!({ "documents": documents.len() }),
            error_code: None,
        });
        info!(package = package_id, "package reused");

        Ok(PackageResponse {
            package_id,
            package_no,
            reused: true,
            will_create,
            warnings: Vec::new(),
            documents,
        })
    }

    fn new_package(
        &mut self,
        ta: &TechAssignment,
        period: &Period,
        hash: &str,
        task_count: usize,
    ) -> Result<ClosingPackage> {
        let existing = self.db.packages.iter().filter(|p| p.ta_id == ta.id).count();
        let package_no = format!("{}-{}", ta.number, existing + 1);
        // Imported tech assignments may share a number.
        if let Some(taken) = self.db.packages.iter().find(|p| p.package_no == package_no) {
            return Err(ClosingError::UniqueViolation {
                message: format!("Package number {package_no} is already taken"),
                details: json!({
                    "package_no": package_no,
                    "ta_id": ta.id,
                    "existing_package_id": taken.id,
                }),
            });
        }
        let now = Utc::now();
        let package = ClosingPackage {
            id: next_id(&mut self.db.counters.package),
            ta_id: ta.id,
            package_no,
            period_start: period.start,
            period_end: period.end,
            status: "draft".to_string(),
            source_hash: hash.to_string(),
            meta: PackageMeta {
                created_by: self.actor_id.map(str::to_string),
                task_count,
            },
            created_at: now,
            updated_at: now,
        };
        self.db.packages.push(package.clone());
        Ok(package)
    }

    fn persist_plan(
        &mut self,
        plan: &GroupPlan,
        package: &ClosingPackage,
        period: &Period,
        will_create: &mut Vec<PreviewDocument>,
        documents: &mut Vec<GeneratedDocument>,
    ) -> Result<()> {
        let options = &self.request.options;
        let items = task_items(plan);
        let paragraphs = summary_paragraphs(
            &items,
            &options.narrative,
            self.services.narrator,
            &period.display_range(),
        );
        let counterparty = plan.counterparty_name(&*self.db);
        let (counterparty_kind, counterparty_id) = plan.counterparty();

        for &doc_type in &plan.doc_types {
            let template = self.select_template(doc_type)?;
            let carries_amounts = doc_type.carries_amounts();
            let carries_hours = doc_type.carries_hours();
            let first_meta = plan.tasks.first().map(|t| &t.meta);

            let mut document = DocumentRecord {
                id: next_id(&mut self.db.counters.document),
                package_id: package.id,
                ta_id: package.ta_id,
                pair_id: plan.pair_id.clone().filter(|_| doc_type.is_paired()),
                doc_type,
                template_id: template.as_ref().map(|t| t.id.clone()),
                counterparty_kind,
                counterparty_id,
                contract_id: plan.contract.id,
                performer_id: plan.performer.as_ref().map(|p| p.id),
                project_id: plan.project_bucket.clone(),
                vat_mode: plan.vat_mode,
                currency: plan.currency.clone(),
                period_start: period.start,
                period_end: period.end,
                hours: carries_hours.then_some(plan.hours),
                rate_hour: carries_hours.then_some(plan.rate_hour),
                amount_wo_vat: if carries_amounts { plan.amount_wo_vat } else { Decimal::ZERO },
                vat_amount: if carries_amounts { plan.vat_amount } else { Decimal::ZERO },
                amount_total: if carries_amounts { plan.amount_total } else { Decimal::ZERO },
                version: next_version(self.db, package.ta_id, plan, doc_type, period),
                file_path: None,
                meta: DocumentMeta {
                    performer_type: Some(plan.performer_type),
                    tasks: plan.task_ids(),
                    task_items: items.clone(),
                    source_hash: package.source_hash.clone(),
                    project_key: first_meta.and_then(|m| m.project_key.clone()),
                    project_name: first_meta.and_then(|m| m.project_name.clone()),
                    legacy_contract_id: first_meta.and_then(|m| m.legacy_contract_id.clone()),
                    template_id: template.as_ref().map(|t| t.id.clone()),
                    narrative_enabled: options.narrative.enabled,
                    summary_preview: paragraphs.clone(),
                    ..DocumentMeta::default()
                },
                created_at: Utc::now(),
            };

            let rendered = match &template {
                Some(template) => {
                    let flavor = if looks_like_markup(&template.content) {
                        Flavor::Markup
                    } else {
                        Flavor::Plain
                    };
                    let context = build_context(
                        self.db,
                        &ContextInput {
                            plan,
                            document: &document,
                            period,
                            paragraphs: &paragraphs,
                            items: &items,
                            variables: &options.template_variables,
                        },
                        flavor,
                    );
                    render::render_template(&template.content, &context)
                }
                None => fallback_document(doc_type, &paragraphs, period),
            };

            let output = &self.services.output;
            let path = output
                .dir
                .join(format!("doc-{}.{}", document.id, output.format.extension()));
            self.written.push(path.clone());
            render::write_document(&rendered, output.format, &path)?;
            document.file_path = Some(path);

            if options.include_timesheets && carries_hours {
                let timesheet = Timesheet {
                    id: next_id(&mut self.db.counters.timesheet),
                    document_id: document.id,
                    rows: plan
                        .tasks
                        .iter()
                        .map(|task| TimesheetRow {
                            task_id: task.task_id.clone(),
                            hours: task.hours,
                            status: task.status.clone(),
                        })
                        .collect(),
                };
                self.db.timesheets.push(timesheet);
            }

            will_create.push(PreviewDocument {
                doc_type,
                counterparty: counterparty.clone(),
                contract_id: plan.contract.id,
                amount_total: document.amount_total,
                vat_mode: plan.vat_mode,
                group_info: GroupInfo {
                    performer_type: Some(plan.performer_type),
                    project_id: plan.project_bucket.clone(),
                    tasks: plan.task_ids(),
                    pair_id: plan.pair_id.clone(),
                },
            });
            documents.push(generated_of(&document));
            self.db.documents.push(document);
        }
        Ok(())
    }

    /// Explicit mapping, then the shared template id, then the default
    /// template of the type's bucket. An explicit id that does not exist
    /// is an error; a missing default is not.
    fn select_template(&self, doc_type: DocType) -> Result<Option<Template>> {
        let options = &self.request.options;
        let explicit = options
            .templates
            .get(&doc_type)
            .or(options.template_id.as_ref());
        match explicit {
            Some(id) => self.services.templates.template(id).map(Some).ok_or_else(|| {
                ClosingError::not_found(
                    "Template not found",
                    json!({ "template_id": id, "doc_type": doc_type.as_str() }),
                )
            }),
            None => Ok(self.services.templates.default_for(doc_type)),
        }
    }
}

fn next_version(
    db: &Database,
    ta_id: Id,
    plan: &GroupPlan,
    doc_type: DocType,
    period: &Period,
) -> u32 {
    db.documents
        .iter()
        .filter(|d| {
            d.ta_id == ta_id
                && d.contract_id == plan.contract.id
                && d.doc_type == doc_type
                && d.period_start == period.start
                && d.period_end == period.end
                && d.project_id == plan.project_bucket
        })
        .map(|d| d.version)
        .max()
        .unwrap_or(0)
        + 1
}

fn task_items(plan: &GroupPlan) -> Vec<TaskItem> {
    plan.tasks
        .iter()
        .map(|task| {
            let meta = &task.meta;
            let amount = if plan.rate_hour.is_zero() {
                Decimal::ZERO
            } else {
                crate::money::round_amount(task.hours * plan.rate_hour)
            };
            TaskItem {
                id: meta.task_id.clone().unwrap_or_else(|| task.task_id.clone()),
                key: task.task_id.clone(),
                summary: meta.summary.clone().unwrap_or_default(),
                description: meta.description.clone().unwrap_or_default(),
                status: meta
                    .status
                    .clone()
                    .or_else(|| task.status.clone())
                    .unwrap_or_default(),
                hours: task.hours,
                assignee: meta.assignee.clone().unwrap_or_default(),
                project_key: meta.project_key.clone().unwrap_or_default(),
                project_name: meta.project_name.clone().unwrap_or_default(),
                billable: meta.billable.unwrap_or(true),
                force_included: meta.force_included.unwrap_or(false),
                hourly_rate: plan.rate_hour,
                amount,
            }
        })
        .collect()
}

/// Title, summary paragraphs and the period, for types without a template.
fn fallback_document(doc_type: DocType, paragraphs: &[String], period: &Period) -> RenderedDocument {
    let mut markup = format!("<h1>{}</h1>", escape(doc_type.title()));
    for paragraph in paragraphs {
        markup.push_str(&format!("<p>{}</p>", escape(paragraph)));
    }
    markup.push_str(&format!("<p>Период: {}</p>", escape(&period.display_range())));
    render::render(&markup)
}

fn preview_of(db: &Database, document: &DocumentRecord) -> PreviewDocument {
    let counterparty = match db.contract(document.contract_id) {
        Some(contract) => {
            let performer = document
                .performer_id
                .and_then(|id| db.performers.iter().find(|p| p.id == id));
            counterparty_name(db, contract, performer)
        }
        None => document.contract_id.to_string(),
    };
    PreviewDocument {
        doc_type: document.doc_type,
        counterparty,
        contract_id: document.contract_id,
        amount_total: document.amount_total,
        vat_mode: document.vat_mode,
        group_info: GroupInfo {
            performer_type: document.meta.performer_type,
            project_id: document.project_id.clone(),
            tasks: document.meta.tasks.clone(),
            pair_id: document.pair_id.clone(),
        },
    }
}

fn generated_of(document: &DocumentRecord) -> GeneratedDocument {
    GeneratedDocument {
        id: document.id,
        doc_type: document.doc_type,
        contract_id: document.contract_id,
        performer_id: document.performer_id,
        version: document.version,
        file_path: document.file_path.clone(),
    }
}
