use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use tabled::{settings::Style, Table, Tabled};
use tracing_subscriber::EnvFilter;

use closing::approval::{
    transition_approval, update_assignees, ApprovalAction, Assignee, AssigneeChange,
};
use closing::config::{
    self, import_directory, load_settings, output_dir, state_path, FileTemplates, Settings,
};
use closing::documents::{list_documents, resolve_document_file};
use closing::error::{ClosingError, Result};
use closing::money::format_currency;
use closing::package::narrative::{ChatNarrator, NarrativeGenerator, NarrativeOptions, NoNarrative};
use closing::package::{
    create_package, OutputTarget, PackageOptions, PackageRequest, PackageResponse,
    PackageServices, ProjectGrouping, TaskInput,
};
use closing::store::{DocType, Id, Period, Store};
use closing::templates::TemplateStore;

#[derive(Parser)]
#[command(name = "closing")]
#[command(version, about = "Closing document packages from tracked work", long_about = None)]
struct Cli {
    /// Path to config directory (default: ~/.closing or XDG config)
    #[arg(short = 'C', long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory with a default config and act template
    Init,

    /// Merge companies, performers, contracts and users from a TOML file
    Import {
        /// Directory file with [[companies]], [[performers]], [[contracts]]...
        file: PathBuf,
    },

    /// Generate (or reuse) the closing package for a period
    Package {
        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the period (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,

        /// Tasks file with a [[tasks]] array
        #[arg(long)]
        tasks: PathBuf,

        /// Technical assignment id (default: one per period)
        #[arg(long)]
        ta_id: Option<Id>,

        /// The work transfers intellectual property
        #[arg(long)]
        has_ip: bool,

        /// Create a timesheet for every act and service assignment
        #[arg(long)]
        timesheets: bool,

        /// Monthly norm hours for month-rate contracts
        #[arg(long)]
        norm_hours: Option<Decimal>,

        /// Split documents by project
        #[arg(long, value_enum)]
        by_projects: Option<ProjectGrouping>,

        /// Fail instead of picking one of several matching contracts
        #[arg(long)]
        no_autopick: bool,

        /// Warn instead of failing for self-employed performers without a receipt
        #[arg(long)]
        allow_selfemployed_without_receipt: bool,

        /// Template per document type (can be repeated)
        #[arg(long, value_name = "DOC=ID", value_parser = parse_template_arg)]
        template: Vec<(DocType, String)>,

        /// Extra template variable (can be repeated)
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,

        /// Generate document summaries with the narrative endpoint
        #[arg(long)]
        narrative: bool,

        /// Recorded as the creator of the package
        #[arg(long)]
        actor: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// List generated documents
    Documents {
        /// Only documents of this package
        #[arg(short, long)]
        package: Option<Id>,
    },

    /// Move a document through the approval workflow
    Approve {
        /// Document id
        document: Id,

        /// submit, performer-approve, performer-reject, manager-approve,
        /// manager-reject or finalize
        action: String,

        /// Role of the acting user
        #[arg(long)]
        role: String,

        /// Id of the acting user
        #[arg(long)]
        actor: String,

        /// Comment (required for rejections)
        #[arg(long)]
        note: Option<String>,
    },

    /// Change the performer or manager assignee of a document
    Assign {
        /// Document id
        document: Id,

        /// User id of the new performer assignee
        #[arg(long, conflicts_with = "clear_performer")]
        performer: Option<String>,

        /// User id of the new manager assignee
        #[arg(long, conflicts_with = "clear_manager")]
        manager: Option<String>,

        /// Remove the performer assignee
        #[arg(long)]
        clear_performer: bool,

        /// Remove the manager assignee
        #[arg(long)]
        clear_manager: bool,

        /// Role of the acting user
        #[arg(long)]
        role: String,

        /// Id of the acting user
        #[arg(long)]
        actor: String,
    },

    /// Print the file path of a generated document
    File {
        /// Package id
        package: Id,

        /// Document id
        document: Id,
    },

    /// List configured templates
    Templates,

    /// Show store and configuration summary
    Status,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_template_arg(raw: &str) -> std::result::Result<(DocType, String), String> {
    let (doc_type, id) = parse_key_value(raw)?;
    Ok((doc_type.parse()?, id.trim().to_string()))
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        eprintln!("Code: {}", e.code());
        let details = e.details();
        if !details.is_null() {
            eprintln!("Details: {details}");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let cfg_dir = match cli.config_dir {
        Some(p) => p,
        None => config::config_dir()?,
    };

    let settings = load_settings(&cfg_dir);
    init_logging(settings.as_ref().map_or("warn", |s| s.logging.level.as_str()));

    match cli.command {
        Commands::Init => cmd_init(&cfg_dir),
        command => run_command(&cfg_dir, &settings?, command),
    }
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_command(cfg_dir: &Path, settings: &Settings, command: Commands) -> Result<()> {
    let mut store = Store::open(state_path(cfg_dir))?;
    match command {
        Commands::Init => cmd_init(cfg_dir),
        Commands::Import { file } => cmd_import(&mut store, &file),
        Commands::Package {
            from,
            to,
            tasks,
            ta_id,
            has_ip,
            timesheets,
            norm_hours,
            by_projects,
            no_autopick,
            allow_selfemployed_without_receipt,
            template,
            vars,
            narrative,
            actor,
            json,
        } => {
            let mut options = package_options(settings);
            options.include_timesheets |= timesheets;
            options.norm_hours = norm_hours.or(options.norm_hours);
            if let Some(grouping) = by_projects {
                options.include_by_projects = grouping;
            }
            if no_autopick {
                options.autopick_contract = false;
            }
            options.allow_selfemployed_without_receipt = allow_selfemployed_without_receipt;
            options.templates = template.into_iter().collect();
            options.template_variables = vars.into_iter().collect();
            options.narrative.enabled |= narrative;

            let request = PackageRequest {
                ta_id,
                period_start: from,
                period_end: to,
                has_ip,
                tasks: read_tasks(&tasks)?,
                options,
            };
            cmd_package(cfg_dir, settings, &mut store, &request, actor.as_deref(), json)
        }
        Commands::Documents { package } => cmd_documents(&store, package),
        Commands::Approve {
            document,
            action,
            role,
            actor,
            note,
        } => {
            let action: ApprovalAction = action.parse()?;
            let record =
                transition_approval(&mut store, document, action, &role, &actor, note.as_deref())?;
            println!("Document {}: {}", record.id, record.meta.approval.status);
            Ok(())
        }
        Commands::Assign {
            document,
            performer,
            manager,
            clear_performer,
            clear_manager,
            role,
            actor,
        } => {
            let change = |id: Option<String>, clear: bool| match (id, clear) {
                (Some(id), _) => AssigneeChange::Set(id),
                (None, true) => AssigneeChange::Clear,
                (None, false) => AssigneeChange::Keep,
            };
            let record = update_assignees(
                &mut store,
                document,
                change(performer, clear_performer),
                change(manager, clear_manager),
                &actor,
                &role,
            )?;
            let approval = &record.meta.approval;
            let name = |a: &Option<Assignee>| {
                a.as_ref().map_or("-".to_string(), |a| a.name.clone())
            };
            println!("Document {}: {}", record.id, approval.status);
            println!("  Performer: {}", name(&approval.performer_assignee));
            println!("  Manager:   {}", name(&approval.manager_assignee));
            Ok(())
        }
        Commands::File { package, document } => {
            let (path, _) =
                resolve_document_file(store.db(), &output_dir(settings, cfg_dir), package, document)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Templates => cmd_templates(cfg_dir),
        Commands::Status => cmd_status(cfg_dir, settings, &store),
    }
}

/// Initialize config directory with template files
fn cmd_init(cfg_dir: &Path) -> Result<()> {
    config::init(cfg_dir)?;

    println!("Initialized closing config at: {}", cfg_dir.display());
    println!();
    println!("Next steps:");
    println!(
        "  1. Review the settings:        $EDITOR {}/config.toml",
        cfg_dir.display()
    );
    println!(
        "  2. Adjust the act template:    $EDITOR {}/templates/act.html",
        cfg_dir.display()
    );
    println!("  3. Import your directory:      closing import directory.toml");
    println!();
    println!("Then generate your first package:");
    println!("  closing package --from 2025-03-01 --to 2025-03-31 --tasks tasks.toml");

    Ok(())
}

fn cmd_import(store: &mut Store, file: &Path) -> Result<()> {
    let summary = import_directory(store, file)?;
    println!("Imported from {}:", file.display());
    println!("  Companies:        {}", summary.companies);
    println!("  Performers:       {}", summary.performers);
    println!("  Contracts:        {}", summary.contracts);
    println!("  Users:            {}", summary.users);
    println!("  Tech assignments: {}", summary.tech_assignments);
    println!("  Legacy records:   {}", summary.legacy_records);
    Ok(())
}

#[derive(Deserialize)]
struct TasksFile {
    #[serde(default)]
    tasks: Vec<TaskInput>,
}

fn read_tasks(path: &Path) -> Result<Vec<TaskInput>> {
    let content = fs::read_to_string(path)?;
    let file: TasksFile = toml::from_str(&content).map_err(|e| ClosingError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(file.tasks)
}

fn package_options(settings: &Settings) -> PackageOptions {
    let defaults = &settings.package;
    PackageOptions {
        include_timesheets: defaults.include_timesheets,
        norm_hours: defaults.norm_hours,
        include_by_projects: defaults.include_by_projects,
        autopick_contract: defaults.autopick_contract,
        narrative: NarrativeOptions {
            enabled: settings.narrative.enabled,
            language: settings.narrative.language,
            style: settings.narrative.style,
            extra_notes: None,
        },
        ..PackageOptions::default()
    }
}

/// The chat client when narratives are requested, otherwise nothing.
fn narrator(settings: &Settings, requested: bool) -> Box<dyn NarrativeGenerator> {
    if !requested {
        return Box::new(NoNarrative);
    }
    let narrative = &settings.narrative;
    let api_key = std::env::var(&narrative.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty());
    if api_key.is_none() {
        tracing::warn!(env = %narrative.api_key_env, "narrative requested but no API key set");
    }
    Box::new(ChatNarrator::new(
        &narrative.endpoint,
        &narrative.model,
        api_key,
        Duration::from_secs(narrative.timeout_secs),
    ))
}

#[derive(Tabled)]
struct PackageDocumentRow {
    #[tabled(rename = "ID")]
    id: Id,
    #[tabled(rename = "TYPE")]
    doc_type: String,
    #[tabled(rename = "COUNTERPARTY")]
    counterparty: String,
    #[tabled(rename = "CONTRACT")]
    contract: Id,
    #[tabled(rename = "VERSION")]
    version: u32,
    #[tabled(rename = "TOTAL")]
    total: String,
}

fn cmd_package(
    cfg_dir: &Path,
    settings: &Settings,
    store: &mut Store,
    request: &PackageRequest,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let templates = FileTemplates::load(cfg_dir)?;
    let narrator = narrator(settings, request.options.narrative.enabled);
    let services = PackageServices {
        templates: &templates,
        narrator: narrator.as_ref(),
        output: OutputTarget {
            dir: output_dir(settings, cfg_dir),
            format: settings.output.format,
        },
    };

    let response = create_package(store, request, &services, actor)?;
    if json {
        let out = serde_json::to_string_pretty(&response)
            .map_err(|e| ClosingError::Render(e.to_string()))?;
        println!("{out}");
        return Ok(());
    }
    print_package(&response);
    Ok(())
}

fn print_package(response: &PackageResponse) {
    if response.reused {
        println!(
            "Package {} (id {}) is up to date, nothing regenerated.",
            response.package_no, response.package_id
        );
    } else {
        println!(
            "Created package {} (id {}).",
            response.package_no, response.package_id
        );
    }

    let rows: Vec<PackageDocumentRow> = response
        .documents
        .iter()
        .zip(&response.will_create)
        .map(|(doc, preview)| PackageDocumentRow {
            id: doc.id,
            doc_type: doc.doc_type.to_string(),
            counterparty: preview.counterparty.clone(),
            contract: doc.contract_id,
            version: doc.version,
            total: preview.amount_total.to_string(),
        })
        .collect();
    if !rows.is_empty() {
        println!();
        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{table}");
    }

    for warning in &response.warnings {
        println!("Warning [{}]: {}", warning.kind, warning.message);
    }
}

#[derive(Tabled)]
struct DocumentRow {
    #[tabled(rename = "ID")]
    id: Id,
    #[tabled(rename = "PACKAGE")]
    package: Id,
    #[tabled(rename = "TYPE")]
    doc_type: String,
    #[tabled(rename = "CONTRACT")]
    contract: Id,
    #[tabled(rename = "VERSION")]
    version: u32,
    #[tabled(rename = "TOTAL")]
    total: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

/// List generated documents
fn cmd_documents(store: &Store, package: Option<Id>) -> Result<()> {
    let documents = list_documents(store.db(), package);
    if documents.is_empty() {
        println!("No documents generated yet.");
        return Ok(());
    }

    let rows: Vec<DocumentRow> = documents
        .iter()
        .map(|doc| DocumentRow {
            id: doc.id,
            package: doc.package_id,
            doc_type: doc.doc_type.to_string(),
            contract: doc.contract_id,
            version: doc.version,
            total: format_currency(doc.amount_total, &doc.currency),
            status: doc.meta.approval.status.to_string(),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "NAME")]
    name: String,
}

/// List configured templates
fn cmd_templates(cfg_dir: &Path) -> Result<()> {
    let templates = FileTemplates::load(cfg_dir)?.list_templates();
    if templates.is_empty() {
        println!("No templates configured.");
        println!("Add templates to: {}/templates.toml", cfg_dir.display());
        return Ok(());
    }

    let rows: Vec<TemplateRow> = templates
        .into_iter()
        .map(|t| TemplateRow {
            id: t.id,
            kind: t.kind.as_str().to_string(),
            name: t.name,
        })
        .collect();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

/// Show store and configuration summary
fn cmd_status(cfg_dir: &Path, settings: &Settings, store: &Store) -> Result<()> {
    let db = store.db();

    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    for doc in &db.documents {
        *by_status
            .entry(doc.meta.approval.status.to_string())
            .or_default() += 1;
    }

    println!("Config:     {}", cfg_dir.display());
    println!("Store:      {}", store.path().display());
    println!(
        "Output:     {} ({})",
        output_dir(settings, cfg_dir).display(),
        settings.output.format.extension()
    );
    println!(
        "Narrative:  {}",
        if settings.narrative.enabled { "enabled" } else { "disabled" }
    );
    println!();
    println!("Companies:  {}", db.companies.len());
    println!("Performers: {}", db.performers.len());
    println!("Contracts:  {}", db.contracts.len());
    println!("Users:      {}", db.users.len());
    println!("Packages:   {}", db.packages.len());
    println!("Documents:  {}", db.documents.len());
    for (status, count) in by_status {
        println!("  {status}: {count}");
    }

    if let Some(last) = db.packages.iter().max_by_key(|p| p.id) {
        println!();
        let period = Period::new(last.period_start, last.period_end);
        println!("Last package: {} ({})", last.package_no, period.display_range());
    }
    Ok(())
}
