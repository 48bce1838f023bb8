mod import;
mod settings;
mod templates;

pub use import::{apply_import, import_directory, read_import, DirectoryImport, ImportSummary};
pub use settings::{LoggingSettings, NarrativeSettings, OutputSettings, PackageDefaults, Settings};
pub use templates::{templates_dir, FileTemplates};

use crate::error::{ClosingError, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the config directory path (~/.closing/)
pub fn config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "closing") {
        return Ok(proj_dirs.config_dir().to_path_buf());
    }

    let home = dirs_home().ok_or_else(|| {
        ClosingError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        ))
    })?;

    Ok(home.join(".closing"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Expand ~ in paths
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load config.toml. The directory must have been initialized.
pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    if !config_dir.exists() {
        return Err(ClosingError::ConfigNotFound(config_dir.to_path_buf()));
    }
    let path = config_dir.join("config.toml");
    if !path.exists() {
        return Err(ClosingError::ConfigNotFound(path));
    }
    let content = fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| ClosingError::ConfigParse { path, source: e })
}

pub fn state_path(config_dir: &Path) -> PathBuf {
    config_dir.join("state.json")
}

/// Output directory from the settings; relative paths hang off the
/// config directory.
pub fn output_dir(settings: &Settings, config_dir: &Path) -> PathBuf {
    let dir = expand_path(&settings.output.dir);
    if dir.is_absolute() {
        dir
    } else {
        config_dir.join(dir)
    }
}

/// Create the config directory with a default config, template index and
/// act template.
pub fn init(config_dir: &Path) -> Result<()> {
    if config_dir.exists() {
        return Err(ClosingError::AlreadyInitialized(config_dir.to_path_buf()));
    }

    fs::create_dir_all(config_dir.join("output"))?;
    fs::create_dir_all(templates_dir(config_dir))?;

    fs::write(config_dir.join("config.toml"), CONFIG_TEMPLATE)?;
    fs::write(config_dir.join("templates.toml"), TEMPLATES_INDEX_TEMPLATE)?;
    fs::write(templates_dir(config_dir).join("act.html"), DEFAULT_ACT_TEMPLATE)?;
    Ok(())
}

/// Template content for config.toml
pub const CONFIG_TEMPLATE: &str = r#"[output]
dir = "output"      # relative to this directory
format = "typst"    # typst, pdf (needs the typst CLI) or json

[package]
# norm_hours = 168          # monthly norm for month-rate contracts
autopick_contract = true
include_timesheets = false
include_by_projects = "auto"   # off, auto or force

[narrative]
enabled = false
endpoint = "https://api.openai.com/v1/chat/completions"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
timeout_secs = 20
language = "ru"     # ru or en
style = "neutral"   # neutral, formal, concise or detailed

[logging]
level = "warn"      # RUST_LOG overrides this
"#;

/// Template content for templates.toml
pub const TEMPLATES_INDEX_TEMPLATE: &str = r#"# Document templates. The table name is the template id used by
# `closing package --template AVR=<id>`; bodies live in templates/.
#
# type is one of: act, invoice, timesheet, custom

[act-default]
type = "act"
file = "act.html"
name = "Акт выполненных работ"
"#;

/// Default act body.
pub const DEFAULT_ACT_TEMPLATE: &str = r#"<div class="doc-template doc-template--act">
<h1 style="text-align: center">${docTitle} № ${actNumber}</h1>
<p style="text-align: center">по договору № ${contractNumber} от ${employeeContractDate}</p>
<p>${date}</p>
<p><strong>Заказчик:</strong> ${companyName}, ИНН ${clientInn}</p>
<p><strong>Исполнитель:</strong> ${employeeName}, ИНН ${employeeInn}</p>
<p>Период оказания услуг: ${period}</p>
${bodygpt}
<table class="doc-table-bordered">
<tr><th>Задача</th><th>Часы</th><th>Ставка</th><th>Сумма</th></tr>
<tr><td>${table1}</td></tr>
</table>
<p>Итого часов: ${totalHours}</p>
<p>Сумма без НДС: ${totalAmountWithoutVat}</p>
<p>НДС: ${vatAmount}</p>
<p><strong>Итого: ${totalAmount}</strong> (${totalAmountWords})</p>
<p>Заказчик ________________ ${seoShortName}</p>
<p>Исполнитель ________________ ${contractorseoShortName}</p>
</div>
"#;
