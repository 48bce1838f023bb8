//! Template rendering: placeholder substitution, the HTML-subset
//! interpreter and the document writers.

pub mod html;
pub mod model;
mod placeholder;
mod renderer;
pub mod style;
mod typst;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClosingError, Result};

pub use model::RenderedDocument;
pub use placeholder::{placeholders, substitute};
pub use renderer::looks_like_markup;
pub use typst::to_typst;

/// File format a rendered document is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Typst,
    Pdf,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Typst => "typ",
            Self::Pdf => "pdf",
            Self::Json => "json",
        }
    }
}

/// Render already-substituted content. Markup goes through the HTML
/// interpreter, anything else becomes one paragraph per line.
pub fn render(content: &str) -> RenderedDocument {
    let blocks = if looks_like_markup(content) {
        renderer::render_markup(content)
    } else {
        renderer::render_plain(content)
    };
    RenderedDocument {
        blocks,
        ..RenderedDocument::default()
    }
}

/// Substitute `${name}` placeholders, then render.
pub fn render_template(content: &str, context: &BTreeMap<String, String>) -> RenderedDocument {
    render(&substitute(content, context))
}

/// Write a rendered document to `path` in the requested format.
pub fn write_document(document: &RenderedDocument, format: OutputFormat, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match format {
        OutputFormat::Typst => std::fs::write(path, to_typst(document))?,
        OutputFormat::Pdf => typst::compile_pdf(&to_typst(document), path)?,
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(document)
                .map_err(|e| ClosingError::Render(e.to_string()))?;
            std::fs::write(path, json)?;
        }
    }
    Ok(())
}
