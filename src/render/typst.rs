use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;

use crate::error::{ClosingError, Result};

use super::model::{
    Alignment, Block, LineSpacing, ListMarker, Paragraph, PageSetup, RenderedDocument, Run,
    RunStyle, Table, TableBorder,
};

const HEADING_SIZES_PT: [f64; 6] = [18.0, 16.0, 14.0, 13.0, 12.0, 12.0];
const DEFAULT_TABLE_STROKE_PT: f64 = 0.5;

/// Typst source for a rendered document.
pub fn to_typst(document: &RenderedDocument) -> String {
    let mut out = preamble(&document.page);
    write_blocks(&mut out, &document.blocks, &document.page);
    out
}

fn preamble(page: &PageSetup) -> String {
    let leading = (page.line_spacing * 0.65).max(0.3);
    format!(
        r#"// Generated document

#set page(
  paper: "a4",
  margin: (top: 2cm, bottom: 2cm, left: 3cm, right: 1.5cm),
)

#set text(font: "{font}", size: {size}, lang: "ru")
#set par(leading: {leading:.2}em)
#set block(spacing: {after})

"#,
        font = escape_string(&page.font),
        size = pt(page.size_pt),
        after = pt(page.space_after_pt),
    )
}

fn write_blocks(out: &mut String, blocks: &[Block], page: &PageSetup) {
    for block in blocks {
        match block {
            Block::Paragraph(paragraph) => write_paragraph(out, paragraph, page),
            Block::Table(table) => write_table(out, table, page),
            Block::PageBreak => out.push_str("#pagebreak()\n"),
        }
    }
}

fn write_paragraph(out: &mut String, paragraph: &Paragraph, page: &PageSetup) {
    let mut args = vec!["width: 100%".to_string()];
    if let Some(left) = paragraph.left_indent_pt.filter(|v| *v > 0.0) {
        args.push(format!("inset: (left: {})", pt(left)));
    }
    if let Some(before) = paragraph.space_before_pt {
        args.push(format!("above: {}", pt(before)));
    }
    if let Some(after) = paragraph.space_after_pt {
        args.push(format!("below: {}", pt(after)));
    }

    let _ = write!(out, "#block({})[", args.join(", "));
    match paragraph.line_spacing {
        Some(LineSpacing::Multiple(multiple)) => {
            let _ = write!(out, "#set par(leading: {:.2}em); ", (multiple * 0.65).max(0.1));
        }
        Some(LineSpacing::Exact(exact)) => {
            let leading = (exact - page.size_pt).max(0.0);
            let _ = write!(out, "#set par(leading: {}); ", pt(leading));
        }
        None => {}
    }
    if paragraph.alignment == Alignment::Justify {
        out.push_str("#set par(justify: true); ");
    }

    let align = match paragraph.alignment {
        Alignment::Left | Alignment::Justify => "left",
        Alignment::Center => "center",
        Alignment::Right => "right",
    };
    let _ = write!(out, "#align({align})[");

    let first_line = paragraph
        .first_line_indent_pt
        .unwrap_or(page.first_line_indent_pt);
    if first_line > 0.0 && paragraph.list.is_none() && paragraph.heading.is_none() {
        let _ = write!(out, "#h({})", pt(first_line));
    }
    match paragraph.list {
        Some(ListMarker::Bullet) => out.push_str("#\"• \""),
        Some(ListMarker::Number(n)) => {
            let _ = write!(out, "#\"{n}. \"");
        }
        None => {}
    }

    let heading_size = paragraph
        .heading
        .and_then(|level| HEADING_SIZES_PT.get(usize::from(level).saturating_sub(1)))
        .copied();
    for run in &paragraph.runs {
        match run {
            Run::Text { text, style } => write_run(out, text, style, heading_size),
            Run::Tab => match paragraph.right_tab_pt {
                Some(_) => out.push_str("#h(1fr)"),
                None => out.push_str("#h(2em)"),
            },
            Run::Break => out.push_str("#linebreak()"),
        }
    }
    out.push_str("]]\n");
}

fn write_run(out: &mut String, text: &str, style: &RunStyle, heading_size: Option<f64>) {
    let mut args = Vec::new();
    if style.bold || heading_size.is_some() {
        args.push("weight: \"bold\"".to_string());
    }
    if style.italic {
        args.push("style: \"italic\"".to_string());
    }
    if let Some(color) = style.color {
        args.push(format!("fill: rgb({}, {}, {})", color.0, color.1, color.2));
    }
    if let Some(size) = style.size_pt.or(heading_size) {
        args.push(format!("size: {}", pt(size)));
    }
    if let Some(font) = &style.font {
        args.push(format!("font: \"{}\"", escape_string(font)));
    }
    args.push(format!("\"{}\"", escape_string(text)));

    let call = format!("text({})", args.join(", "));
    if style.underline {
        let _ = write!(out, "#underline({call})");
    } else {
        let _ = write!(out, "#{call}");
    }
}

fn write_table(out: &mut String, table: &Table, page: &PageSetup) {
    let stroke = match table.border {
        TableBorder::Default => pt(DEFAULT_TABLE_STROKE_PT),
        TableBorder::Hidden => "none".to_string(),
        TableBorder::Solid(width) => pt(width),
    };
    let above = table
        .space_before_pt
        .map(|space| format!("above: {}, ", pt(space)))
        .unwrap_or_default();

    let _ = writeln!(
        out,
        "#block({above}width: 100%)[#table(\n  columns: {},\n  stroke: {stroke},",
        table.columns.max(1)
    );
    for row in &table.rows {
        out.push(' ');
        for cell in row {
            out.push_str(" [");
            let mut inner = String::new();
            let cell_page = PageSetup {
                first_line_indent_pt: 0.0,
                ..page.clone()
            };
            write_blocks(&mut inner, &cell.blocks, &cell_page);
            out.push_str(inner.trim_end());
            out.push_str("],");
        }
        out.push('\n');
    }
    out.push_str(")]\n");
}

fn pt(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded}pt")
}

fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Compile Typst source to PDF with the `typst` CLI.
pub fn compile_pdf(source: &str, output_path: &Path) -> Result<()> {
    let typst_check = Command::new("typst").arg("--version").output();
    if typst_check.is_err() {
        return Err(ClosingError::TypstNotFound);
    }

    let temp_dir = std::env::temp_dir().join("closing");
    std::fs::create_dir_all(&temp_dir)?;

    let source_path = temp_dir.join(format!("{}.typ", uuid::Uuid::new_v4().simple()));
    std::fs::write(&source_path, source)?;

    let output = Command::new("typst")
        .arg("compile")
        .arg("--root")
        .arg(&temp_dir)
        .arg(&source_path)
        .arg(output_path)
        .output();
    let _ = std::fs::remove_file(&source_path);
    let output = output?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ClosingError::Render(stderr.to_string()));
    }

    Ok(())
}
