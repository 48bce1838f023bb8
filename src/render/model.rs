use serde::Serialize;

/// Page defaults every rendered document starts from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSetup {
    pub font: String,
    pub size_pt: f64,
    pub line_spacing: f64,
    pub space_after_pt: f64,
    pub first_line_indent_pt: f64,
}

impl Default for PageSetup {
    fn default() -> Self {
        Self {
            font: "Times New Roman".to_string(),
            size_pt: 12.0,
            line_spacing: 1.2,
            space_after_pt: 6.0,
            first_line_indent_pt: 1.25 * 72.0 / 2.54,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RenderedDocument {
    pub page: PageSetup,
    pub blocks: Vec<Block>,
}

impl RenderedDocument {
    /// All paragraphs in document order, descending into table cells.
    pub fn paragraphs(&self) -> Vec<&Paragraph> {
        let mut out = Vec::new();
        collect_paragraphs(&self.blocks, &mut out);
        out
    }

    pub fn tables(&self) -> Vec<&Table> {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                Block::Table(table) => Some(table),
                _ => None,
            })
            .collect()
    }
}

fn collect_paragraphs<'a>(blocks: &'a [Block], out: &mut Vec<&'a Paragraph>) {
    for block in blocks {
        match block {
            Block::Paragraph(paragraph) => out.push(paragraph),
            Block::Table(table) => {
                for cell in table.rows.iter().flatten() {
                    collect_paragraphs(&cell.blocks, out);
                }
            }
            Block::PageBreak => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Paragraph(Paragraph),
    Table(Table),
    PageBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSpacing {
    Multiple(f64),
    Exact(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMarker {
    Bullet,
    Number(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Paragraph {
    pub alignment: Alignment,
    pub heading: Option<u8>,
    pub list: Option<ListMarker>,
    pub left_indent_pt: Option<f64>,
    pub first_line_indent_pt: Option<f64>,
    pub space_before_pt: Option<f64>,
    pub space_after_pt: Option<f64>,
    pub line_spacing: Option<LineSpacing>,
    /// Right-aligned tab stop used by flex lines.
    pub right_tab_pt: Option<f64>,
    pub runs: Vec<Run>,
}

impl Paragraph {
    /// Concatenated text of all runs; tabs and breaks become `\t` and `\n`.
    pub fn text(&self) -> String {
        self.runs
            .iter()
            .map(|run| match run {
                Run::Text { text, .. } => text.as_str(),
                Run::Tab => "\t",
                Run::Break => "\n",
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Run {
    Text { text: String, style: RunStyle },
    Tab,
    Break,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RunStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: Option<Rgb>,
    pub size_pt: Option<f64>,
    pub font: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableBorder {
    #[default]
    Default,
    Hidden,
    Solid(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Table {
    pub border: TableBorder,
    pub space_before_pt: Option<f64>,
    pub columns: usize,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Cell {
    pub header: bool,
    pub blocks: Vec<Block>,
}

impl Cell {
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                Block::Paragraph(paragraph) => Some(paragraph.text()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
