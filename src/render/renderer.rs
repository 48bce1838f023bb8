//! Recursive-descent visitor turning the parsed HTML tree into blocks.
//!
//! Run formatting lives on a stack: every inline element pushes one
//! level before visiting its children and pops exactly that level after.
//! Table cells are rendered by a fresh visitor, which is what makes
//! nested tables work.

use std::collections::BTreeSet;

use super::html::{self, Element, Node};
use super::model::{
    Alignment, Block, Cell, LineSpacing, ListMarker, Paragraph, Run, RunStyle, Table, TableBorder,
};
use super::style::{self, StyleMap};

const FLEXLINE_TAB_PT: f64 = 420.0;
const ACT_FIRST_TABLE_SPACE_PT: f64 = 16.0;
const LIST_INDENT_PT: f64 = 18.0;

const ACT_CLASS: &str = "doc-template--act";
const TEMPLATE_CLASSES: &[&str] = &["doc-template", "doc-template-preview"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "table",
];

/// Render markup into blocks.
pub fn render_markup(content: &str) -> Vec<Block> {
    let nodes = html::parse(content);
    Renderer::render_nodes(&nodes)
}

/// Render plain text: one paragraph per non-blank line.
pub fn render_plain(content: &str) -> Vec<Block> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            Block::Paragraph(Paragraph {
                runs: vec![Run::Text {
                    text: line.to_string(),
                    style: RunStyle::default(),
                }],
                ..Paragraph::default()
            })
        })
        .collect()
}

/// True when the content contains at least one tag-like sequence.
pub fn looks_like_markup(content: &str) -> bool {
    content
        .match_indices('<')
        .any(|(index, _)| {
            content[index + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
        })
}

struct Section {
    classes: BTreeSet<String>,
    paragraphs: usize,
    tables: usize,
}

struct ListLevel {
    ordered: bool,
    next: usize,
}

struct Renderer {
    blocks: Vec<Block>,
    current: Option<Paragraph>,
    styles: Vec<RunStyle>,
    sections: Vec<Section>,
    lists: Vec<ListLevel>,
    in_list_item: bool,
}

impl Renderer {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            current: None,
            styles: vec![RunStyle::default()],
            sections: Vec::new(),
            lists: Vec::new(),
            in_list_item: false,
        }
    }

    fn render_nodes(nodes: &[Node]) -> Vec<Block> {
        let mut renderer = Self::new();
        renderer.visit_all(nodes);
        renderer.flush_paragraph();
        renderer.blocks
    }

    fn visit_all(&mut self, nodes: &[Node]) {
        for node in nodes {
            match node {
                Node::Text(text) => self.append_text(text),
                Node::Element(element) => self.visit_element(element),
            }
        }
    }

    fn visit_element(&mut self, element: &Element) {
        let own_classes = element.classes();
        let styles = style::parse_style(element.attr("style"));

        if breaks_page(&styles, "page-break-before", "break-before") {
            self.flush_paragraph();
            self.blocks.push(Block::PageBreak);
        }
        let break_after = breaks_page(&styles, "page-break-after", "break-after");

        match element.tag.as_str() {
            "script" | "style" | "head" | "title" | "hr" | "img" => {}
            "div" => self.visit_div(element, own_classes, styles),
            "p" => self.visit_paragraph(element, &own_classes, styles),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = element.tag[1..].parse::<u8>().ok();
                self.start_paragraph(element, &own_classes, styles, level, None);
                self.visit_all(&element.children);
                self.end_paragraph();
            }
            "ul" | "ol" => {
                self.flush_paragraph();
                self.lists.push(ListLevel {
                    ordered: element.tag == "ol",
                    next: 1,
                });
                self.visit_all(&element.children);
                self.lists.pop();
            }
            "li" => self.visit_list_item(element, &own_classes, styles),
            "strong" | "b" => self.with_run_style(element, |style| style.bold = true),
            "em" | "i" => self.with_run_style(element, |style| style.italic = true),
            "u" | "ins" => self.with_run_style(element, |style| style.underline = true),
            "span" => {
                if own_classes.contains("doc-flexline__tab") {
                    self.ensure_paragraph().runs.push(Run::Tab);
                }
                self.push_run_style(&styles);
                self.visit_all(&element.children);
                self.pop_run_style();
            }
            "br" => self.ensure_paragraph().runs.push(Run::Break),
            "table" => self.visit_table(element, &own_classes),
            _ => self.visit_all(&element.children),
        }

        if break_after {
            self.flush_paragraph();
            self.blocks.push(Block::PageBreak);
        }
    }

    fn visit_div(&mut self, element: &Element, own_classes: BTreeSet<String>, styles: StyleMap) {
        let is_template = TEMPLATE_CLASSES
            .iter()
            .any(|class| own_classes.contains(*class));
        let is_container = is_template || has_block_children(element);

        self.sections.push(Section {
            classes: own_classes.clone(),
            paragraphs: 0,
            tables: 0,
        });
        if is_container {
            self.flush_paragraph();
            self.visit_all(&element.children);
            self.flush_paragraph();
        } else {
            self.start_paragraph(element, &own_classes, styles, None, None);
            self.visit_all(&element.children);
            self.end_paragraph();
        }
        self.sections.pop();
    }

    fn visit_paragraph(&mut self, element: &Element, own_classes: &BTreeSet<String>, styles: StyleMap) {
        // A <p> inside a list item continues the item's paragraph.
        if self.in_list_item && self.current.is_some() {
            if let Some(current) = self.current.as_mut() {
                if !current.runs.is_empty() {
                    current.runs.push(Run::Break);
                }
            }
            self.push_run_style(&styles);
            self.visit_all(&element.children);
            self.pop_run_style();
            return;
        }
        self.start_paragraph(element, own_classes, styles, None, None);
        self.visit_all(&element.children);
        self.end_paragraph();
    }

    fn visit_list_item(&mut self, element: &Element, own_classes: &BTreeSet<String>, styles: StyleMap) {
        let depth = self.lists.len().max(1);
        let marker = match self.lists.last_mut() {
            Some(level) if level.ordered => {
                let number = level.next;
                level.next += 1;
                ListMarker::Number(number)
            }
            _ => ListMarker::Bullet,
        };
        self.start_paragraph(element, own_classes, styles, None, Some(marker));
        if let Some(paragraph) = self.current.as_mut() {
            paragraph
                .left_indent_pt
                .get_or_insert(LIST_INDENT_PT * depth as f64);
            paragraph.first_line_indent_pt.get_or_insert(0.0);
        }

        let outer = std::mem::replace(&mut self.in_list_item, true);
        self.visit_all(&element.children);
        self.in_list_item = outer;
        self.end_paragraph();
    }

    fn visit_table(&mut self, element: &Element, own_classes: &BTreeSet<String>) {
        self.flush_paragraph();

        let classes = self.inherited_classes(own_classes);
        let mut rows = Vec::new();
        collect_rows(element, &mut rows);
        rows.retain(|row: &Vec<Cell>| !row.is_empty());
        if rows.is_empty() {
            return;
        }

        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize_with(columns, Cell::default);
        }

        let mut table = Table {
            border: border_for(&classes),
            space_before_pt: None,
            columns,
            rows,
        };
        for section in self.sections.iter_mut().rev() {
            section.tables += 1;
            if section.classes.contains(ACT_CLASS) && section.tables == 1 {
                table.space_before_pt = Some(ACT_FIRST_TABLE_SPACE_PT);
            }
        }
        self.blocks.push(Block::Table(table));
    }

    fn start_paragraph(
        &mut self,
        element: &Element,
        own_classes: &BTreeSet<String>,
        mut styles: StyleMap,
        heading: Option<u8>,
        list: Option<ListMarker>,
    ) {
        self.flush_paragraph();

        let classes = self.inherited_classes(own_classes);
        style::apply_classes(&mut styles, &classes);
        for section in self.sections.iter_mut().rev() {
            section.paragraphs += 1;
            if section.classes.contains(ACT_CLASS) {
                style::apply_act_paragraph_rules(&mut styles, section.paragraphs);
            }
        }

        let mut paragraph = Paragraph {
            heading,
            list,
            ..Paragraph::default()
        };
        let alignment = styles
            .get("text-align")
            .cloned()
            .or_else(|| element.attr("align").map(str::to_lowercase));
        if let Some(alignment) = alignment {
            paragraph.alignment = parse_alignment(&alignment);
        }
        paragraph.left_indent_pt = styles
            .get("margin-left")
            .or_else(|| styles.get("padding-left"))
            .and_then(|value| style::length_to_pt(value));
        paragraph.first_line_indent_pt = styles
            .get("text-indent")
            .and_then(|value| style::length_to_pt(value));
        paragraph.space_before_pt = styles
            .get("margin-top")
            .and_then(|value| style::length_to_pt(value));
        paragraph.space_after_pt = styles
            .get("margin-bottom")
            .and_then(|value| style::length_to_pt(value));
        paragraph.line_spacing = styles.get("line-height").and_then(|value| parse_line_height(value));

        if classes.contains("doc-flexline") {
            paragraph.left_indent_pt = Some(0.0);
            paragraph.first_line_indent_pt = Some(0.0);
            paragraph.right_tab_pt = Some(FLEXLINE_TAB_PT);
        }

        self.current = Some(paragraph);
        self.push_run_style(&styles);
    }

    fn end_paragraph(&mut self) {
        self.pop_run_style();
        self.flush_paragraph();
    }

    fn ensure_paragraph(&mut self) -> &mut Paragraph {
        self.current.get_or_insert_with(Paragraph::default)
    }

    fn flush_paragraph(&mut self) {
        if let Some(mut paragraph) = self.current.take() {
            if let Some(Run::Text { text, .. }) = paragraph.runs.last_mut() {
                let trimmed = text.trim_end_matches(' ').len();
                text.truncate(trimmed);
            }
            paragraph
                .runs
                .retain(|run| !matches!(run, Run::Text { text, .. } if text.is_empty()));
            self.blocks.push(Block::Paragraph(paragraph));
        }
    }

    fn append_text(&mut self, raw: &str) {
        let collapsed = collapse_whitespace(raw);
        if self.current.is_none() && collapsed.trim().is_empty() {
            return;
        }
        let style = self.current_style().clone();
        let paragraph = self.ensure_paragraph();

        let at_line_start = match paragraph.runs.last() {
            None | Some(Run::Break) => true,
            Some(Run::Text { text, .. }) => text.ends_with(' '),
            Some(Run::Tab) => false,
        };
        let text = if at_line_start {
            collapsed.trim_start_matches(' ').to_string()
        } else {
            collapsed
        };
        if text.is_empty() {
            return;
        }

        if let Some(Run::Text {
            text: previous,
            style: previous_style,
        }) = paragraph.runs.last_mut()
        {
            if *previous_style == style {
                previous.push_str(&text);
                return;
            }
        }
        paragraph.runs.push(Run::Text { text, style });
    }

    fn current_style(&self) -> &RunStyle {
        // The base level is never popped.
        &self.styles[self.styles.len() - 1]
    }

    fn with_run_style(&mut self, element: &Element, apply: impl FnOnce(&mut RunStyle)) {
        let mut next = self.current_style().clone();
        apply(&mut next);
        self.styles.push(next);
        self.visit_all(&element.children);
        self.pop_run_style();
    }

    fn push_run_style(&mut self, styles: &StyleMap) {
        let mut next = self.current_style().clone();
        if let Some(weight) = styles.get("font-weight") {
            if matches!(weight.as_str(), "bold" | "bolder" | "700" | "800" | "900") {
                next.bold = true;
            }
        }
        if styles.get("font-style").is_some_and(|value| value == "italic") {
            next.italic = true;
        }
        if styles
            .get("text-decoration")
            .is_some_and(|value| value.contains("underline"))
        {
            next.underline = true;
        }
        if let Some(color) = styles.get("color").and_then(|value| style::parse_color(value)) {
            next.color = Some(color);
        }
        if let Some(size) = styles.get("font-size").and_then(|value| style::length_to_pt(value)) {
            next.size_pt = Some(size);
        }
        if let Some(font) = styles.get("font-family").and_then(|value| style::font_family(value)) {
            next.font = Some(font);
        }
        self.styles.push(next);
    }

    fn pop_run_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn inherited_classes(&self, own: &BTreeSet<String>) -> BTreeSet<String> {
        let mut classes = own.clone();
        for section in &self.sections {
            classes.extend(section.classes.iter().cloned());
        }
        classes
    }
}

fn collect_rows(element: &Element, rows: &mut Vec<Vec<Cell>>) {
    for child in &element.children {
        let Node::Element(child) = child else {
            continue;
        };
        match child.tag.as_str() {
            "tr" => rows.push(row_cells(child)),
            "td" | "th" => rows.push(vec![render_cell(child)]),
            "table" => {}
            _ => collect_rows(child, rows),
        }
    }
}

fn row_cells(row: &Element) -> Vec<Cell> {
    row.children
        .iter()
        .filter_map(|child| match child {
            Node::Element(cell) if matches!(cell.tag.as_str(), "td" | "th") => Some(render_cell(cell)),
            _ => None,
        })
        .collect()
}

fn render_cell(cell: &Element) -> Cell {
    let header = cell.tag == "th";
    let mut blocks = Renderer::render_nodes(&cell.children);

    let mut styles = style::parse_style(cell.attr("style"));
    style::apply_classes(&mut styles, &cell.classes());
    let alignment = styles
        .get("text-align")
        .cloned()
        .or_else(|| cell.attr("align").map(str::to_lowercase))
        .map(|value| parse_alignment(&value));

    for block in &mut blocks {
        if let Block::Paragraph(paragraph) = block {
            if let Some(alignment) = alignment {
                if paragraph.alignment == Alignment::Left {
                    paragraph.alignment = alignment;
                }
            }
        }
    }
    if header {
        embolden(&mut blocks);
    }
    Cell { header, blocks }
}

fn embolden(blocks: &mut [Block]) {
    for block in blocks {
        match block {
            Block::Paragraph(paragraph) => {
                for run in &mut paragraph.runs {
                    if let Run::Text { style, .. } = run {
                        style.bold = true;
                    }
                }
            }
            Block::Table(table) => {
                for cell in table.rows.iter_mut().flatten() {
                    embolden(&mut cell.blocks);
                }
            }
            Block::PageBreak => {}
        }
    }
}

fn border_for(classes: &BTreeSet<String>) -> TableBorder {
    let has = |name: &str| classes.contains(name);
    if has("doc-table-transparent") || has("doc-table-plain") {
        TableBorder::Hidden
    } else if has("doc-table-signature") {
        TableBorder::Solid(1.5)
    } else if has("doc-table-bordered") || has("doc-table-striped") {
        TableBorder::Solid(1.0)
    } else {
        TableBorder::Default
    }
}

fn has_block_children(element: &Element) -> bool {
    element.children.iter().any(|child| {
        matches!(child, Node::Element(el) if BLOCK_TAGS.contains(&el.tag.as_str()))
    })
}

fn parse_alignment(value: &str) -> Alignment {
    match value.trim() {
        "center" => Alignment::Center,
        "right" => Alignment::Right,
        "justify" => Alignment::Justify,
        _ => Alignment::Left,
    }
}

fn parse_line_height(value: &str) -> Option<LineSpacing> {
    let value = value.trim();
    if let Some(percent) = value.strip_suffix('%') {
        return percent
            .trim()
            .parse::<f64>()
            .ok()
            .map(|p| LineSpacing::Multiple(p / 100.0));
    }
    if let Ok(multiple) = value.parse::<f64>() {
        return Some(LineSpacing::Multiple(multiple));
    }
    style::length_to_pt(value).map(LineSpacing::Exact)
}

fn breaks_page(styles: &StyleMap, legacy: &str, modern: &str) -> bool {
    styles.get(legacy).is_some_and(|value| value == "always")
        || styles.get(modern).is_some_and(|value| value == "page")
}

/// Collapse runs of ASCII whitespace into one space. Non-breaking spaces
/// are content and survive.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}
