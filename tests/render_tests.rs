use std::collections::BTreeMap;

use closing::render::model::{Alignment, Block, ListMarker, Paragraph, Run, TableBorder};
use closing::render::{looks_like_markup, render, render_template, to_typst};

fn paragraphs(blocks: &[Block]) -> Vec<&Paragraph> {
    blocks
        .iter()
        .filter_map(|block| match block {
            Block::Paragraph(p) => Some(p),
            _ => None,
        })
        .collect()
}

#[test]
fn test_plain_text_is_one_paragraph_per_line() {
    let doc = render("Первая строка\n\n   \nВторая строка");
    let texts: Vec<String> = paragraphs(&doc.blocks).iter().map(|p| p.text()).collect();
    assert_eq!(texts, vec!["Первая строка", "Вторая строка"]);
}

#[test]
fn test_markup_detection() {
    assert!(looks_like_markup("<p>x</p>"));
    assert!(looks_like_markup("text <br/> more"));
    assert!(!looks_like_markup("a < b and c > d"));
    assert!(!looks_like_markup("plain"));
}

#[test]
fn test_heading_and_inline_runs() {
    let doc = render("<h1>Акт</h1><p>Итого <strong>жирным</strong> конец</p>");
    let paras = paragraphs(&doc.blocks);
    assert_eq!(paras.len(), 2);
    assert_eq!(paras[0].heading, Some(1));
    assert_eq!(paras[0].text(), "Акт");
    assert_eq!(paras[1].text(), "Итого жирным конец");

    let bold: Vec<bool> = paras[1]
        .runs
        .iter()
        .filter_map(|run| match run {
            Run::Text { style, .. } => Some(style.bold),
            _ => None,
        })
        .collect();
    assert_eq!(bold, vec![false, true, false]);
}

#[test]
fn test_whitespace_collapses_but_nbsp_survives() {
    let doc = render("<p>  много \n\t пробелов  </p><p>1&nbsp;000</p>");
    let paras = paragraphs(&doc.blocks);
    assert_eq!(paras[0].text(), "много пробелов");
    assert_eq!(paras[1].text(), "1\u{a0}000");
}

#[test]
fn test_ordered_list_numbers_items() {
    let doc = render("<ol><li>Один</li><li>Два</li></ol><ul><li>Пункт</li></ul>");
    let markers: Vec<Option<ListMarker>> = paragraphs(&doc.blocks).iter().map(|p| p.list).collect();
    assert_eq!(
        markers,
        vec![
            Some(ListMarker::Number(1)),
            Some(ListMarker::Number(2)),
            Some(ListMarker::Bullet)
        ]
    );
}

#[test]
fn test_paragraphs_inside_list_item_continue_it() {
    let doc = render("<ul><li><p>A</p><p>B</p></li></ul>");
    let paras = paragraphs(&doc.blocks);
    assert_eq!(paras.len(), 1);
    assert_eq!(paras[0].text(), "A\nB");
}

#[test]
fn test_page_break_style() {
    let doc = render(r#"<p>До</p><p style="page-break-before: always">После</p>"#);
    assert!(matches!(doc.blocks[1], Block::PageBreak));
    assert_eq!(doc.blocks.len(), 3);
}

#[test]
fn test_page_break_after_paragraph() {
    let doc = render(r#"<p style="page-break-after: always">Раз</p><p>Два</p>"#);
    assert_eq!(doc.blocks.len(), 3);
    assert!(matches!(&doc.blocks[0], Block::Paragraph(p) if p.text() == "Раз"));
    assert!(matches!(doc.blocks[1], Block::PageBreak));

    let doc = render(r#"<div style="break-after: page"><p>Раз</p></div><p>Два</p>"#);
    assert!(matches!(doc.blocks[1], Block::PageBreak));
}

#[test]
fn test_injected_rows_replace_placeholder_row() {
    let template = "<table><tr><th>Задача</th><th>Часы</th></tr><tr><td>${rows}</td></tr></table>";
    let mut ctx = BTreeMap::new();
    ctx.insert(
        "rows".to_string(),
        "<tr><td>PRJ-1</td><td>10.00</td></tr><tr><td>PRJ-2</td><td>2.50</td></tr>".to_string(),
    );
    let doc = render_template(template, &ctx);
    let tables = doc.tables();
    assert_eq!(tables.len(), 1);

    let table = tables[0];
    assert_eq!(table.columns, 2);
    assert_eq!(table.rows.len(), 3);
    assert!(table.rows[0][0].header);
    assert_eq!(table.rows[1][0].text(), "PRJ-1");
    assert_eq!(table.rows[2][1].text(), "2.50");
}

#[test]
fn test_injected_rows_replace_wrapped_placeholder_row() {
    let template =
        "<table><tr><th>Задача</th><th>Часы</th></tr><tr><td><p>${rows}</p></td></tr></table>";
    let mut ctx = BTreeMap::new();
    ctx.insert("rows".to_string(), "<tr><td>PRJ-1</td><td>2.50</td></tr>".to_string());
    let doc = render_template(template, &ctx);

    let table = doc.tables()[0];
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1][0].text(), "PRJ-1");
    assert_eq!(table.rows[1][1].text(), "2.50");
}

#[test]
fn test_act_layout_rules() {
    let doc = render(
        r#"<div class="doc-template doc-template--act"><p>АКТ № 1</p><p>к договору</p><table><tr><td>x</td></tr></table></div>"#,
    );
    let paras = paragraphs(&doc.blocks);
    assert_eq!(paras[0].alignment, Alignment::Center);
    assert!(matches!(&paras[0].runs[0], Run::Text { style, .. } if style.bold && style.size_pt == Some(14.0)));
    assert_eq!(paras[1].alignment, Alignment::Center);

    let table = doc.tables()[0];
    assert_eq!(table.space_before_pt, Some(16.0));
}

#[test]
fn test_table_border_classes() {
    let doc = render(
        r#"<table class="doc-table-transparent"><tr><td>a</td></tr></table><table><tr><td>b</td></tr></table>"#,
    );
    let tables = doc.tables();
    assert_eq!(tables[0].border, TableBorder::Hidden);
    assert_eq!(tables[1].border, TableBorder::Default);
}

#[test]
fn test_cell_alignment_applies_to_paragraphs() {
    let doc = render(r#"<table><tr><td style="text-align: right">12.00</td></tr></table>"#);
    let table = doc.tables()[0];
    match &table.rows[0][0].blocks[0] {
        Block::Paragraph(p) => assert_eq!(p.alignment, Alignment::Right),
        other => panic!("expected paragraph, got {other:?}"),
    }
}

#[test]
fn test_typst_output() {
    let doc = render("<h2>Заголовок</h2><p>Текст \"в кавычках\"</p><table><tr><td>a</td></tr></table>");
    let source = to_typst(&doc);
    assert!(source.contains("#set page("));
    assert!(source.contains(r#"weight: "bold""#));
    assert!(source.contains(r#"Текст \"в кавычках\""#));
    assert!(source.contains("stroke: 0.5pt"));
}

#[test]
fn test_missing_placeholders_render_empty() {
    let ctx = BTreeMap::new();
    let doc = render_template("Акт № ${actNumber} от ${date}", &ctx);
    // plain content keeps its inner spacing
    assert_eq!(paragraphs(&doc.blocks)[0].text(), "Акт №  от");
}
