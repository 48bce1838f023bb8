//! Inline CSS and class vocabulary understood by the renderer.

use std::collections::{BTreeMap, BTreeSet};

use super::model::Rgb;

pub type StyleMap = BTreeMap<String, String>;

/// Parse a `style="a: b; c: d"` attribute. Keys and values are lowercased.
pub fn parse_style(raw: Option<&str>) -> StyleMap {
    let mut styles = StyleMap::new();
    let Some(raw) = raw else {
        return styles;
    };
    for chunk in raw.split(';') {
        if let Some((key, value)) = chunk.split_once(':') {
            styles.insert(key.trim().to_lowercase(), value.trim().to_lowercase());
        }
    }
    styles
}

fn set_default(styles: &mut StyleMap, key: &str, value: &str) {
    styles
        .entry(key.to_string())
        .or_insert_with(|| value.to_string());
}

/// Translate layout classes into style defaults. Explicit inline styles win.
pub fn apply_classes(styles: &mut StyleMap, classes: &BTreeSet<String>) {
    let has = |names: &[&str]| names.iter().any(|name| classes.contains(*name));

    if has(&["doc-center", "text-center"]) {
        set_default(styles, "text-align", "center");
    }
    if has(&["doc-right", "text-right"]) {
        set_default(styles, "text-align", "right");
    }
    if has(&["doc-justify", "text-justify"]) {
        set_default(styles, "text-align", "justify");
    }
    if has(&["doc-no-indent", "no-indent", "doc-flexline"]) {
        set_default(styles, "text-indent", "0");
        set_default(styles, "margin-left", "0");
    }
}

/// Positional paragraph rules of the act layout, keyed by the 1-based
/// paragraph index inside the section.
pub fn apply_act_paragraph_rules(styles: &mut StyleMap, index: usize) {
    let defaults: &[(&str, &str)] = match index {
        1 => &[
            ("text-align", "center"),
            ("font-weight", "bold"),
            ("font-size", "14pt"),
            ("text-indent", "0"),
            ("margin-left", "0"),
            ("margin-bottom", "4pt"),
        ],
        2 => &[
            ("text-align", "center"),
            ("text-indent", "0"),
            ("margin-left", "0"),
            ("margin-bottom", "6pt"),
        ],
        3 => &[
            ("text-indent", "0"),
            ("margin-left", "0"),
            ("margin-bottom", "10pt"),
        ],
        _ => &[],
    };
    for (key, value) in defaults {
        set_default(styles, key, value);
    }
}

/// Normalize a CSS length to points. Bare numbers are taken as points.
pub fn length_to_pt(value: &str) -> Option<f64> {
    let value = value.trim().to_lowercase();
    let units: [(&str, f64); 6] = [
        ("pt", 1.0),
        ("px", 72.0 / 96.0),
        ("cm", 72.0 / 2.54),
        ("mm", 72.0 / 25.4),
        ("in", 72.0),
        ("pc", 12.0),
    ];
    for (suffix, factor) in units {
        if let Some(number) = value.strip_suffix(suffix) {
            return number.trim().parse::<f64>().ok().map(|n| n * factor);
        }
    }
    value.parse::<f64>().ok()
}

/// First family of a `font-family` list, unquoted.
pub fn font_family(value: &str) -> Option<String> {
    value
        .split(',')
        .map(|family| family.trim().trim_matches(|c| c == '"' || c == '\''))
        .find(|family| !family.is_empty())
        .map(str::to_string)
}

pub fn parse_color(value: &str) -> Option<Rgb> {
    let value = value.trim().to_lowercase();
    if let Some(hex) = value.strip_prefix('#') {
        let expanded: String = if hex.len() == 3 {
            hex.chars().flat_map(|c| [c, c]).collect()
        } else {
            hex.to_string()
        };
        if expanded.len() != 6 || !expanded.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&expanded[range], 16).ok();
        return Some(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?));
    }
    if value.starts_with("rgb") && value.ends_with(')') {
        let open = value.find('(')?;
        let parts: Vec<u8> = value[open + 1..value.len() - 1]
            .split(',')
            .take(3)
            .map(|part| part.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        return match parts.as_slice() {
            [r, g, b] => Some(Rgb(*r, *g, *b)),
            _ => None,
        };
    }
    match value.as_str() {
        "black" => Some(Rgb(0, 0, 0)),
        "white" => Some(Rgb(255, 255, 255)),
        "red" => Some(Rgb(255, 0, 0)),
        "green" => Some(Rgb(0, 128, 0)),
        "blue" => Some(Rgb(0, 0, 255)),
        "gray" | "grey" => Some(Rgb(128, 128, 128)),
        _ => None,
    }
}
