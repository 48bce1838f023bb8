use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern compiles"));

/// Replace every `${name}` with its value from `context`. Unknown names
/// become empty strings.
pub fn substitute(content: &str, context: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &Captures| {
            context
                .get(caps[1].trim())
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

/// Names referenced by a template body, deduplicated and sorted.
pub fn placeholders(content: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(content)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_render_empty() {
        let mut context = BTreeMap::new();
        context.insert("actNumber".to_string(), "D-1-01".to_string());
        assert_eq!(
            substitute("Акт № ${actNumber} от ${date}", &context),
            "Акт № D-1-01 от "
        );
    }

    #[test]
    fn collects_names() {
        let names = placeholders("${a} ${ b } ${a}");
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
