//! Summary paragraphs for a document: an optional chat-model pass over the
//! task list, with a deterministic text built from the tasks themselves
//! whenever the model is disabled, unreachable or returns nothing usable.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use ureq::Agent;

use crate::money::capitalize;
use crate::store::TaskItem;

const MAX_PROMPT_TASKS: usize = 30;
const DESCRIPTION_LIMIT: usize = 200;
const NO_TASKS_PARAGRAPH: &str = "Работы по выбранным задачам отсутствуют.";
const NO_DETAILS_FRAGMENT: &str = "Работы выполнены согласно заданию";

static LEADING_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\-•\)\.(\s]+").expect("valid marker regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ru,
    En,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeStyle {
    #[default]
    Neutral,
    Formal,
    Concise,
    Detailed,
}

impl NarrativeStyle {
    fn hint(&self, language: Language) -> &'static str {
        match (language, self) {
            (Language::Ru, Self::Neutral) => "Нейтральный деловой тон",
            (Language::Ru, Self::Formal) => "Официальный деловой стиль",
            (Language::Ru, Self::Concise) => "Кратко: 1-2 предложения",
            (Language::Ru, Self::Detailed) => "Подробнее: 2-3 предложения",
            (Language::En, Self::Neutral) => "Neutral business tone",
            (Language::En, Self::Formal) => "Formal business wording",
            (Language::En, Self::Concise) => "Concise, 1-2 sentences",
            (Language::En, Self::Detailed) => "More detailed, 2-3 sentences",
        }
    }
}

/// Per-request narrative switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeOptions {
    pub enabled: bool,
    pub language: Language,
    pub style: NarrativeStyle,
    pub extra_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrativePrompt {
    pub system: String,
    pub user: String,
}

#[derive(Error, Debug)]
pub enum NarrativeError {
    #[error("narrative request failed: {0}")]
    Request(String),

    #[error("unexpected narrative response: {0}")]
    Response(String),
}

/// Text generation capability handed to the package builder.
pub trait NarrativeGenerator {
    fn enabled(&self) -> bool;
    fn generate(&self, prompt: &NarrativePrompt) -> Result<String, NarrativeError>;
}

/// Generator that is never enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNarrative;

impl NarrativeGenerator for NoNarrative {
    fn enabled(&self) -> bool {
        false
    }

    fn generate(&self, _prompt: &NarrativePrompt) -> Result<String, NarrativeError> {
        Err(NarrativeError::Request("narrative generation is disabled".into()))
    }
}

/// OpenAI-compatible chat completions client.
pub struct ChatNarrator {
    agent: Agent,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatNarrator {
    pub fn new(endpoint: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
        }
    }
}

impl NarrativeGenerator for ChatNarrator {
    fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    fn generate(&self, prompt: &NarrativePrompt) -> Result<String, NarrativeError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "max_tokens": 600,
            "temperature": 0.7,
        });

        let mut request = self
            .agent
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", &format!("Bearer {key}"));
        }

        let text = request
            .send(body.to_string())
            .map_err(|e| NarrativeError::Request(e.to_string()))?
            .body_mut()
            .read_to_string()
            .map_err(|e| NarrativeError::Request(e.to_string()))?;

        let response: Value =
            serde_json::from_str(&text).map_err(|e| NarrativeError::Response(e.to_string()))?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| NarrativeError::Response("missing choices[0].message.content".into()))
    }
}

/// Build the chat prompt for a set of task items.
pub fn build_prompt(
    items: &[TaskItem],
    options: &NarrativeOptions,
    period: &str,
    document_label: &str,
) -> Option<NarrativePrompt> {
    let lines: Vec<String> = items
        .iter()
        .filter_map(|item| {
            let description = item.description.trim();
            let text = if description.is_empty() {
                item.summary.trim()
            } else {
                description
            };
            (!text.is_empty()).then(|| (item, text.to_string()))
        })
        .take(MAX_PROMPT_TASKS)
        .enumerate()
        .map(|(idx, (item, text))| {
            let mut line = format!("{}. {} — {}", idx + 1, item.key, text);
            if !item.hours.is_zero() {
                line.push_str(&format!(" (затрачено {} ч.)", crate::money::format_hours(item.hours)));
            }
            line
        })
        .collect();
    if lines.is_empty() {
        return None;
    }

    let system = match options.language {
        Language::Ru => {
            "Ты — ассистент, который помогает составлять связный текст акта выполненных работ. \
             Нужно написать несколько предложений, отражающих суть выполненных задач. \
             Не используй списки, заголовки и таблицы — только абзацы текста."
        }
        Language::En => {
            "You are an assistant that writes cohesive summaries for statements of work. \
             Produce a short narrative describing the completed tasks. Use plain paragraphs only, no lists."
        }
    };

    let mut instructions = vec![format!("Документ: {document_label}.")];
    if !period.is_empty() {
        instructions.push(format!("Период: {period}."));
    }
    instructions.push(format!("Стиль: {}.", options.style.hint(options.language)));
    instructions.push("Сформируй 2-4 предложения, которые описывают результат работы по задачам.".into());
    instructions.push("Не перечисляй задачи по одной; объединяй информацию в связный текст.".into());
    instructions.push("Не используй HTML и маркеры списков.".into());
    if let Some(notes) = options.extra_notes.as_deref().filter(|n| !n.trim().is_empty()) {
        instructions.push(format!("Дополнительные пожелания: {}", notes.trim()));
    }

    let header = match options.language {
        Language::Ru => "Данные задач:",
        Language::En => "Task data:",
    };

    Some(NarrativePrompt {
        system: system.to_string(),
        user: format!("{}\n\n{header}\n{}", instructions.join("\n"), lines.join("\n")),
    })
}

/// Split generated text into paragraphs and strip list markers.
pub fn clean_generated(text: &str) -> Vec<String> {
    BLANK_LINES
        .split(text.trim())
        .map(|chunk| {
            let joined = chunk.trim().replace('\n', " ");
            LEADING_MARKERS.replace(&joined, "").trim().to_string()
        })
        .filter(|p| !p.is_empty())
        .collect()
}

/// One sentence per task: `Выполнена задача KEY: Summary; description.`
pub fn default_paragraphs(items: &[TaskItem]) -> Vec<String> {
    if items.is_empty() {
        return vec![NO_TASKS_PARAGRAPH.to_string()];
    }
    items
        .iter()
        .map(|item| {
            let key = if item.key.is_empty() { item.id.as_str() } else { item.key.as_str() };
            let key = if key.is_empty() { "—" } else { key };
            let summary = item.summary.trim();
            let mut description = item.description.trim().to_string();
            if description.chars().count() > DESCRIPTION_LIMIT {
                description = description.chars().take(DESCRIPTION_LIMIT - 3).collect::<String>() + "...";
            }

            let mut fragments = Vec::new();
            if !summary.is_empty() {
                fragments.push(summary.trim_end_matches('.').to_string());
            }
            if !description.is_empty() && !summary.contains(description.as_str()) {
                fragments.push(description.trim_end_matches('.').to_string());
            }
            if fragments.is_empty() {
                fragments.push(NO_DETAILS_FRAGMENT.to_string());
            }

            format!("Выполнена задача {key}: {}.", capitalize(&fragments.join("; ")))
        })
        .collect()
}

/// Paragraphs for one document, using the generator when the request and
/// the generator both allow it.
pub fn summary_paragraphs(
    items: &[TaskItem],
    options: &NarrativeOptions,
    generator: &dyn NarrativeGenerator,
    period: &str,
) -> Vec<String> {
    if items.is_empty() {
        return default_paragraphs(items);
    }
    if options.enabled && generator.enabled() {
        if let Some(prompt) = build_prompt(items, options, period, "Акт") {
            match generator.generate(&prompt) {
                Ok(text) => {
                    let paragraphs = clean_generated(&text);
                    if !paragraphs.is_empty() {
                        debug!(paragraphs = paragraphs.len(), "narrative generated");
                        return paragraphs;
                    }
                    warn!("narrative generator returned no text, using task summaries");
                }
                Err(err) => warn!(error = %err, "narrative generation failed, using task summaries"),
            }
        }
    }
    default_paragraphs(items)
}
