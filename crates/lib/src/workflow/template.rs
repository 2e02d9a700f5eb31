//! Workflow template: the local JSON export uploaded to the engine.
//!
//! Placeholders of the form `{{ $env.VAR }}` or `{{ $env.VAR || 'default' }}` are replaced with
//! literal values before parsing, so the uploaded workflow does not depend on the engine's env.

use super::api::WorkflowDefinition;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Template shipped with the crate; written out by `flowlink init`.
pub const BUNDLED_TEMPLATE: &str = include_str!("../../config/workflow.json");

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\$env\.([A-Z0-9_]+)\s*(?:\|\|\s*'([^']*)')?\s*\}\}")
        .expect("placeholder pattern is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("reading workflow template {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing workflow template: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Escape `value` so it can sit inside a JSON string literal.
fn json_string_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Replace env placeholders in raw template text. `lookup` returns the variable's value;
/// unset or empty values fall back to the inline default, then to "".
pub fn prefill(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_PLACEHOLDER
        .replace_all(content, |caps: &Captures| {
            let var = &caps[1];
            let value = lookup(var)
                .filter(|v| !v.is_empty())
                .or_else(|| caps.get(2).map(|d| d.as_str().to_string()))
                .unwrap_or_default();
            log::debug!("provision: prefilling workflow var {}", var);
            json_string_escape(&value)
        })
        .into_owned()
}

/// Prefill with the process environment and parse into a definition.
pub fn render(content: &str) -> Result<WorkflowDefinition, TemplateError> {
    render_with(content, |var| std::env::var(var).ok())
}

pub fn render_with(
    content: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<WorkflowDefinition, TemplateError> {
    let filled = prefill(content, lookup);
    Ok(serde_json::from_str(&filled)?)
}

/// Where the provisioner reads its template from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// A file on disk; the bundled template is used when the file does not exist.
    File(PathBuf),
    /// Inline text (tests, embedded setups).
    Inline(String),
}

impl TemplateSource {
    /// Raw template text, before prefill.
    pub async fn read(&self) -> Result<String, TemplateError> {
        match self {
            TemplateSource::Inline(s) => Ok(s.clone()),
            TemplateSource::File(path) => read_or_bundled(path).await,
        }
    }
}

async fn read_or_bundled(path: &Path) -> Result<String, TemplateError> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!(
                "provision: no template at {}, using bundled template",
                path.display()
            );
            Ok(BUNDLED_TEMPLATE.to_string())
        }
        Err(source) => Err(TemplateError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn prefill_uses_env_then_default_then_empty() {
        let text = r#"{"a":"={{ $env.AI_MODEL || 'gpt-4' }}","b":"{{$env.MISSING || 'fallback'}}","c":"{{ $env.NOTHING }}"}"#;
        let out = prefill(text, env(&[("AI_MODEL", "llama3")]));
        assert_eq!(out, r#"{"a":"=llama3","b":"fallback","c":""}"#);
    }

    #[test]
    fn prefill_escapes_values_for_json_strings() {
        let text = r#"{"prompt":"{{ $env.SYSTEM_PROMPT }}"}"#;
        let out = prefill(text, env(&[("SYSTEM_PROMPT", "say \"hi\"\nthen\\stop")]));
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["prompt"], "say \"hi\"\nthen\\stop");
    }

    #[test]
    fn lowercase_names_are_not_placeholders() {
        let text = r#"{"x":"{{ $env.lower }}"}"#;
        assert_eq!(prefill(text, env(&[])), text);
    }

    #[test]
    fn bundled_template_renders_and_uses_canonical_path() {
        let def = render_with(BUNDLED_TEMPLATE, env(&[])).unwrap();
        assert_eq!(def.name, "Bob Chat Workflow");
        let nodes = def.nodes.as_array().unwrap();
        assert!(nodes.iter().any(|n| n["type"] == "n8n-nodes-base.webhook"
            && n["parameters"]["path"] == "bob-prompt"));
        assert!(!BUNDLED_TEMPLATE.is_empty());
        assert!(!serde_json::to_string(&def).unwrap().contains("$env."));
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_bundled() {
        let path = std::env::temp_dir().join(format!("flowlink-missing-{}.json", uuid::Uuid::new_v4()));
        let text = TemplateSource::File(path).read().await.unwrap();
        assert_eq!(text, BUNDLED_TEMPLATE);
    }
}
