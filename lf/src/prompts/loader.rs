//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to the
//! embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Loads and renders prompt templates
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    /// `{name}.pmt` files here win over the embedded copies
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Use `dir/{name}.pmt` overrides when the directory exists
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let exists = dir.is_dir();
        debug!(?dir, %exists, "PromptLoader::new: called");
        Self {
            hbs: Self::engine(),
            override_dir: exists.then(|| dir.to_path_buf()),
        }
    }

    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self {
            hbs: Self::engine(),
            override_dir: None,
        }
    }

    fn engine() -> Handlebars<'static> {
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        hbs
    }

    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: using override");
                return std::fs::read_to_string(&path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("Unknown prompt template: {}", name))
    }

    pub fn render<C: Serialize>(&self, template_name: &str, context: &C) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_render_embedded_classify() {
        let loader = PromptLoader::embedded_only();
        let text = loader
            .render("classify", &json!({"original": "Hi <Dana>", "reply": "Sounds good & thanks"}))
            .unwrap();
        assert!(text.contains("Hi <Dana>"));
        assert!(text.contains("Sounds good & thanks"));
    }

    #[test]
    fn test_override_dir_wins() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("classify.pmt"), "custom {{reply}}").unwrap();
        let loader = PromptLoader::new(dir.path());
        let text = loader.render("classify", &json!({"original": "", "reply": "yes"})).unwrap();
        assert_eq!(text, "custom yes");

        // Templates without an override still come from the binary
        assert!(loader.render("outreach", &json!({})).is_ok());
    }

    #[test]
    fn test_missing_override_dir_is_ignored() {
        let loader = PromptLoader::new("/nonexistent/leadflow/prompts");
        assert!(loader.override_dir.is_none());
    }

    #[test]
    fn test_unknown_template() {
        let loader = PromptLoader::embedded_only();
        assert!(loader.render("nope", &json!({})).is_err());
    }
}
