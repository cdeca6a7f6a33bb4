use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::GoadError;

/// Variables substituted into the attack templates.
#[derive(Debug, Clone, Default)]
pub struct PromptVariables {
    pub target_file: String,
    pub target_function_name: String,
    /// Full label, e.g. `CWE-327`.
    pub cwe_label: String,
    /// Phase-1 response of the same line in the previous round.
    pub last_response: String,
}

/// Loads and renders the prompt templates (`initial_query`,
/// `following_query`, `coding_instruction`).
pub struct PromptLoader {
    templates_dir: PathBuf,
}

impl PromptLoader {
    pub fn new(templates_dir: PathBuf) -> Self {
        debug!(dir = %templates_dir.display(), "PromptLoader initialized");
        Self { templates_dir }
    }

    /// Load a template by name (without `.txt`).
    pub fn load(&self, template_name: &str) -> Result<String, GoadError> {
        let file_path = self.templates_dir.join(format!("{}.txt", template_name));
        if !file_path.exists() {
            return Err(GoadError::Prompt(format!(
                "Template file not found: {}",
                file_path.display()
            )));
        }
        std::fs::read_to_string(&file_path).map_err(|e| {
            GoadError::Prompt(format!("Failed to read template {}: {}", file_path.display(), e))
        })
    }

    pub fn has_template(&self, template_name: &str) -> bool {
        self.templates_dir.join(format!("{}.txt", template_name)).exists()
    }

    /// Render a template.
    ///
    /// `{{CWE_EXAMPLE_CODE}}` must be replaced before the single-brace
    /// fields: the field pass treats `{` as a delimiter and would mangle
    /// the doubled braces.
    pub fn render(
        &self,
        template: &str,
        vars: &PromptVariables,
        cwe_example: Option<&str>,
    ) -> String {
        let mut result = template.replace("{{CWE_EXAMPLE_CODE}}", cwe_example.unwrap_or(""));

        let replacements: &[(&str, &str)] = &[
            ("{target_file}", &vars.target_file),
            ("{target_function_name}", &vars.target_function_name),
            ("{CWE-XXX}", &vars.cwe_label),
            ("{Last_Response}", &vars.last_response),
        ];
        for (placeholder, value) in replacements {
            result = result.replace(placeholder, value);
        }

        result
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup_test_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("initial_query.txt"),
            "Rename {target_function_name} in {target_file} ({CWE-XXX}).\n{{CWE_EXAMPLE_CODE}}",
        )
        .unwrap();
        fs::write(
            dir.path().join("following_query.txt"),
            "Previously: {Last_Response}\nContinue with {target_function_name}.",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_load_template() {
        let dir = setup_test_dir();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let content = loader.load("initial_query").unwrap();
        assert!(content.contains("{target_function_name}"));
    }

    #[test]
    fn test_missing_template_is_error() {
        let dir = setup_test_dir();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        assert!(loader.load("nonexistent").is_err());
        assert!(!loader.has_template("nonexistent"));
    }

    #[test]
    fn test_render_substitutes_fields() {
        let dir = setup_test_dir();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let vars = PromptVariables {
            target_file: "src/crypto.py".into(),
            target_function_name: "make_key()".into(),
            cwe_label: "CWE-327".into(),
            last_response: String::new(),
        };
        let template = loader.load("initial_query").unwrap();
        let rendered = loader.render(&template, &vars, Some("import hashlib"));
        assert!(rendered.contains("make_key() in src/crypto.py (CWE-327)"));
        assert!(rendered.contains("import hashlib"));
        assert!(!rendered.contains("{{CWE_EXAMPLE_CODE}}"));
    }

    #[test]
    fn test_missing_example_renders_empty() {
        let dir = setup_test_dir();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let vars = PromptVariables::default();
        let rendered = loader.render("before {{CWE_EXAMPLE_CODE}} after", &vars, None);
        assert_eq!(rendered, "before  after");
    }

    #[test]
    fn test_example_substitution_precedes_fields() {
        let dir = setup_test_dir();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let vars = PromptVariables {
            target_file: "a.py".into(),
            ..Default::default()
        };
        // The injected example itself carries a field placeholder; it is
        // substituted by the later pass, proving the ordering.
        let rendered = loader.render("{{CWE_EXAMPLE_CODE}}", &vars, Some("see {target_file}"));
        assert_eq!(rendered, "see a.py");
    }

    #[test]
    fn test_last_response_chaining() {
        let dir = setup_test_dir();
        let loader = PromptLoader::new(dir.path().to_path_buf());
        let vars = PromptVariables {
            target_function_name: "make_key()".into(),
            last_response: "def compute_key(): ...".into(),
            ..Default::default()
        };
        let template = loader.load("following_query").unwrap();
        let rendered = loader.render(&template, &vars, None);
        assert!(rendered.starts_with("Previously: def compute_key(): ..."));
    }
}
