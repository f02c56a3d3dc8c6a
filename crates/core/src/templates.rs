//! Workflow template storage.
//!
//! Templates are ComfyUI workflows in API format, stored as
//! `<root>/<name>.json`. A [`JobTemplate`] is loaded once per loop and
//! never modified; each submission works on an expanded copy produced
//! by [`JobTemplate::randomized`].

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::TemplateError;
use crate::randomize;

/// File extension of stored workflow templates.
pub const TEMPLATE_EXTENSION: &str = "json";

/// A canonical workflow loaded from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    name: String,
    workflow: Value,
}

impl JobTemplate {
    pub fn new(name: impl Into<String>, workflow: Value) -> Self {
        Self {
            name: name.into(),
            workflow,
        }
    }

    /// Name the template was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical, unexpanded workflow.
    pub fn workflow(&self) -> &Value {
        &self.workflow
    }

    /// Produce a fresh submission payload with every `$RANDOM` replaced.
    pub fn randomized(&self) -> Value {
        randomize::expand(&self.workflow)
    }
}

/// Resolves template names to workflow files under a root directory.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a template name to its file path.
    ///
    /// Names must be a single non-empty path component so that lookups
    /// cannot escape the root directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, TemplateError> {
        validate_template_name(name)?;
        Ok(self.root.join(format!("{name}.{TEMPLATE_EXTENSION}")))
    }

    /// Load and parse the named template.
    pub async fn load(&self, name: &str) -> Result<JobTemplate, TemplateError> {
        let path = self.resolve(name)?;

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(path));
            }
            Err(source) => return Err(TemplateError::Io { path, source }),
        };

        let workflow: Value = serde_json::from_str(&raw)
            .map_err(|source| TemplateError::Parse {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            template = name,
            path = %path.display(),
            random_fields = randomize::has_placeholders(&workflow),
            "Loaded workflow template",
        );

        Ok(JobTemplate::new(name, workflow))
    }

    /// List the names of all templates in the root directory, sorted.
    pub async fn list(&self) -> Result<Vec<String>, TemplateError> {
        let io_err = |source| TemplateError::Io {
            path: self.root.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_err)?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Reject empty names and names that are not a single path component.
pub fn validate_template_name(name: &str) -> Result<(), TemplateError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');

    if invalid {
        return Err(TemplateError::InvalidName(name.to_string()));
    }
    Ok(())
}
