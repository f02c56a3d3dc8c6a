use std::path::PathBuf;

/// Failure to resolve a template name into a loaded workflow.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Invalid template name: {0:?}")]
    InvalidName(String),

    #[error("Workflow file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read workflow file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
