use std::path::PathBuf;

/// Errors that abort a build.
///
/// Everything the pipeline can recover from is reported as a warning in
/// [`BuildStats`](crate::stats::BuildStats) instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid front matter in {path}: {message}")]
    FrontMatter { path: String, message: String },

    #[error("Front matter in {path} has no `tags` entry to read the document type from")]
    MissingTags { path: String },

    #[error("Diagram renderer failed on '{}': {message}", source_path.display())]
    Render { source_path: PathBuf, message: String },

    #[error("Failed to {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Typeset engine failed on {path}: {message}")]
    Engine { path: String, message: String },

    #[error("{count} escape directive(s) survived postprocessing, first: `{first}`")]
    UnexpandedDirective { count: usize, first: String },
}

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
