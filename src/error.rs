use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaperError>;

#[derive(Error, Debug)]
pub enum PaperError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{0}' is not a recognized markdown extension (expected .md, .markdown, .mdx, .mdown, .mkd, .mkdn)")]
    UnsupportedExtension(String),

    #[error("preference store {}: {source}", path.display())]
    Prefs {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("settings file {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("session script {}: {source}", path.display())]
    Script {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Bind(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
