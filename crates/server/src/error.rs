//! Error types for the taskdeck server binary

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Could not determine the {0} directory")]
    NoProjectDir(&'static str),

    #[error(transparent)]
    Core(#[from] taskdeck_core::Error),

    #[error(transparent)]
    Net(#[from] taskdeck_net::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
