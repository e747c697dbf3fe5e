//! Persistence of the node state across restarts.
//!
//! The config is a small JSON document, `{port, nodes}`, saved
//! periodically so a restarted node can redial peers it already knew
//! instead of depending on the bootstrap seeds.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::wire::message::Endpoint;

/// Directory name component: the config lives under `~/.bitz`.
pub const ID: &str = "bitz";

/// File name prefix: with the default port the config file is
/// `~/.bitz/bitmessage-9090`.
pub const PREFIX: &str = "bitmessage";

const FALLBACK_DIR: &str = "/var/run/bitz";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config persistence is disabled, no usable directory")]
    Disabled,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("config encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config rename: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// The on-disk document. Not ABI-stable across major versions.
#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    port: u16,
    nodes: Vec<Endpoint>,
}

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub nodes: Vec<Endpoint>,
    /// None when no writable directory could be found; saving is then
    /// disabled but the node still runs.
    dir: Option<PathBuf>,
}

impl Config {
    /// Reads the persisted config for `port` from the default location,
    /// returning an empty but usable config on any failure.
    pub fn open(port: u16) -> Config {
        Config::open_at(default_dir(), port)
    }

    /// Reads the config rooted at an explicit directory. The directory
    /// is created if missing; if that fails, persistence is disabled.
    pub fn open_at(dir: impl Into<PathBuf>, port: u16) -> Config {
        let dir = dir.into();
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), %err, "config directory unavailable, persistence disabled");
            return Config {
                port,
                nodes: Vec::new(),
                dir: None,
            };
        }
        let path = file_path(&dir, port);
        let mut config = Config {
            port,
            nodes: Vec::new(),
            dir: Some(dir),
        };
        match fs::File::open(&path) {
            Err(_) => config,
            Ok(file) => {
                match serde_json::from_reader::<_, ConfigFile>(file) {
                    Ok(persisted) => config.nodes = persisted.nodes,
                    Err(err) => warn!(path = %path.display(), %err, "ignoring unreadable config"),
                }
                config
            }
        }
    }

    /// Replaces the node list with the currently connected peers and
    /// writes the config out.
    ///
    /// The write goes to a fresh temp file next to the target, then a
    /// rename. On platforms where rename does not overwrite, the old
    /// file is removed and the rename retried; if the process dies in
    /// between, the temp file is the recovery artifact.
    pub fn save(&mut self, connected: impl IntoIterator<Item = Endpoint>) -> Result<(), ConfigError> {
        self.nodes = connected.into_iter().collect();
        let dir = self.dir.as_ref().ok_or(ConfigError::Disabled)?;
        let path = file_path(dir, self.port);

        let mut tmp = tempfile::Builder::new().prefix(ID).tempfile_in(dir)?;
        serde_json::to_writer(
            &mut tmp,
            &ConfigFile {
                port: self.port,
                nodes: self.nodes.clone(),
            },
        )?;

        match tmp.persist(&path) {
            Ok(_) => {}
            Err(err) => {
                fs::remove_file(&path)?;
                err.file.persist(&path)?;
            }
        }
        debug!(path = %path.display(), nodes = self.nodes.len(), "saved node state");
        Ok(())
    }
}

fn file_path(dir: &Path, port: u16) -> PathBuf {
    dir.join(format!("{PREFIX}-{port}"))
}

/// `~/.bitz` when a home directory exists, `/var/run/bitz` otherwise.
fn default_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(format!(".{ID}")),
        None => PathBuf::from(FALLBACK_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[test]
    fn save_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::open_at(dir.path(), 9090);
        assert!(config.nodes.is_empty());

        config
            .save([endpoint("10.0.0.1:8444"), endpoint("10.0.0.2:8444")])
            .unwrap();

        let reopened = Config::open_at(dir.path(), 9090);
        assert_eq!(reopened.nodes, config.nodes);
        assert_eq!(reopened.port, 9090);
    }

    #[test]
    fn ports_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::open_at(dir.path(), 9090);
        config.save([endpoint("10.0.0.1:8444")]).unwrap();

        let other = Config::open_at(dir.path(), 9091);
        assert!(other.nodes.is_empty());
    }

    #[test]
    fn save_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::open_at(dir.path(), 9090);
        config.save([endpoint("10.0.0.1:8444")]).unwrap();
        config.save([endpoint("10.0.0.2:8444")]).unwrap();

        let reopened = Config::open_at(dir.path(), 9090);
        assert_eq!(reopened.nodes, vec![endpoint("10.0.0.2:8444")]);
    }

    #[test]
    fn corrupt_file_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(file_path(dir.path(), 9090), b"not json").unwrap();
        let config = Config::open_at(dir.path(), 9090);
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn disabled_config_reports_on_save() {
        // A file in place of the directory makes creation fail.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let mut config = Config::open_at(&blocker, 9090);
        let err = config.save([endpoint("10.0.0.1:8444")]).unwrap_err();
        assert!(matches!(err, ConfigError::Disabled));
    }
}
