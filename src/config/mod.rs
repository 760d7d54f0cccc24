use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} is a directory, should be a file", .0.display())]
    IsDirectory(PathBuf),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Durable record of the last manifest version that was fully applied.
pub trait PersistedState {
    fn applied_version(&self) -> &str;

    fn record_applied_version(&mut self, version: &str) -> Result<(), ConfigError>;
}

/// The launcher's `<app>.ini` next to the game.
///
/// Comments, blank lines and keys the launcher does not know survive a save untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LauncherConfig {
    path: PathBuf,
    pub version: String,
    pub auto_patch: bool,
    pub auto_play: bool,
    pub patcher_url: Option<String>,
}

const KEY_VERSION: &str = "version";
const KEY_AUTO_PATCH: &str = "auto_patch";
const KEY_AUTO_PLAY: &str = "auto_play";
const KEY_PATCHER_URL: &str = "patcher_url";

impl LauncherConfig {
    /// Read the config, creating it with auto patch and auto play enabled when missing.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => return Err(ConfigError::IsDirectory(path)),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("config: creating {}", path.display());
                let config = Self {
                    path,
                    version: String::new(),
                    auto_patch: true,
                    auto_play: true,
                    patcher_url: None,
                };
                config.save()?;
                return Ok(config);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    action: "stat",
                    path,
                    source,
                });
            }
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            action: "read",
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(path, &text);
        debug!(
            "config: version={:?} auto_patch={} auto_play={}",
            config.version, config.auto_patch, config.auto_play
        );
        Ok(config)
    }

    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Self {
        let mut config = Self {
            path: path.into(),
            version: String::new(),
            auto_patch: false,
            auto_play: false,
            patcher_url: None,
        };
        for (key, value) in text.lines().filter_map(split_entry) {
            match key.to_ascii_lowercase().as_str() {
                KEY_VERSION => config.version = value.to_owned(),
                KEY_AUTO_PATCH => config.auto_patch = parse_flag(value),
                KEY_AUTO_PLAY => config.auto_play = parse_flag(value),
                KEY_PATCHER_URL if !value.is_empty() => {
                    config.patcher_url = Some(value.to_owned())
                }
                _ => {}
            }
        }
        config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) if self.path.is_dir() => {
                debug!("config: read failed on directory: {err}");
                return Err(ConfigError::IsDirectory(self.path.clone()));
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    action: "read",
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let rendered = self.render(&existing);
        let tmp = self.path.with_extension("ini.tmp");
        fs::write(&tmp, rendered).map_err(|source| ConfigError::Io {
            action: "write",
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| ConfigError::Io {
            action: "replace",
            path: self.path.clone(),
            source,
        })
    }

    /// Rewrite `existing` with the current values, keeping everything else in place.
    fn render(&self, existing: &str) -> String {
        let mut out = String::new();
        let mut seen_version = false;
        let mut seen_auto_patch = false;
        let mut seen_auto_play = false;
        let mut seen_patcher_url = false;

        for line in existing.lines() {
            let Some((key, _)) = split_entry(line) else {
                out.push_str(line);
                out.push('\n');
                continue;
            };
            let key = key.to_ascii_lowercase();
            let (seen, value) = match key.as_str() {
                KEY_VERSION => (&mut seen_version, self.version.clone()),
                KEY_AUTO_PATCH => (&mut seen_auto_patch, self.auto_patch.to_string()),
                KEY_AUTO_PLAY => (&mut seen_auto_play, self.auto_play.to_string()),
                KEY_PATCHER_URL => (
                    &mut seen_patcher_url,
                    self.patcher_url.clone().unwrap_or_default(),
                ),
                _ => {
                    out.push_str(line);
                    out.push('\n');
                    continue;
                }
            };
            if *seen {
                continue;
            }
            *seen = true;
            out.push_str(&format!("{key} = {value}\n"));
        }

        if !seen_version && !self.version.is_empty() {
            out.push_str(&format!("{KEY_VERSION} = {}\n", self.version));
        }
        if !seen_auto_patch {
            out.push_str(&format!("{KEY_AUTO_PATCH} = {}\n", self.auto_patch));
        }
        if !seen_auto_play {
            out.push_str(&format!("{KEY_AUTO_PLAY} = {}\n", self.auto_play));
        }
        if !seen_patcher_url && let Some(url) = &self.patcher_url {
            out.push_str(&format!("{KEY_PATCHER_URL} = {url}\n"));
        }
        out
    }
}

impl PersistedState for LauncherConfig {
    fn applied_version(&self) -> &str {
        &self.version
    }

    fn record_applied_version(&mut self, version: &str) -> Result<(), ConfigError> {
        let previous = std::mem::replace(&mut self.version, version.to_owned());
        if let Err(err) = self.save() {
            self.version = previous;
            return Err(err);
        }
        Ok(())
    }
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then(|| (key, value.trim()))
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
