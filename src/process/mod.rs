use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use log::{debug, info, warn};
use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;

use crate::env;

const FALLBACK_USERNAME: &str = "x";
const USERNAME_PREFIX: &str = "Username=";
const START_POLLS: u32 = 10;
const START_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{} not found, it must be in the same directory as the launcher", .0.display())]
    MissingExecutable(PathBuf),
    #[error("start {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start {0}")]
    NotStarted(String),
}

/// Last login name stored by the game client, or `x` when there is none.
pub fn read_username(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => match parse_username(&text) {
            Some(name) => name.to_owned(),
            None => FALLBACK_USERNAME.to_owned(),
        },
        Err(err) => {
            warn!("Failed grabbing username from {}: {err}", path.display());
            FALLBACK_USERNAME.to_owned()
        }
    }
}

fn parse_username(text: &str) -> Option<&str> {
    text.lines()
        .find_map(|line| line.strip_prefix(USERNAME_PREFIX))
        .filter(|name| !name.is_empty())
}

/// Starts the game client from the install root.
#[derive(Clone, Debug)]
pub struct GameLauncher {
    root: PathBuf,
}

impl GameLauncher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Start the client logged in as the stored user and wait until it shows up.
    pub async fn launch(&self) -> Result<u32, LaunchError> {
        let game = env::game_executable(&self.root);
        if !game.is_file() {
            warn!("launch: client not found at {}", game.display());
            return Err(LaunchError::MissingExecutable(game));
        }
        let username = read_username(&env::player_data_path(&self.root));
        info!("Launching EverQuest from {}", self.root.display());
        debug!("launch: {} patchme /login:{username}", game.display());

        let mut command = Command::new(&game);
        command
            .arg("patchme")
            .arg(format!("/login:{username}"))
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            // DETACHED_PROCESS
            command.creation_flags(0x00000008);
        }

        let child = command.spawn().map_err(|source| LaunchError::Spawn {
            path: game.clone(),
            source,
        })?;
        let pid = child.id();

        for _ in 0..START_POLLS {
            if is_running(pid) {
                info!("EverQuest started with process ID {pid}");
                return Ok(pid);
            }
            tokio::time::sleep(START_POLL_INTERVAL).await;
        }
        Err(LaunchError::NotStarted(env::GAME_EXECUTABLE.to_owned()))
    }
}

/// Whether the OS currently knows a process with this id.
pub fn is_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_username_line() {
        let text = "[PLAYER]\r\nUsername=Soandso\r\nPassword=\r\n";
        assert_eq!(parse_username(text), Some("Soandso"));
        assert_eq!(parse_username("Username=\n"), None);
        assert_eq!(parse_username("username=lower\n"), None);
    }

    #[test]
    fn username_falls_back_when_file_is_missing() {
        let dir = TempDir::new().unwrap();
        let path = env::player_data_path(dir.path());
        assert_eq!(read_username(&path), "x");

        std::fs::write(&path, "Username=Firiona\n").unwrap();
        assert_eq!(read_username(&path), "Firiona");
    }

    #[test]
    fn detects_running_process() {
        assert!(is_running(std::process::id()));
    }

    #[tokio::test]
    async fn launch_requires_game_binary() {
        let dir = TempDir::new().unwrap();
        let err = GameLauncher::new(dir.path()).launch().await.unwrap_err();
        assert!(matches!(err, LaunchError::MissingExecutable(_)));
    }
}
