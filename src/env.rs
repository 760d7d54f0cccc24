use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_APP_NAME: &str = "starteq";
pub const DEFAULT_CLIENT_TAG: &str = "rof";
pub const GAME_EXECUTABLE: &str = "eqgame.exe";
pub const PLAYER_DATA_FILE: &str = "eqlsPlayerData.ini";
pub const SEED_INSTALL_DIR: &str = "everquest_rof2";

/// Patcher URL baked in at build time, e.g. `STARTEQ_PATCHER_URL=https://patch.example.com`.
pub const BUILTIN_PATCHER_URL: Option<&str> = option_env!("STARTEQ_PATCHER_URL");

/// Name of the running launcher, used for the config, log and self-update resources.
pub fn app_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|exe| app_name_from(&exe))
        .unwrap_or_else(|| DEFAULT_APP_NAME.to_owned())
}

/// Everything before the first `.` of the executable's file name.
pub fn app_name_from(exe: &Path) -> Option<String> {
    let file_name = exe.file_name()?.to_string_lossy();
    let stem = file_name.split('.').next().unwrap_or_default();
    (!stem.is_empty()).then(|| stem.to_owned())
}

/// The launcher patches the directory it is started from.
pub fn install_root() -> std::io::Result<PathBuf> {
    env::current_dir()
}

pub fn config_path(root: &Path, app_name: &str) -> PathBuf {
    root.join(format!("{app_name}.ini"))
}

pub fn log_path(root: &Path, app_name: &str) -> PathBuf {
    root.join(format!("{app_name}.txt"))
}

pub fn game_executable(root: &Path) -> PathBuf {
    root.join(GAME_EXECUTABLE)
}

pub fn player_data_path(root: &Path) -> PathBuf {
    root.join(PLAYER_DATA_FILE)
}

/// Candidate directories holding a complete client to seed a fresh install from.
pub fn seed_install_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![root.join(SEED_INSTALL_DIR)];
    if let Some(parent) = root.parent() {
        dirs.push(parent.join(SEED_INSTALL_DIR));
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_app_name_from_executable() {
        assert_eq!(
            app_name_from(Path::new("/opt/eq/launcheq.exe")).as_deref(),
            Some("launcheq")
        );
        assert_eq!(
            app_name_from(Path::new("starteq.v2.exe")).as_deref(),
            Some("starteq")
        );
        assert_eq!(
            app_name_from(Path::new("/usr/bin/starteq")).as_deref(),
            Some("starteq")
        );
        assert_eq!(app_name_from(Path::new("/opt/eq/.hidden")), None);
    }

    #[test]
    fn lays_out_files_under_root() {
        let root = Path::new("/games/eq");
        assert_eq!(
            config_path(root, "starteq"),
            PathBuf::from("/games/eq/starteq.ini")
        );
        assert_eq!(log_path(root, "starteq"), PathBuf::from("/games/eq/starteq.txt"));
        assert_eq!(
            seed_install_dirs(root),
            vec![
                PathBuf::from("/games/eq/everquest_rof2"),
                PathBuf::from("/games/everquest_rof2"),
            ]
        );
    }
}
