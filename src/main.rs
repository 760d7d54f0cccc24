use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use log::{debug, error, info, warn};

mod config;
mod engine;
mod env;
mod error;
mod logging;
mod manifest;
mod networking;
mod patch;
mod process;
mod progress;
mod storage;
mod updater;
mod util;
mod verify;

use crate::config::LauncherConfig;
use crate::engine::LauncherEngine;
use crate::engine::state::UserAction;
use crate::networking::HttpFetcher;
use crate::patch::PatchTarget;
use crate::progress::{ConsoleProgress, LogProgress, ProgressSink};
use crate::util::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "starteq",
    author,
    version,
    about = "Keeps an EverQuest client in sync with its patch server and launches it"
)]
struct Cli {
    /// Patch server base URL. Overrides the ini and the built-in default.
    #[arg(long)]
    patcher_url: Option<String>,

    /// Client filelist to follow.
    #[arg(long, default_value = env::DEFAULT_CLIENT_TAG)]
    client_tag: String,

    /// Log progress lines instead of drawing a progress bar.
    #[arg(long)]
    headless: bool,

    /// Print launcher version and exit.
    #[arg(long)]
    version_only: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    /// Patch and play according to auto_patch and auto_play in the ini.
    Auto,
    /// Patch only.
    Patch,
    /// Start the game without patching.
    Play,
}

impl From<Command> for UserAction {
    fn from(command: Command) -> Self {
        match command {
            Command::Auto => UserAction::AutoPlay,
            Command::Patch => UserAction::Patch,
            Command::Play => UserAction::Play,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.version_only {
        println!("starteq {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let root = match env::install_root() {
        Ok(root) => root,
        Err(err) => {
            eprintln!("starteq: cannot resolve working directory: {err}");
            return ExitCode::FAILURE;
        }
    };
    let app_name = env::app_name();
    let bars = (!cli.headless).then(MultiProgress::new);
    logging::init(&env::log_path(&root, &app_name), bars.clone());

    match run(cli, root, &app_name, bars).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    cli: Cli,
    root: PathBuf,
    app_name: &str,
    bars: Option<MultiProgress>,
) -> Result<(), String> {
    let action = UserAction::from(cli.command.unwrap_or(Command::Auto));
    let config = LauncherConfig::load_or_create(env::config_path(&root, app_name))
        .map_err(|e| format!("config: {e}"))?;
    debug!("config: loaded {}", config.path().display());

    let patcher_url = resolve_patcher_url(
        cli.patcher_url.as_deref(),
        config.patcher_url.as_deref(),
        env::BUILTIN_PATCHER_URL,
    );
    let patcher_url = match (patcher_url, action) {
        (Some(url), _) => url,
        (None, UserAction::Play) => String::new(),
        (None, _) => {
            return Err(
                "no patcher URL configured: pass --patcher-url or set patcher_url in the ini"
                    .into(),
            );
        }
    };
    info!(
        "{app_name} {} patching {} from {patcher_url} ({})",
        env!("CARGO_PKG_VERSION"),
        root.display(),
        cli.client_tag
    );

    let progress: Arc<dyn ProgressSink> = match bars {
        Some(bars) => Arc::new(ConsoleProgress::new(bars)),
        None => Arc::new(LogProgress::new()),
    };
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling patch...");
            on_interrupt.cancel();
        }
    });

    let engine = LauncherEngine::new(
        PatchTarget {
            root,
            patcher_url,
            client_tag: cli.client_tag,
        },
        app_name,
        config,
        Arc::new(HttpFetcher::default()),
        progress,
        cancel,
    );
    engine
        .handle_action(action)
        .await
        .map_err(|e| e.to_string())
}

/// First non-empty of flag, ini key and built-in default, without a trailing `/`.
fn resolve_patcher_url(
    flag: Option<&str>,
    configured: Option<&str>,
    builtin: Option<&str>,
) -> Option<String> {
    [flag, configured, builtin]
        .into_iter()
        .flatten()
        .map(|url| url.trim().trim_end_matches('/'))
        .find(|url| !url.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patcher_url_prefers_flag_then_config() {
        assert_eq!(
            resolve_patcher_url(
                Some("https://flag.example.com/"),
                Some("https://ini.example.com"),
                Some("https://built.example.com")
            ),
            Some("https://flag.example.com".into())
        );
        assert_eq!(
            resolve_patcher_url(None, Some(" https://ini.example.com/ "), None),
            Some("https://ini.example.com".into())
        );
        assert_eq!(
            resolve_patcher_url(Some(""), None, Some("https://built.example.com")),
            Some("https://built.example.com".into())
        );
        assert_eq!(resolve_patcher_url(None, None, None), None);
    }

    #[test]
    fn defaults_to_auto_mode() {
        let cli = Cli::parse_from(["starteq"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.client_tag, "rof");
        assert!(!cli.headless);

        let cli = Cli::parse_from(["starteq", "--headless", "--patcher-url", "https://p", "patch"]);
        assert_eq!(cli.command, Some(Command::Patch));
        assert_eq!(UserAction::from(Command::Play), UserAction::Play);
    }
}
