//! Command line and environment configuration

use crate::daemon::DaemonConfig;
use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the extension host
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Workspace root (overrides EXT_HOST_WORKSPACE, defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Directory containing one sub-directory per extension; repeatable
    /// (overrides EXT_HOST_EXTENSIONS_DIR)
    #[arg(long = "extensions-dir", value_name = "DIR")]
    pub extensions_dirs: Vec<PathBuf>,

    /// Root for extension state and secrets (overrides EXT_HOST_STORAGE_DIR,
    /// defaults to <workspace>/.ext-host)
    #[arg(long, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Language daemon executable (overrides EXT_HOST_DAEMON)
    #[arg(long, value_name = "PATH")]
    pub daemon_path: Option<String>,

    /// Argument passed to the language daemon; repeatable
    #[arg(long = "daemon-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub daemon_args: Vec<String>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log file path (overrides EXT_HOST_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Resolved host configuration
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub workspace_root: PathBuf,
    pub extension_dirs: Vec<PathBuf>,
    pub storage_dir: PathBuf,
    pub daemon: Option<DaemonConfig>,
}

impl HostConfig {
    /// Defaults for `workspace_root`: no extension dirs, storage under the
    /// workspace, no daemon
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            storage_dir: default_storage_dir(&workspace_root),
            workspace_root,
            extension_dirs: Vec::new(),
            daemon: None,
        }
    }

    /// Priority: CLI arg > environment > default
    pub fn from_args(args: &Args) -> std::io::Result<Self> {
        Self::resolve(args, |name| std::env::var(name).ok(), std::env::current_dir)
    }

    fn resolve<E, C>(args: &Args, env: E, current_dir: C) -> std::io::Result<Self>
    where
        E: Fn(&str) -> Option<String>,
        C: FnOnce() -> std::io::Result<PathBuf>,
    {
        let workspace_root = match args
            .workspace
            .clone()
            .or_else(|| env("EXT_HOST_WORKSPACE").map(PathBuf::from))
        {
            Some(root) => root,
            None => current_dir()?,
        };

        let extension_dirs = if !args.extensions_dirs.is_empty() {
            args.extensions_dirs.clone()
        } else {
            env("EXT_HOST_EXTENSIONS_DIR")
                .map(|dirs| std::env::split_paths(&dirs).collect())
                .unwrap_or_default()
        };

        let storage_dir = args
            .storage_dir
            .clone()
            .or_else(|| env("EXT_HOST_STORAGE_DIR").map(PathBuf::from))
            .unwrap_or_else(|| default_storage_dir(&workspace_root));

        let daemon = args
            .daemon_path
            .clone()
            .or_else(|| env("EXT_HOST_DAEMON"))
            .filter(|command| !command.trim().is_empty())
            .map(|command| DaemonConfig {
                command,
                args: args.daemon_args.clone(),
                workspace_root: workspace_root.clone(),
            });

        Ok(Self {
            workspace_root,
            extension_dirs,
            storage_dir,
            daemon,
        })
    }
}

fn default_storage_dir(workspace_root: &std::path::Path) -> PathBuf {
    workspace_root.join(".ext-host")
}
