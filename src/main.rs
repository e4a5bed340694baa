//! hostpool CLI
//!
//! Thin operator front-end over [`ConnectionRegistry`].

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use hostpool::config::hosts_file;
use hostpool::{ConnectionRegistry, ExecOutput, Hide, RunOptions};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Named SSH sessions from a hosts file
#[derive(Parser, Debug)]
#[command(name = "hostpool")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the hosts file (default: ~/.hostpool/hosts.ini or $HOSTPOOL_HOSTS)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Connect everything and list live sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run a command on the default target
    Run {
        /// Run on every target instead, in file order
        #[arg(long)]
        all: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Do not fail on a non-zero exit status
        #[arg(long)]
        warn: bool,

        /// Hide output streams
        #[arg(long, value_enum)]
        hide: Option<HideArg>,

        /// Command timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Working directory on the remote side
        #[arg(long, value_name = "DIR")]
        cd: Option<String>,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HideArg {
    Stdout,
    Stderr,
    Both,
}

impl From<HideArg> for Hide {
    fn from(arg: HideArg) -> Self {
        match arg {
            HideArg::Stdout => Hide::Stdout,
            HideArg::Stderr => Hide::Stderr,
            HideArg::Both => Hide::Both,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRecord<'a> {
    target: &'a str,
    key: String,
    #[serde(flatten)]
    output: &'a ExecOutput,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    hostpool::init_logging(cli.verbose);

    let path = match cli.config {
        Some(path) => path,
        None => hosts_file()?,
    };

    let registry = ConnectionRegistry::open(&path).await?;
    let result = execute(&registry, cli.command).await;
    registry.disconnect_all().await;
    result
}

async fn execute(registry: &ConnectionRegistry, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::List { json } => {
            let infos = registry.list_connections();
            if json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
                return Ok(());
            }

            match registry.gateway() {
                Some(gateway) => println!("gateway: {} ({})", gateway.name(), gateway.key()),
                None => println!("gateway: none"),
            }
            for target in registry.targets() {
                let via = target
                    .gateway_key()
                    .map(|k| format!(" via {}", k))
                    .unwrap_or_default();
                println!("{}\t{}@{}{}", target.name(), target.user(), target.key(), via);
            }
        }
        Commands::Run {
            all,
            json,
            warn,
            hide,
            timeout,
            cd,
            command,
        } => {
            let mut options = RunOptions::new();
            if warn {
                options = options.warn();
            }
            if let Some(hide) = hide {
                options = options.hide(hide.into());
            }
            if let Some(secs) = timeout {
                options = options.timeout(secs);
            }
            let command = command.join(" ");

            let results = if all {
                for session in registry.targets() {
                    if let Some(dir) = &cd {
                        session.cd(dir);
                    }
                }
                registry.run_all(&command, &options).await?
            } else {
                let session = registry.get_default_connection().await?;
                if let Some(dir) = &cd {
                    session.cd(dir);
                }
                let output = session.run(&command, &options).await?;
                vec![(session, output)]
            };

            if json {
                let records: Vec<RunRecord> = results
                    .iter()
                    .map(|(s, o)| RunRecord {
                        target: s.name(),
                        key: s.key().to_string(),
                        output: o,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }

            for (_, output) in &results {
                if !matches!(options.hide, Some(Hide::Stdout) | Some(Hide::Both)) {
                    print!("{}", output.stdout);
                }
                if !matches!(options.hide, Some(Hide::Stderr) | Some(Hide::Both)) {
                    eprint!("{}", output.stderr);
                }
            }
        }
    }
    Ok(())
}
