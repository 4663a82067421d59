use clap::Parser;
use owo_colors::OwoColorize;
use url::Url;

mod cli;

use cli::op::{Op, OpContext};
use cli::ops::{Daemon, Demote, Evict, History, List, Promote, Status, Sweep, Topology};
use tiercache_daemon::http_server::api::client::ApiClient;

crate::command_enum! {
    (Daemon, Daemon),
    (Status, Status),
    (List, List),
    (Promote, Promote),
    (Demote, Demote),
    (Evict, Evict),
    (Sweep, Sweep),
    (History, History),
    (Topology, Topology),
}

#[derive(Parser, Debug)]
#[command(name = "tiercache", version, about = "Invisible cache tiering for media servers")]
struct Args {
    /// Base URL of a running daemon's API
    #[arg(long, global = true, env = "TIERCACHE_REMOTE", default_value = "http://127.0.0.1:7878")]
    remote: Url,

    /// Path to the daemon's TOML config file
    #[arg(long, global = true, env = "TIERCACHE_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let ctx = OpContext {
        client: ApiClient::new(&args.remote)?,
        config_path: args.config,
    };

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
