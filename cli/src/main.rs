use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use settled_cli::app::{self, BootstrapOptions, ConfigureOptions};
use settled_cli::commands::cli::{self, Commands};
use settled_cli::error::CliError;
use settled_cli::logging;
use settled_core::config::{self, ServerConfig};
use settled_core::context::RunContext;
use settled_core::transport::RemoteHost;

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<(), CliError> {
    let args = cli::Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    let _log_guard = logging::init(&cfg.logging).map_err(CliError::Logging)?;

    let ctx = RunContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling remaining work");
            interrupt.cancel();
        }
    });

    let connect = |server: &ServerConfig| Arc::new(server.connect()) as Arc<dyn RemoteHost>;

    let summary = match args.command {
        Commands::Configure(c) => {
            let opts = ConfigureOptions {
                jobs: c.jobs,
                timeout: c.timeout_secs.map(Duration::from_secs),
            };
            let specs = settled_tasks::builtins();
            app::configure(&ctx, &cfg, &specs, &opts, &connect).await
        }
        Commands::Ping => app::ping(&ctx, &cfg, &connect).await,
        Commands::Bootstrap(b) => {
            let opts = BootstrapOptions {
                user: b.user,
                login_user: b.login_user,
                group: Some(b.group),
                sudo_nopasswd: b.sudo_nopasswd,
                authorized_keys: b.authorized_keys,
            }
            .normalized()?;
            app::bootstrap(&ctx, &cfg, &opts, &connect).await
        }
    };

    summary.into_result()
}
