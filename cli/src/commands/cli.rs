use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "settle", version, about = "Bring servers to a declared configuration over SSH")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file. Defaults to ~/.settled.toml, then ./.settled.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ConfigureArgs {
    /// How many servers to configure at once.
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Give up on a server after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BootstrapArgs {
    /// Username for the new sudo user.
    #[arg(long)]
    pub user: String,

    /// SSH user to run bootstrap as.
    #[arg(long, default_value = "root")]
    pub login_user: String,

    /// Additional group for the new user. Pass an empty value to skip.
    #[arg(long, default_value = "sudo")]
    pub group: String,

    /// Allow passwordless sudo.
    #[arg(long, default_value_t = false)]
    pub sudo_nopasswd: bool,

    /// Authorized SSH public key for the new user (repeatable; defaults to the login user's keys).
    #[arg(long = "authorized-key", action = clap::ArgAction::Append)]
    pub authorized_keys: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply hardening and configuration tasks to every configured server.
    Configure(ConfigureArgs),
    /// Connect to every configured server and run a trivial command.
    Ping,
    /// Create the initial sudo user using the login user.
    Bootstrap(BootstrapArgs),
}
