//! Server process settings.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "conductor-server")]
#[command(about = "Conductor CI scheduler webhook server", long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "CONDUCTOR_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: SocketAddr,

    /// System configuration file (supported repositories, legacy builders)
    #[arg(long, env = "CONDUCTOR_SYSTEM_CONFIG", default_value = "conductor.kdl")]
    pub system_config: PathBuf,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// GitHub token used for check runs and configuration fetches
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Buildbucket host URL
    #[arg(
        long,
        env = "BUILDBUCKET_URL",
        default_value = "https://cr-buildbucket.appspot.com"
    )]
    pub buildbucket_url: String,

    /// Buildbucket project builds are scheduled in
    #[arg(long, env = "BUILDBUCKET_PROJECT", default_value = "conductor")]
    pub buildbucket_project: String,

    /// Buildbucket bucket presubmit builds are scheduled in
    #[arg(long, env = "BUILDBUCKET_BUCKET", default_value = "try")]
    pub buildbucket_bucket: String,

    /// Token for Buildbucket requests
    #[arg(long, env = "BUILDBUCKET_TOKEN", hide_env_values = true)]
    pub buildbucket_token: Option<String>,

    /// PostgreSQL URL; commits are kept in memory when unset
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "CONDUCTOR_LOG_JSON")]
    pub log_json: bool,
}
