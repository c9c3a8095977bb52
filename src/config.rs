//! CLI arguments and server configuration defaults.

use clap::Parser;

pub const DEFAULT_STORAGE_DIR: &str = "/var/sc-ota";
pub const MODELS_DIR: &str = "models";
pub const RESULTS_DIR: &str = "results";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_HTTPS_PORT: u16 = 8443;
pub const DEFAULT_RATE_LIMIT_CAPACITY: u32 = 100;
pub const DEFAULT_RATE_LIMIT_REFILL_MS: u64 = 1000;
pub const DEFAULT_MODEL_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_RESULT_MAX_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_TEMP_TTL_SECS: u64 = 24 * 60 * 60;
pub const TEMP_CLEAN_INTERVAL_SECS: u64 = 900;
pub const COPY_CHUNK_SIZE: usize = 4096;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;
pub const DEFAULT_TEAMS: &str = "team1:PQWK7WdSdmrej6TC3xaf,\
team2:BvZGcmXW39RnL5MtpzvM,\
team3:fTfknjjeJqRD5myKTnK9,\
team4:MUnFEnRqzH4fBWRT8YXJ";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "sc-ota-server", version, about = "Team model and result store")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "SC_OTA_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Root directory holding models/ and results/"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "SC_OTA_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "SC_OTA_HTTP_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "SC_OTA_HTTPS_PORT",
        default_value_t = DEFAULT_HTTPS_PORT,
        help = "HTTPS port (only used when a cert and key are given)"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "SC_OTA_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "SC_OTA_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "SC_OTA_TEAMS",
        default_value = DEFAULT_TEAMS,
        hide_default_value = true,
        help = "Comma separated team credentials as name:password"
    )]
    pub teams: String,
    #[arg(
        long,
        env = "SC_OTA_RATE_LIMIT_CAPACITY",
        default_value_t = DEFAULT_RATE_LIMIT_CAPACITY,
        help = "Token bucket capacity shared by all requests"
    )]
    pub rate_limit_capacity: u32,
    #[arg(
        long,
        env = "SC_OTA_RATE_LIMIT_REFILL_MS",
        default_value_t = DEFAULT_RATE_LIMIT_REFILL_MS,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Milliseconds per refilled token"
    )]
    pub rate_limit_refill_ms: u64,
    #[arg(
        long,
        env = "SC_OTA_MODEL_MAX_SIZE",
        default_value_t = DEFAULT_MODEL_MAX_SIZE,
        help = "Max model upload size in bytes"
    )]
    pub model_max_size: u64,
    #[arg(
        long,
        env = "SC_OTA_RESULT_MAX_SIZE",
        default_value_t = DEFAULT_RESULT_MAX_SIZE,
        help = "Max result upload size in bytes"
    )]
    pub result_max_size: u64,
    #[arg(
        long,
        env = "SC_OTA_TEMP_TTL_SECS",
        default_value_t = DEFAULT_TEMP_TTL_SECS,
        help = "Stale upload temp file cleanup threshold in seconds (0 to disable)"
    )]
    pub temp_ttl_secs: u64,
}
