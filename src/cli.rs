//! Command-line interface for zrelay
//!
//! Provides argument parsing and subcommand handling for the zrelay binary.

use clap::{Parser, Subcommand};

/// OpenAI-compatible gateway for the Z.AI chat upstream
#[derive(Parser)]
#[command(name = "zrelay")]
#[command(version)]
#[command(about = "OpenAI-compatible gateway for the Z.AI chat upstream")]
#[command(
    long_about = "zrelay exposes an OpenAI-compatible chat completions API and translates \
    each request to the upstream provider, rotating upstream credentials and relaying \
    streamed responses as OpenAI chunks."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate the configuration file and exit
    Check,
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# zrelay Configuration
# =====================
#
# This file configures the HTTP server, client authentication, the upstream
# provider, the public model table, the credential pool, request translation,
# response relay and logging.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on. Changing host or port needs a restart; everything else
# can be hot-reloaded with POST /admin/reload.
port = 8080

# ─────────────────────────────────────────────────────────────────────────────
# CLIENT AUTHENTICATION
# ─────────────────────────────────────────────────────────────────────────────

[auth]
# Bearer tokens accepted on /v1/*. An empty list rejects every request.
api_keys = ["sk-change-me"]

# Bearer token for /admin/*. Omit to disable the admin API.
# admin_key = "admin-change-me"

# ─────────────────────────────────────────────────────────────────────────────
# UPSTREAM
# ─────────────────────────────────────────────────────────────────────────────

[upstream]
# Wire protocol: "zai" (Z.AI web chat) or "openai" (any OpenAI-compatible API)
protocol = "zai"
base_url = "https://chat.z.ai"

# Covers connect, response headers and the whole streamed body
request_timeout_seconds = 120
connect_timeout_seconds = 10

# Attempts per credential for network errors and 5xx (backoff doubles, max 30s)
max_retries = 3
retry_backoff_ms = 100

max_idle_connections = 32
keepalive_seconds = 90

# ─────────────────────────────────────────────────────────────────────────────
# MODELS
# ─────────────────────────────────────────────────────────────────────────────
#
# Public model ids clients send in `model`, mapped to upstream model ids.
# Unknown ids are rejected with 400 model_not_found.

[[models]]
id = "GLM-4.5"
upstream_id = "0727-360B-API"

[[models]]
id = "gpt-4"
upstream_id = "0727-360B-API"
name = "GLM-4.5"

# ─────────────────────────────────────────────────────────────────────────────
# CREDENTIAL POOL
# ─────────────────────────────────────────────────────────────────────────────

[pool]
# "round_robin", "least_recently_used" or "random"
selection = "round_robin"

# 1 = a credential serves one request at a time
max_concurrent_per_credential = 1

# How long a request waits for a free credential before answering 503
lease_timeout_ms = 5000

# Consecutive failures before a credential is expired and refreshed
failure_threshold = 3

# Expire tokens older than this (optional)
# token_ttl_seconds = 3600

# Re-sign-in every credential with secrets on this interval (optional, >= 60)
# auto_refresh_interval_seconds = 1800

# Give up on a sign-in that has not answered after this long (1-600)
sign_in_timeout_seconds = 30

# One of:
#   "token"
#   "email----password----token"
#   "email----password"          (signed in at startup)
credentials = [
    "your-upstream-token",
]

# ─────────────────────────────────────────────────────────────────────────────
# TRANSLATION
# ─────────────────────────────────────────────────────────────────────────────

[translation]
# Request fields the upstream cannot honour are rejected with 400 unless
# listed here, in which case they are dropped silently. Options: tools,
# tool_choice, presence_penalty, frequency_penalty, stop, n, image_content
droppable_fields = ["presence_penalty", "frequency_penalty"]

# ─────────────────────────────────────────────────────────────────────────────
# RELAY
# ─────────────────────────────────────────────────────────────────────────────

[relay]
# Chunks buffered between the upstream reader and a slow client
channel_capacity = 32

# Wrap upstream reasoning in <think>...</think> instead of dropping it
show_think_tags = false

# Used when a request omits `stream`
default_stream = false

# Seconds between SSE keep-alive comments
keepalive_seconds = 15

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}
