//! zrelay HTTP server
//!
//! Starts an Axum web server exposing an OpenAI-compatible API in front of
//! the Z.AI chat upstream.

use clap::Parser;
use std::net::SocketAddr;
use zrelay::cli::{Cli, Command, generate_config_template};
use zrelay::{config::Config, handlers, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output.as_deref()),
        Some(Command::Check) => check(&cli.config),
        Some(Command::Serve) | None => serve(&cli.config).await,
    }
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Wrote configuration template to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

fn check(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(path)?;
    println!(
        "{} is valid: {} model(s), {} credential(s), upstream {}",
        path,
        config.models.len(),
        config.pool.credentials.len(),
        config.upstream.base_url()
    );
    Ok(())
}

async fn serve(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(path)?;

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting zrelay on {}:{} (upstream {})",
        config.server.host,
        config.server.port,
        config.upstream.base_url()
    );

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let state = handlers::AppState::new(config)?.with_config_path(path);
    let app = handlers::router(state);

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
