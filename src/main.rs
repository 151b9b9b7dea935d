use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
};

use color_eyre::eyre::{Context, Result};
use huntql::args::{Command, parse_args};
use huntql_dialects::compiler_for;
use huntql_schema::load_schema;
use huntql_server::{config::load_config, http_server::create_axum_app};
use huntql_translate::{BuildRequest, Dialect};
use mimalloc::MiMalloc;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("SIGINT/Ctrl+C received, starting graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("SIGTERM received, starting graceful shutdown");
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn serve(listen: String, config: PathBuf) -> Result<()> {
    let config = load_config(&config)?;
    let app = create_axum_app(config)?;
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;

    info!("Listening on {listen}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum serve")?;

    Ok(())
}

fn read_request(source: &str) -> Result<BuildRequest> {
    let content = if source == "-" {
        let mut content = String::new();
        io::stdin()
            .read_to_string(&mut content)
            .context("failed to read request from stdin")?;
        content
    } else {
        fs::read_to_string(source).with_context(|| format!("failed to read request: {source}"))?
    };

    serde_json::from_str(&content).with_context(|| format!("failed to parse request: {source}"))
}

fn build(dialect: Dialect, schema: PathBuf, request: String) -> Result<()> {
    let schema = load_schema(&schema)?;
    let request = read_request(&request)?;
    let result = compiler_for(dialect).compile(&schema, &request)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.log_json {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();

        color_eyre::config::HookBuilder::default()
            .theme(color_eyre::config::Theme::new())
            .install()?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(io::stderr)
            .init();
        color_eyre::install()?;
    }

    info!(?args, "Init");

    match args.command {
        Command::Serve { listen, config } => serve(listen, config).await,
        Command::Build {
            dialect,
            schema,
            request,
        } => build(dialect, schema, request),
    }
}
