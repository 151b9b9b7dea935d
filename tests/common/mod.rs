use color_eyre::Result;
use huntql_server::{config::Config, http_server::create_axum_app};
use tokio::net::TcpListener;

/// Initialize test infrastructure with color_eyre and tracing.
/// Call this from a #[ctor] function in each test file.
pub fn init_test_tracing() {
    use tracing_subscriber::{
        filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    };

    color_eyre::install().unwrap();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_test_writer())
        .init();
}

pub fn repo_path(relative: &str) -> String {
    format!("{}/{relative}", env!("CARGO_MANIFEST_DIR"))
}

/// Serves the app on an ephemeral port and returns its base url.
#[allow(dead_code)]
pub async fn spawn_app(config: Config) -> Result<String> {
    let app = create_axum_app(config)?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(format!("http://{addr}"))
}
