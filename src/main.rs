use rmcp::{ServiceExt, transport::stdio};

use kiln::config::Config;
use kiln::server::KilnServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // MCP clients may start the server from any CWD: prefer a .env beside the
    // binary, then the project root of a development build, then the CWD.
    let beside_binary = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .into_iter()
        .flat_map(|dir| [dir.join(".env"), dir.join("../../.env")])
        .find(|path| path.exists());
    match beside_binary {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing::info!("kiln starting");

    let config = Config::load();
    let server = KilnServer::new(config);

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    tracing::info!("kiln shutting down");
    Ok(())
}
