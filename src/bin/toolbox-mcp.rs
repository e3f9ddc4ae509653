use clap::Parser;
use toolbox::{load_dotenv, serve_stdio, ServerArgs, ServerConfig, Toolbox};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let args = ServerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "toolbox_mcp=info,toolbox=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = ServerConfig::from_args(args)?;
    tracing::info!(
        "toolbox-mcp starting (data_dir={}, api_key_set={})",
        config.data_dir.display(),
        config.api_key.is_some()
    );

    let toolbox = Toolbox::new(config)?;
    serve_stdio(&toolbox).await?;

    tracing::info!("toolbox-mcp stopped");
    Ok(())
}
