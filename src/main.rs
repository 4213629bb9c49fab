use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

use switchpoint::config::Config;
use switchpoint::server::config_routes;
use switchpoint::tokens::preload_tokenizer;
use switchpoint::util::{cors_config_from_env, init_tracing, AppState};

/// Routing decision service for chat-completion requests.
#[derive(Debug, Parser)]
#[command(name = "switchpoint", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "SWITCHPOINT_CONFIG", default_value = "config.json")]
    config: String,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "SWITCHPOINT_BIND", default_value = "127.0.0.1:3456")]
    bind: String,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Tracing first so .env values are visible to clap's env lookups.
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    tracing::info!(
        config = %cli.config,
        providers = config.provider_count(),
        default_model = %config.router.default,
        "configuration loaded"
    );

    // The tokenizer takes noticeable time to build; do it before traffic.
    preload_tokenizer();

    let state = web::Data::new(AppState::from_config(config));
    let bind = cli.bind.clone();

    tracing::info!(%bind, "starting switchpoint");
    HttpServer::new(move || {
        App::new()
            .wrap(cors_config_from_env())
            .app_data(state.clone())
            .configure(config_routes)
    })
    .bind(&bind)
    .with_context(|| format!("binding {bind}"))?
    .run()
    .await?;

    Ok(())
}
