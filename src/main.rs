//! servekit - demo server and REST client command line

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json,
};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use servekit::client::Client;
use servekit::config::Config;
use servekit::server::handlers::{self, ErrorResponse};
use servekit::server::{Middleware, Mode, Server};
use servekit::Context;

#[derive(Parser)]
#[command(name = "servekit")]
#[command(about = "Demo HTTP server and REST client built on servekit")]
#[command(version)]
struct Cli {
    /// YAML config file; the environment is used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the demo HTTP server
    Serve {
        /// Seconds to wait for in-flight requests on Ctrl-C
        #[arg(long, default_value = "5")]
        grace: u64,
    },

    /// GET a path and print the JSON response
    Get {
        /// Path relative to the client base URL, or an absolute URL
        path: String,
    },

    /// Stream a path into a file
    Download {
        /// Path relative to the client base URL, or an absolute URL
        path: String,

        /// Destination file
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment
    let _ = dotenvy::dotenv();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    // Initialize logging
    let log_level = if cli.verbose || config.server.mode == Mode::Debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("servekit={},tower_http=debug", log_level).into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { grace } => {
            let server = Arc::new(build_demo_server(config)?);

            let signal_server = server.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                let ctx = Context::with_timeout(Duration::from_secs(grace));
                if let Err(e) = signal_server.shutdown(&ctx).await {
                    tracing::warn!("Shutdown incomplete: {}", e);
                }
            });

            let addr = server.config().addr();
            println!("servekit demo server running at http://{}", addr);
            println!("  Ping:    http://{}/ping", addr);
            println!("  Health:  http://{}/health", addr);
            println!("  Private: http://{}/private/profile", addr);

            server.start().await?;
        }

        Commands::Get { path } => {
            let client = Client::new(config.client)?;
            let ctx = cancel_on_ctrl_c();

            let value: Value = client.get(&ctx, &path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        Commands::Download { path, output } => {
            let client = Client::new(config.client)?;
            let ctx = cancel_on_ctrl_c();

            let mut file = tokio::fs::File::create(&output).await?;
            let written = client.download(&ctx, &path, &mut file).await?;
            println!("✓ Wrote {} bytes to {}", written, output.display());
        }
    }

    Ok(())
}

fn build_demo_server(config: Config) -> anyhow::Result<Server> {
    let mut server = Server::new(config.server);

    server.register_middleware([Middleware::new(CorsLayer::permissive())]);
    server.register_route("GET", "/health", handlers::health)?;

    server.register_routes(|rg| {
        rg.get("/ping", ping).post("/echo", echo);
    });

    server.register_private_routes(
        |rg| {
            rg.get("/profile", profile);
        },
        [Middleware::new(middleware::from_fn(require_authorization))],
    );

    Ok(server)
}

/// A context cancelled by Ctrl-C
fn cancel_on_ctrl_c() -> Context {
    let ctx = Context::background();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    ctx
}

async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn profile() -> Json<Value> {
    Json(json!({ "user": "current user" }))
}

/// Demo gate for `/private`: any request without an Authorization header is turned away
async fn require_authorization(request: Request, next: Next) -> Response {
    if request.headers().contains_key(header::AUTHORIZATION) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("missing Authorization header")),
        )
            .into_response()
    }
}
