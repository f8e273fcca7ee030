use clap::Parser;
use lintel::middleware::auth::require_auth;
use lintel::{Method, Request, Response, Router, Server};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "lintel", version, about = "HTTP server with one structured log line per request")]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 9126)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let app = Router::new()
        .on(Method::Get, "/", index)
        .on(Method::Get, "/unauth", unauth)
        .on(Method::Get, "/auth", require_auth(auth));

    info!("starting on :{}", cli.port);
    if let Err(e) = Server::bind(&format!("0.0.0.0:{}", cli.port)).serve(app).await {
        error!(error = %e, "unexpected error serving");
        std::process::exit(1);
    }
}

async fn index(_req: Request) -> Response {
    info!("index handler");
    Response::status(200)
}

async fn unauth(_req: Request) -> Response {
    info!("handle unauth");
    Response::status(200)
}

async fn auth(_req: Request) -> Response {
    info!("handle auth");
    Response::status(200)
}
