use anyhow::Result;
use clap::Parser;
use trellis_core::{config::AppConfig, http::Response};
use trellis_services::{
    http::{Ctx, EngineBuilder},
    middleware::handler_fn,
};

mod server;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the config file (TOML or JSON)
    #[clap(short, long, value_parser)]
    config: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read(&args.config)?;
    let config = AppConfig::from_slice(&raw)?;
    tracing::info!(
        workers = config.runtime.worker_threads,
        "starting trellis"
    );
    server::run(config, routes)
}

fn routes(builder: &mut EngineBuilder) {
    builder
        .get("/", handler_fn(|_| async { Ok(Response::text("trellis up\n")) }))
        .name("home");

    builder
        .get(
            "/users/{id:int}",
            handler_fn(|ctx: Ctx| async move {
                let id = ctx.param("id").and_then(|v| v.as_int()).unwrap_or_default();
                Ok(Response::json(&serde_json::json!({ "id": id })))
            }),
        )
        .name("users.show");

    builder.group("/api", vec![], |api| {
        api.name("api");
        api.get(
            "/health",
            handler_fn(|_| async { Ok(Response::json(&serde_json::json!({ "ok": true }))) }),
        )
        .name("health");
    });

    // static file demo with range and conditional support
    builder.get(
        "/files/{*path}",
        handler_fn(|ctx: Ctx| async move {
            let relative = ctx
                .param("path")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let response = Response::download(format!("public/{relative}"), None)
                .honor_range(ctx.request().header("range"))
                .conditional(ctx.request().header("if-modified-since"));
            Ok(response)
        }),
    );
}
