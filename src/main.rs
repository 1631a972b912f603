use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payrelay::cli::{Cli, Commands, ServerCommands};
use payrelay::models::server::{NewServer, ServerUpdate};
use payrelay::notification::webhook::WebhookNotifier;
use payrelay::registry::ServerRegistry;
use payrelay::store::postgres::PgStore;
use payrelay::{api, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "payrelay=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(cfg, port).await,
        Some(Commands::Server { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            let registry = ServerRegistry::new(Arc::new(db));
            handle_server_command(command, &registry).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {e:?}");
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let registry = ServerRegistry::new(Arc::new(db));
    let state = Arc::new(AppState {
        registry,
        webhook: WebhookNotifier::new(),
        config: cfg,
    });

    if state.config.watch_interval_secs > 0 {
        jobs::capacity_watcher::spawn(state.clone());
        tracing::info!(
            interval_secs = state.config.watch_interval_secs,
            "capacity watcher started"
        );
    }

    let app = axum::Router::new()
        // Health endpoint (no auth)
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        // Admin API — nested under /api/v1 (preserves middleware + fallback)
        .nest("/api/v1", api::api_router(state.clone()))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("payrelay listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response so
/// callers can correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn handle_server_command(
    cmd: ServerCommands,
    registry: &ServerRegistry,
) -> anyhow::Result<()> {
    match cmd {
        ServerCommands::Add {
            name,
            url,
            api_key,
            api_secret,
            capacity,
            priority,
            products,
        } => {
            let created = registry
                .add_server(NewServer {
                    name,
                    url,
                    api_key,
                    api_secret,
                    capacity_limit: capacity,
                    priority,
                    is_active: true,
                    product_id_pool: products,
                })
                .await?;
            println!(
                "Server registered:\n  ID:       {}\n  Name:     {}\n  URL:      {}\n  Capacity: {}\n  Selected: {}",
                created.id, created.name, created.url, created.capacity_limit, created.is_selected
            );
        }
        ServerCommands::List => {
            let servers = registry.get_all_servers().await?;
            if servers.is_empty() {
                println!("No servers registered.");
            } else {
                println!(
                    "{:<6} {:<20} {:<12} {:<12} {:<8} {:<8} {:<8}",
                    "ID", "NAME", "USAGE", "CAPACITY", "PRIO", "ACTIVE", "SELECTED"
                );
                for s in servers {
                    println!(
                        "{:<6} {:<20} {:<12} {:<12} {:<8} {:<8} {:<8}",
                        s.id,
                        s.name,
                        s.current_usage.to_string(),
                        s.capacity_limit.to_string(),
                        s.priority,
                        s.is_active,
                        s.is_selected
                    );
                }
            }
        }
        ServerCommands::Show { id } => match registry.get_server(id).await? {
            Some(s) => {
                println!("ID:        {}", s.id);
                println!("Name:      {}", s.name);
                println!("URL:       {}", s.url);
                println!("Capacity:  {}", s.capacity_limit);
                println!("Usage:     {}", s.current_usage);
                println!("Remaining: {}", s.remaining_capacity());
                println!("Priority:  {}", s.priority);
                println!("Active:    {}", s.is_active);
                println!("Selected:  {}", s.is_selected);
                match s.last_used {
                    Some(t) => println!("Last used: {}", t.to_rfc3339()),
                    None => println!("Last used: never"),
                }
            }
            None => println!("Server not found."),
        },
        ServerCommands::Update {
            id,
            name,
            url,
            capacity,
            priority,
            active,
        } => {
            let updated = registry
                .update_server(
                    id,
                    ServerUpdate {
                        name,
                        url,
                        capacity_limit: capacity,
                        priority,
                        is_active: active,
                        ..Default::default()
                    },
                )
                .await?;
            println!("Server {} updated.", updated.id);
        }
        ServerCommands::Remove { id } => {
            registry.delete_server(id).await?;
            println!("Server deleted.");
        }
        ServerCommands::Select { id } => {
            registry.set_selected_server(id).await?;
            println!("Server {} is now selected.", id);
        }
        ServerCommands::ResetUsage { id } => {
            registry.reset_usage(id).await?;
            println!("Usage reset to zero for server {}.", id);
        }
    }
    Ok(())
}
