pub mod handlers;
pub mod html;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::collector::Collector;
use crate::config::Settings;
use crate::db::{PriceRepository, SqliteRepository};
use crate::error::Result;

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub repo: Arc<dyn PriceRepository>,
    pub collector: Arc<Collector>,
    /// Held for the whole collect + extract run so two triggers never interleave.
    scrape_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(settings: Settings, repo: Arc<dyn PriceRepository>, collector: Collector) -> Self {
        Self {
            settings: Arc::new(settings),
            repo,
            collector: Arc::new(collector),
            scrape_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/prices", get(handlers::list_prices))
        .route("/prices/", get(handlers::list_prices))
        .route("/prices/cheapest", get(handlers::cheapest))
        .route("/prices/cheapest/", get(handlers::cheapest))
        .route("/prices/:id", get(handlers::get_price))
        .route("/scrape/:source", get(handlers::scrape))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store, bind the configured address and serve until ctrl-c.
pub async fn serve(settings: Settings) -> Result<()> {
    let repo = Arc::new(SqliteRepository::open(&settings.db_path)?);
    let collector = Collector::new(&settings)?;
    let addr = settings.socket_addr()?;
    let app = router(AppState::new(settings, repo, collector));

    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
