use std::io;
use std::sync::Arc;

use tower_http::cors::CorsLayer;

use mediarank::config::Config;
use mediarank::db::{MemoryRatingStore, RatingStore, SqliteRatingStore};
use mediarank::tournament::Session;
use mediarank::{api, maintenance, metrics, scan};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load().expect("Invalid configuration");
    metrics::register_metrics();

    let media_dir = config.media_dir.clone();
    let key_mode = config.key_mode;
    let items = tokio::task::spawn_blocking(move || scan::scan_media(&media_dir, key_mode))
        .await
        .expect("Media scan task panicked")
        .expect("Failed to scan media directory");

    if config.memory_store {
        tracing::warn!("Using in-memory rating store; ratings are lost on exit");
        run(MemoryRatingStore::new(), &config, &items).await;
    } else {
        let store = SqliteRatingStore::new(&config.database_url)
            .await
            .expect("Failed to initialize database");
        run(store, &config, &items).await;
    }
}

async fn run<S: RatingStore + 'static>(store: S, config: &Config, items: &[String]) {
    let rec = maintenance::reconcile(&store, items)
        .await
        .expect("Failed to reconcile ratings with media directory");

    if config.prune {
        let stdin = io::stdin();
        let removed = maintenance::prune_orphans(
            &store,
            &rec.orphans,
            config.assume_yes,
            &mut stdin.lock(),
            &mut io::stdout(),
        )
        .await
        .expect("Failed to prune orphaned ratings");
        println!("Removed {removed} orphaned rating rows");
        return;
    }

    if items.len() < 2 {
        tracing::warn!(
            "Only {} media items found in {}; matchups need at least two",
            items.len(),
            config.media_dir.display()
        );
    }

    let session = Arc::new(Session::new(store, config.session_config()));
    let app = api::router(session).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(
        "mediarank listening on {addr} ({} items, K={})",
        items.len(),
        config.k
    );
    axum::serve(listener, app).await.expect("Server error");
}
