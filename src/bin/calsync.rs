//! Run one sync of a CalDAV account into a local cache file
//!
//! Usage: `calsync <config.json> <cache.json>`, with the credentials in the `CALSYNC_USERNAME` and `CALSYNC_PASSWORD` environment variables.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use calsync::cache::Cache;
use calsync::config::SyncConfig;
use calsync::credentials::{Credentials, StaticCredentials};
use calsync::provider::registry::ProviderRegistry;
use calsync::provider::sync_progress::feedback_channel;
use calsync::provider::{CalDavProvider, SyncService};
use calsync::throttle::NoThrottle;
use calsync::traits::EventStore;
use calsync::EventSource;

/// The local user every synced event is attributed to
const LOCAL_USER: &str = "me";


#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <config.json> <cache.json>", args.get(0).map(|s| s.as_str()).unwrap_or("calsync"));
        std::process::exit(2);
    }

    let config = match SyncConfig::from_file(Path::new(&args[1])) {
        Err(err) => {
            eprintln!("Invalid configuration: {}", err);
            std::process::exit(1);
        },
        Ok(config) => config,
    };

    let (username, password) = match (std::env::var("CALSYNC_USERNAME"), std::env::var("CALSYNC_PASSWORD")) {
        (Ok(u), Ok(p)) => (u, p),
        _ => {
            eprintln!("CALSYNC_USERNAME and CALSYNC_PASSWORD must be set");
            std::process::exit(1);
        },
    };
    let credentials = StaticCredentials::new().with(LOCAL_USER, Credentials::new(username, password));

    let cache_path = Path::new(&args[2]);
    let cache = match Cache::from_file(cache_path) {
        Ok(cache) => cache,
        Err(err) => {
            log::warn!("Invalid cache file: {}. Using a default cache", err);
            Cache::new(cache_path)
        }
    };
    let store: Arc<dyn EventStore> = Arc::new(cache);

    let provider = CalDavProvider::new(config.clone(), Arc::new(credentials));
    let registry = ProviderRegistry::new().with(Arc::new(provider));
    let window = config.default_window(Utc::now());
    let service = SyncService::new(registry, Arc::clone(&store), Arc::new(NoThrottle), config);

    let (sender, mut receiver) = feedback_channel();
    let printer = tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            println!("~~~~> {}", *receiver.borrow());
        }
    });

    let report = service.sync_with_feedback(LOCAL_USER, EventSource::CalDav, sender).await;
    let _ = printer.await;

    println!("Scanned {} events, saved {} new ones", report.scanned, report.saved);
    if let Some(diagnostic) = &report.diagnostic {
        println!("{}", diagnostic);
    }

    match store.find_by_user(LOCAL_USER).await {
        Err(err) => log::error!("Unable to read the cache: {}", err),
        Ok(events) => {
            let occurrences = calsync::expand(&events, &window);
            println!("---- {} occurrences in the sync window -----", occurrences.len());
            calsync::utils::print_occurrences(&occurrences);
        },
    }

    if report.success == false {
        std::process::exit(1);
    }
}
