use std::io;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};

use ballot_ledger::cipher::PayloadCipher;
use ballot_ledger::config::LedgerConfig;
use ballot_ledger::ledger::Ledger;
use ballot_ledger::service::{self, AppState};
use ballot_ledger::store::{BlockStore, JsonLinesStore};
use ballot_ledger::tally::TallyAggregator;

fn to_io<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = LedgerConfig::from_env().map_err(to_io)?;

    let store = JsonLinesStore::open(&config.data_path).map_err(|e| {
        error!("Failed to open block store {}: {}", config.data_path.display(), e);
        to_io(e)
    })?;
    let existing = store.load().map_err(to_io)?.len();

    let key = config.load_key(existing).map_err(|e| {
        error!("Failed to load payload key: {}", e);
        to_io(e)
    })?;

    let ledger = Ledger::open(Box::new(store), PayloadCipher::new(key)).map_err(to_io)?;

    let report = ledger.verify_chain();
    if report.is_valid() {
        info!("Chain verified: {} blocks", report.blocks_checked);
    } else {
        warn!(
            "Chain verification found {} faulty blocks",
            report.failures().count()
        );
    }

    let state = web::Data::new(AppState {
        ledger: Arc::new(ledger),
        tally: Arc::new(TallyAggregator::new(config.tally_ttl)),
    });

    info!("Listening on {}", config.listen_addr);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(service::routes))
        .bind(&config.listen_addr)?
        .run()
        .await
}
