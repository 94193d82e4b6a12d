//! Paper trading loop daemon
//!
//! Runs one configured job against the simulated paper product with a
//! deterministic oscillating price feed. Useful for exercising loop
//! behavior end to end without touching a real exchange.
//!
//! ## Setup
//!
//! 1. Create a `loopd.toml` in the working directory:
//!    ```toml
//!    [job]
//!    name = "btc-loops"
//!    exchange = "hyperliquid"
//!    product = "BTC-EUR"
//!    currency = "EUR"
//!    fee_percent = "0.25"
//!    id_seed = "change-me"
//!
//!    [[job.pairs]]
//!    buy_price = "100"
//!    sell_price = "110"
//!    size = "1"
//!    cancel_distance = "20"
//!    ```
//!
//! 2. Run the daemon:
//!    ```bash
//!    cargo run --bin loopd -- loopd
//!    ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use rust_decimal::Decimal;
use tokio::sync::watch;

use gridloop::grid::product::paper::PaperProduct;
use gridloop::grid::{JobState, LoopRunner, RunnerConfig, TradeLoop};
use gridloop::store::{names, MemoryStore, Store};
use gridloop::Settings;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match dotenvy::dotenv() {
        Ok(path) => info!("loaded environment from {}", path.display()),
        Err(_) => info!("no .env file found, using system environment variables"),
    }

    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or("loopd");
    let settings = match Settings::new(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load config '{config_path}': {e}");
            return;
        }
    };

    let fee_percent = match settings.job.fee_percent() {
        Ok(fee) => fee,
        Err(e) => {
            error!("{e}");
            return;
        }
    };
    let pairs = match settings.job.pairs() {
        Ok(pairs) if !pairs.is_empty() => pairs,
        Ok(_) => {
            error!("no trade pairs configured");
            return;
        }
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    info!(
        "job '{}': {} on {} with {} pairs",
        settings.job.name,
        settings.job.product,
        settings.job.exchange,
        pairs.len()
    );

    // feed band: slightly beyond the outermost points so both sides cross
    let low_buy = pairs.iter().map(|p| p.buy.price).min().unwrap_or_default();
    let high_sell = pairs.iter().map(|p| p.sell.price).max().unwrap_or_default();
    let pad = (high_sell - low_buy) / Decimal::from(10);

    let store = Arc::new(MemoryStore::new());
    let product = Arc::new(PaperProduct::new(
        settings.job.product.clone(),
        settings.job.currency.clone(),
        Decimal::new(1, 4),
        fee_percent,
    ));

    // create or resume the job by name
    let job = {
        let mut txn = match store.begin(true).await {
            Ok(txn) => txn,
            Err(e) => {
                error!("failed to open store transaction: {e}");
                return;
            }
        };
        let existing = match names::resolve(txn.as_mut(), &settings.job.name).await {
            Ok(existing) => existing,
            Err(e) => {
                error!("name lookup failed: {e}");
                return;
            }
        };
        let job = match existing {
            Some(id) => match JobState::load(id, txn.as_mut()).await {
                Ok(job) => {
                    info!("resuming job {} at id offset {}", job.id, job.id_offset);
                    job
                }
                Err(e) => {
                    error!("failed to load job: {e}");
                    return;
                }
            },
            None => {
                let mut job = JobState::new(
                    settings.job.exchange.clone(),
                    settings.job.product.clone(),
                    settings.job.currency.clone(),
                    fee_percent,
                    pairs.iter().cloned().map(TradeLoop::new).collect(),
                );
                info!("created job {} for '{}'", job.id, settings.job.name);
                let bound = names::bind(txn.as_mut(), &settings.job.name, job.id).await;
                let saved = job.save(txn.as_mut()).await;
                if let Err(e) = bound.map_err(|e| e.to_string()).and(saved.map_err(|e| e.to_string())) {
                    error!("failed to register job: {e}");
                    return;
                }
                job
            }
        };
        if let Err(e) = txn.commit().await {
            error!("failed to commit job registration: {e}");
            return;
        }
        job
    };

    let runner_config = RunnerConfig {
        flush_interval: Duration::from_secs(settings.runner.flush_interval_secs),
        watch_only: settings.runner.watch_only,
    };
    let mut runner = LoopRunner::new(
        job,
        &settings.job.id_seed,
        product.clone(),
        store,
        runner_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    // deterministic triangle-wave feed across the configured band
    let feeder = {
        let product = product.clone();
        let stop = shutdown_rx.clone();
        let low = low_buy - pad;
        let high = high_sell + pad;
        tokio::spawn(async move {
            let step = (high - low) / Decimal::from(20);
            let mut price = (low + high) / Decimal::from(2);
            let mut rising = true;
            while !*stop.borrow() {
                product.push_price(price).await;
                if rising {
                    price += step;
                    if price >= high {
                        rising = false;
                    }
                } else {
                    price -= step;
                    if price <= low {
                        rising = true;
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
    };

    let result = runner.run(shutdown_rx).await;
    feeder.abort();
    let _ = feeder.await;

    for report in runner.report() {
        info!(
            "loop {}: {} buys / {} sells, holdings {}, next {:?}{}",
            report.index,
            report.buys,
            report.sells,
            report.holdings,
            report.action,
            report
                .halted
                .map(|r| format!(" (halted: {r})"))
                .unwrap_or_default()
        );
    }

    match result {
        Ok(()) => match serde_json::to_string_pretty(&runner.job().summary) {
            Ok(rendered) => info!("final summary:\n{rendered}"),
            Err(e) => error!("failed to render summary: {e}"),
        },
        Err(e) => error!("runner exited with error: {e}"),
    }
}
