//! ledgerdash - accounts, cards, loans and crypto at a glance.
//!
//! A thin consumer of the ledgerdash query engine: every panel is a query
//! binding over one shared client, so repeated reads within the stale window
//! are served from the cache.

mod render;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ledgerdash_core::api::ApiClient;
use ledgerdash_core::config::Config;
use ledgerdash_core::dashboard::{Dashboard, FreezeCard};
use ledgerdash_core::query::{QueryBinding, QueryClient, QueryData, QueryState, TracingObserver};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default refresh period for `watch`, in seconds
const DEFAULT_WATCH_SECS: u64 = 30;

/// How long `freeze` waits for the card list to come back after the write
const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

const USAGE: &str = "\
Usage: ledgerdash [COMMAND]

Commands:
  summary                 Accounts, cards, loans and crypto (default)
  transactions <ACCOUNT>  Recent transactions for one account
  freeze <CARD>           Freeze a card
  unfreeze <CARD>         Unfreeze a card
  watch [SECONDS]         Re-render the summary as data refreshes
  config                  Show the effective configuration";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=ledgerdash_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("summary");

    let config = Config::load().context("Failed to load configuration")?;
    info!(api = %config.api_base_url, "ledgerdash starting");

    let api = ApiClient::from_config(&config)?;
    let client = QueryClient::builder()
        .defaults(config.query.clone())
        .observer(Arc::new(TracingObserver))
        .build();
    let dashboard = Dashboard::new(client, api);

    match command {
        "summary" => summary(&dashboard).await,
        "transactions" => {
            let account_id = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("transactions needs an account id\n\n{}", USAGE))?;
            transactions(&dashboard, account_id).await
        }
        "freeze" | "unfreeze" => {
            let card_id = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("{} needs a card id\n\n{}", command, USAGE))?;
            let request = if command == "freeze" {
                FreezeCard::freeze(card_id.as_str())
            } else {
                FreezeCard::unfreeze(card_id.as_str())
            };
            freeze(&dashboard, request).await
        }
        "watch" => {
            let secs = match args.get(1) {
                Some(s) => s.parse().with_context(|| format!("Invalid interval: {}", s))?,
                None => DEFAULT_WATCH_SECS,
            };
            watch(&dashboard, Duration::from_secs(secs)).await
        }
        "config" => show_config(&config),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => Err(anyhow::anyhow!("Unknown command: {}\n\n{}", other, USAGE)),
    }
}

/// Wait for the binding's current fetch to finish.
async fn settled<T: QueryData>(binding: &QueryBinding<T>) -> Result<QueryState<T>> {
    let mut rx = binding.watch();
    let state = rx
        .wait_for(|state| !state.is_loading)
        .await
        .context("Query binding closed")?
        .clone();
    Ok(state)
}

async fn summary(dashboard: &Dashboard) -> Result<()> {
    let accounts = dashboard.watch(dashboard.accounts_query());
    let cards = dashboard.watch(dashboard.cards_query());
    let loans = dashboard.watch(dashboard.loans_query());
    let crypto = dashboard.watch(dashboard.crypto_query());

    let (accounts, cards, loans, crypto) = tokio::try_join!(
        settled(&accounts),
        settled(&cards),
        settled(&loans),
        settled(&crypto),
    )?;

    let mut out = String::new();
    render::accounts(&mut out, &accounts);
    render::cards(&mut out, &cards);
    render::loans(&mut out, &loans);
    render::crypto(&mut out, &crypto);
    print!("{}", out);
    Ok(())
}

async fn transactions(dashboard: &Dashboard, account_id: &str) -> Result<()> {
    let binding = dashboard.watch(dashboard.transactions_query(account_id));
    let state = settled(&binding).await?;

    let mut out = String::new();
    render::transactions(&mut out, account_id, &state);
    print!("{}", out);
    Ok(())
}

async fn freeze(dashboard: &Dashboard, request: FreezeCard) -> Result<()> {
    // Warm the card list so the optimistic update has something to flip
    let cards = dashboard.watch(dashboard.cards_query());
    settled(&cards).await?;

    let mutation = dashboard.freeze_card();
    match mutation.mutate_async(request.clone()).await {
        Ok(card) => println!(
            "{} is now {}",
            card.display_name(),
            card.status.label().to_lowercase()
        ),
        Err(err) => {
            eprintln!("Could not update card {}: {}", request.card_id, render::describe_error(&err));
        }
    }

    // The mutation invalidates and reloads the list; show the server's view
    let mut rx = cards.watch();
    let reloaded = tokio::time::timeout(
        RELOAD_TIMEOUT,
        rx.wait_for(|state| state.data.is_some() || state.error.is_some()),
    )
    .await;
    if reloaded.is_err() {
        warn!(card_id = %request.card_id, "Card list did not reload in time");
    }
    let mut out = String::new();
    render::cards(&mut out, &cards.state());
    print!("{}", out);
    Ok(())
}

async fn watch(dashboard: &Dashboard, every: Duration) -> Result<()> {
    let accounts = dashboard.watch(dashboard.accounts_query().refetch_interval(every));
    let cards = dashboard.watch(dashboard.cards_query().refetch_interval(every));
    let loans = dashboard.watch(dashboard.loans_query().refetch_interval(every));
    let crypto = dashboard.watch(dashboard.crypto_query().refetch_interval(every));

    let mut accounts_rx = accounts.watch();
    let mut cards_rx = cards.watch();
    let mut loans_rx = loans.watch();
    let mut crypto_rx = crypto.watch();

    loop {
        let (a, c, l, x) = tokio::try_join!(
            settled(&accounts),
            settled(&cards),
            settled(&loans),
            settled(&crypto),
        )?;

        let mut out = String::new();
        render::accounts(&mut out, &a);
        render::cards(&mut out, &c);
        render::loans(&mut out, &l);
        render::crypto(&mut out, &x);
        println!("{}", out);

        // Mark what we rendered as seen, then wait for any panel to change
        let _ = accounts_rx.borrow_and_update();
        let _ = cards_rx.borrow_and_update();
        let _ = loans_rx.borrow_and_update();
        let _ = crypto_rx.borrow_and_update();
        tokio::select! {
            changed = accounts_rx.changed() => changed?,
            changed = cards_rx.changed() => changed?,
            changed = loans_rx.changed() => changed?,
            changed = crypto_rx.changed() => changed?,
        }
    }
}

fn show_config(config: &Config) -> Result<()> {
    println!("Config file: {}", Config::config_path()?.display());
    let mut shown = config.clone();
    if shown.api_token.is_some() {
        shown.api_token = Some("<redacted>".to_string());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&shown).context("Failed to serialize config")?
    );
    Ok(())
}
