/// Smoke-test for `BrowserFetcher`.
///
/// Launches a headless Chromium, renders the live NF-e availability page and
/// runs the table parser over it.
///
/// Run with:
///   cargo run -p nfe-client --example browser_smoke --features browser
use std::sync::Arc;

use nfe_client::{BrowserFetcher, TableParser};
use nfe_core::config::{DEFAULT_TABLE_ID, DEFAULT_URL};
use nfe_core::reference::ReferenceData;
use nfe_core::traits::{Fetcher, SnapshotParser};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let url = std::env::var("NFE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());

    println!("Rendering {url} …");
    let fetcher = BrowserFetcher::new(DEFAULT_TABLE_ID);
    let html = fetcher.fetch(&url).await?;
    println!("Got {} bytes of rendered HTML", html.len());

    let parser = TableParser::new(Arc::new(ReferenceData::builtin()), DEFAULT_TABLE_ID);
    let snapshot = parser.parse(&html);
    assert!(
        snapshot.success(),
        "Parse failed: {:?}",
        snapshot.error_message()
    );

    println!(
        "OK: {} autorizadores, checked at {:?}",
        snapshot.statuses().len(),
        snapshot.checked_at()
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
