use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use curio::config::Config;
use curio::market::{CollectionId, HttpMarketClient, MarketClient};
use curio::pager;
use curio::wallet::{Address, OfflineWallet};

#[derive(Parser, Debug)]
#[command(name = "curio-probe")]
#[command(about = "Drain a marketplace collection listing and print it as JSON")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/curio/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Collection contract to list
  collection: String,

  /// Override the configured page size
  #[arg(short, long)]
  page_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("curio=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  // Listing calls never sign anything, so an offline wallet suffices.
  let wallet = Arc::new(OfflineWallet::new(Address::new("0x0")));
  let market = HttpMarketClient::new(&config.market, config.market_api_key(), wallet)?;

  let collection = CollectionId::new(&args.collection);
  let page_size = args.page_size.unwrap_or(config.market.page_size);
  let items = pager::drain(page_size, |cursor| {
    market.items_by_collection(&collection, cursor, page_size)
  })
  .await?;

  tracing::info!(collection = %collection, count = items.len(), "listing drained");
  println!("{}", serde_json::to_string_pretty(&items)?);

  Ok(())
}
