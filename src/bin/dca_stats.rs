use anyhow::Context;
use clap::Parser;
use dcabot::config::Settings;
use dcabot::db::{PostgresStore, TradeStore};
use dcabot::exchange::{Exchange, OkxClient, OkxCredentials};
use dcabot::notify::format::{format_money, format_percent, format_units};
use dcabot::portfolio::{blend_breakdown, compute_stats, pnl_percent, unrealized_pnl};
use std::path::PathBuf;

/// Print portfolio statistics from the trade ledger
#[derive(Parser, Debug)]
#[command(name = "dca_stats")]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the live price lookup
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("dcabot=warn")
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Invalid configuration")?;
    let plan = settings.plan()?;

    let url = settings
        .database
        .url
        .as_deref()
        .context("database.url is required to read the trade ledger")?;
    let store = PostgresStore::new(url).await?;
    let trades = store.all_trades().await?;
    let stats = compute_stats(&trades, &plan.initial);

    println!("\n═══════════════════════════════════════════════════════");
    println!("                 DCA PORTFOLIO STATISTICS");
    println!("═══════════════════════════════════════════════════════\n");

    if stats.is_empty() {
        println!("No trades yet.");
        return Ok(());
    }

    println!("Trades:          {}", stats.num_trades);
    println!("Total invested:  ${}", format_money(stats.total_spent_usd, 2));
    println!("Total units:     {}", format_units(stats.total_units));
    println!("Average price:   ${}", format_money(stats.mean_price, 2));
    if let (Some(first), Some(last)) = (stats.first_trade_at, stats.last_trade_at) {
        println!("First trade:     {}", first.format("%Y-%m-%d %H:%M UTC"));
        println!("Latest trade:    {}", last.format("%Y-%m-%d %H:%M UTC"));
    }

    if !plan.initial.is_empty() {
        let breakdown = blend_breakdown(&stats, &plan.initial);
        println!(
            "\nInitial holding: {} @ ${}",
            format_units(breakdown.initial.units),
            format_money(breakdown.initial.avg_price, 2)
        );
        println!(
            "Accumulated:     {} @ ${}",
            format_units(breakdown.accumulated.units),
            format_money(breakdown.accumulated.avg_price, 2)
        );
    }

    if cli.offline {
        return Ok(());
    }

    let credentials = OkxCredentials {
        api_key: settings.exchange.api_key.clone(),
        api_secret: settings.exchange.api_secret.clone(),
        passphrase: settings.exchange.api_passphrase.clone(),
    };
    let okx = OkxClient::new(&settings.exchange.base_url, &settings.exchange.symbol, credentials)?;

    match okx.get_price().await {
        Ok(price) => {
            println!("\nCurrent price:   ${}", format_money(price, 2));
            println!("Current value:   ${}", format_money(stats.current_value(price), 2));
            println!(
                "Unrealized PnL:  ${} ({})",
                format_money(unrealized_pnl(&stats, price), 2),
                format_percent(pnl_percent(&stats, price))
            );
        }
        Err(e) => println!("\nCurrent price unavailable: {}", e),
    }

    Ok(())
}
