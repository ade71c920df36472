use anyhow::Context;
use clap::Parser;
use dcabot::clock::{Clock, SystemClock};
use dcabot::config::Settings;
use dcabot::db::{MemoryStore, PostgresStore, TradeStore};
use dcabot::exchange::{DryRunExchange, Exchange, OkxClient, OkxCredentials};
use dcabot::jobs::DcaJobs;
use dcabot::notify::{CommandPoller, LogNotifier, Notifier, TelegramNotifier};
use dcabot::scheduler::{ScheduleView, Scheduler, PURCHASE_TAG};
use dcabot::AppContext;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file written next to the working directory
const LOG_FILE: &str = "dcabot.log";

#[derive(Parser, Debug)]
#[command(name = "dcabot", about = "Dollar-cost averaging bot for OKX spot markets")]
struct Cli {
    /// TOML config file (defaults to config/dcabot.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulate purchases instead of placing orders
    #[arg(long)]
    dry_run: bool,

    /// Run one purchase cycle as soon as the scheduler starts
    #[arg(long)]
    run_immediately: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Dropping the guard flushes the file writer
    let _log_guard = setup_logging();

    let cli = Cli::parse();
    tracing::info!("🚀 dcabot starting");

    let settings = Settings::load_with_flags(cli.config.as_deref(), cli.dry_run, cli.run_immediately)
        .context("Invalid configuration")?;
    let plan = settings.plan()?;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Amount: ${:.2} per purchase", plan.amount_usd);
    tracing::info!("  Cadence: {}", plan.cadence);
    tracing::info!("  Symbol: {}", settings.exchange.symbol);
    tracing::info!("  Dry run: {}", plan.dry_run);
    if !plan.report_times.is_empty() {
        let times: Vec<String> = plan
            .report_times
            .iter()
            .map(|(h, m)| format!("{:02}:{:02}", h, m))
            .collect();
        tracing::info!("  Summaries: {} UTC", times.join(", "));
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let exchange = create_exchange(&settings)?;
    let store = connect_store(&settings, clock.clone()).await?;

    let telegram = if settings.telegram.is_enabled() {
        Some(TelegramNotifier::new(
            &settings.telegram.base_url,
            &settings.telegram.bot_token,
            settings.telegram.user_id,
            settings.telegram.notification_sound,
        )?)
    } else {
        tracing::warn!("No Telegram bot token configured, notifications go to the log only");
        None
    };
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(telegram) => Arc::new(telegram.clone()),
        None => Arc::new(LogNotifier),
    };

    check_connectivity(exchange.as_ref(), plan.amount_usd).await?;

    let scheduler_options = settings.scheduler_options();
    let specs = plan.job_specs()?;
    let ctx = AppContext::new(plan, exchange, store, notifier, clock.clone());
    let view = ScheduleView::new(clock);

    let runner = Arc::new(DcaJobs::new(ctx.clone(), view.clone()));
    let scheduler = Scheduler::new(view.clone(), specs, runner, scheduler_options);
    scheduler.start()?;

    let (eta_h, eta_m) = scheduler.time_until_next(PURCHASE_TAG);
    tracing::info!("Next purchase in {}h{}m", eta_h, eta_m);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_task = telegram.map(|telegram| {
        let poller = CommandPoller::new(telegram, ctx.clone(), view.clone());
        tokio::spawn(poller.run(shutdown_rx))
    });

    tracing::info!("✅ dcabot running. Press Ctrl+C to stop...");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");

    let _ = shutdown_tx.send(true);
    scheduler.stop().await;
    if let Some(task) = poller_task {
        if let Err(e) = task.await {
            tracing::error!("Command poller ended abnormally: {}", e);
        }
    }

    tracing::info!("👋 dcabot stopped");
    Ok(())
}

/// Log to stdout and to `dcabot.log`.
/// `RUST_LOG` wins when set, otherwise `LOG_LEVEL` (default info) applies to dcabot.
fn setup_logging() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directive(std::env::var("LOG_LEVEL").ok().as_deref()))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

fn default_directive(log_level: Option<&str>) -> String {
    let level = match log_level.map(|l| l.trim().to_ascii_lowercase()) {
        Some(l) if matches!(l.as_str(), "trace" | "debug" | "info" | "warn" | "error") => l,
        Some(l) if l == "warning" => "warn".to_string(),
        Some(l) if l == "critical" => "error".to_string(),
        _ => "info".to_string(),
    };
    format!("dcabot={}", level)
}

fn create_exchange(settings: &Settings) -> anyhow::Result<Arc<dyn Exchange>> {
    let credentials = OkxCredentials {
        api_key: settings.exchange.api_key.clone(),
        api_secret: settings.exchange.api_secret.clone(),
        passphrase: settings.exchange.api_passphrase.clone(),
    };
    let okx = OkxClient::new(&settings.exchange.base_url, &settings.exchange.symbol, credentials)?;

    if settings.dry_run {
        tracing::info!("🧪 Dry run: orders are simulated at the live price");
        Ok(Arc::new(DryRunExchange::new(okx)))
    } else {
        Ok(Arc::new(okx))
    }
}

async fn connect_store(settings: &Settings, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn TradeStore>> {
    match &settings.database.url {
        Some(url) => {
            let store = PostgresStore::new(url)
                .await
                .context("Failed to connect to Postgres")?;
            tracing::info!("Postgres trade ledger ready");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No database configured, dry-run trades are kept in memory only");
            Ok(Arc::new(MemoryStore::new(clock)))
        }
    }
}

/// Log price and balance once; refuse to start when the exchange is unreachable
async fn check_connectivity(exchange: &dyn Exchange, amount_usd: f64) -> anyhow::Result<()> {
    tracing::info!("Testing exchange connectivity...");

    let price = exchange
        .get_price()
        .await
        .context("Exchange price check failed")?;
    tracing::info!("Current price: ${:.2}", price);

    let balance = exchange
        .get_balance()
        .await
        .context("Exchange balance check failed")?;
    tracing::info!("Quote balance: ${:.2}", balance.quote_free);

    if balance.quote_free < amount_usd {
        tracing::warn!(
            "Quote balance (${:.2}) is below the purchase amount (${:.2})",
            balance.quote_free,
            amount_usd
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_directive() {
        assert_eq!(default_directive(None), "dcabot=info");
        assert_eq!(default_directive(Some("DEBUG")), "dcabot=debug");
        assert_eq!(default_directive(Some(" warning ")), "dcabot=warn");
        assert_eq!(default_directive(Some("CRITICAL")), "dcabot=error");
        assert_eq!(default_directive(Some("verbose")), "dcabot=info");
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["dcabot", "--dry-run", "--config", "dcabot.toml"]);
        assert!(cli.dry_run);
        assert!(!cli.run_immediately);
        assert_eq!(cli.config, Some(PathBuf::from("dcabot.toml")));
    }
}
