//! Configuration: optional TOML file, then `DCABOT_*` environment overrides.
//!
//! Nested keys use `__`, e.g. `DCABOT_DCA__AMOUNT_USD=50` or
//! `DCABOT_EXCHANGE__API_KEY=...`. Secrets should only come from the
//! environment.

use crate::error::DcaError;
use crate::exchange::okx::OKX_API_BASE;
use crate::models::InitialPortfolio;
use crate::notify::telegram::TELEGRAM_API_BASE;
use crate::scheduler::{parse_time_of_day, Cadence, JobSpec, SchedulerOptions};
use crate::Result;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/dcabot.toml";
const ENV_PREFIX: &str = "DCABOT";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub dca: DcaConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DcaConfig {
    pub amount_usd: f64,
    pub max_transaction_limit: f64,
    /// `daily@HH:MM`, `hourly` or `every-minute`
    pub cadence: String,
    #[serde(default)]
    pub initial_units: f64,
    #[serde(default)]
    pub initial_avg_price: f64,
    /// Comma separated `HH:MM` list (UTC); empty disables reports
    #[serde(default)]
    pub report_times: String,
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
    /// Apply the duplicate guard to hourly and minute cadences as well
    #[serde(default)]
    pub interval_guard: bool,
    #[serde(default)]
    pub run_immediately: bool,
}

fn default_lookback_hours() -> u32 {
    12
}

#[derive(Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub api_passphrase: String,
    #[serde(default = "default_okx_url")]
    pub base_url: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
}

fn default_okx_url() -> String {
    OKX_API_BASE.into()
}
fn default_symbol() -> String {
    "BTC-USDT".into()
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
            base_url: default_okx_url(),
            symbol: default_symbol(),
        }
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("api_passphrase", &redact(&self.api_passphrase))
            .field("base_url", &self.base_url)
            .field("symbol", &self.symbol)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    /// Empty means notifications only go to the log
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default = "default_telegram_url")]
    pub base_url: String,
    #[serde(default = "default_true")]
    pub notification_sound: bool,
}

fn default_telegram_url() -> String {
    TELEGRAM_API_BASE.into()
}
fn default_true() -> bool {
    true
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            user_id: 0,
            base_url: default_telegram_url(),
            notification_sound: true,
        }
    }
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        !self.bot_token.is_empty()
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("user_id", &self.user_id)
            .field("base_url", &self.base_url)
            .field("notification_sound", &self.notification_sound)
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_deref().map(redact))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_tick_millis() -> u64 {
    1000
}
fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "***"
    }
}

/// Validated purchase plan the engine and reports run on
#[derive(Debug, Clone, PartialEq)]
pub struct DcaPlan {
    pub amount_usd: f64,
    pub cadence: Cadence,
    pub initial: InitialPortfolio,
    pub report_times: Vec<(u32, u32)>,
    pub lookback: chrono::Duration,
    pub interval_guard: bool,
    pub dry_run: bool,
}

impl DcaPlan {
    /// Plan with no initial holding, no reports and a 12h lookback
    pub fn new(amount_usd: f64, cadence: Cadence) -> Self {
        Self {
            amount_usd,
            cadence,
            initial: InitialPortfolio::default(),
            report_times: Vec::new(),
            lookback: chrono::Duration::hours(default_lookback_hours() as i64),
            interval_guard: false,
            dry_run: false,
        }
    }

    /// The purchase job plus one report job per report time
    pub fn job_specs(&self) -> Result<Vec<JobSpec>> {
        let mut specs = vec![JobSpec::purchase(self.cadence)];
        for &(hour, minute) in &self.report_times {
            specs.push(JobSpec::report(hour, minute)?);
        }
        Ok(specs)
    }
}

impl Settings {
    /// Load from `path` (or `config/dcabot.toml` when present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_flags(path, false, false)
    }

    /// Like `load`, with command-line flags applied before validation.
    /// Flags can only switch a mode on.
    pub fn load_with_flags(path: Option<&Path>, dry_run: bool, run_immediately: bool) -> Result<Self> {
        let mut settings = Self::read(path)?;
        settings.dry_run |= dry_run;
        settings.dca.run_immediately |= run_immediately;

        settings.validate()?;
        Ok(settings)
    }

    fn read(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path.to_path_buf()).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Parse a TOML document without touching the environment
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the daemon must not start with
    pub fn validate(&self) -> Result<()> {
        let dca = &self.dca;

        if !(dca.amount_usd.is_finite() && dca.amount_usd > 0.0) {
            return Err(DcaError::Config(format!(
                "dca.amount_usd must be positive, got {}",
                dca.amount_usd
            )));
        }
        if dca.amount_usd > dca.max_transaction_limit {
            return Err(DcaError::Config(format!(
                "dca.amount_usd {} exceeds dca.max_transaction_limit {}",
                dca.amount_usd, dca.max_transaction_limit
            )));
        }
        if dca.initial_units < 0.0 || dca.initial_avg_price < 0.0 {
            return Err(DcaError::Config(
                "dca.initial_units and dca.initial_avg_price must not be negative".to_string(),
            ));
        }
        if dca.lookback_hours == 0 {
            return Err(DcaError::Config("dca.lookback_hours must be at least 1".to_string()));
        }

        dca.cadence.parse::<Cadence>()?;
        parse_report_times(&dca.report_times)?;

        if self.exchange.api_key.is_empty()
            || self.exchange.api_secret.is_empty()
            || self.exchange.api_passphrase.is_empty()
        {
            return Err(DcaError::Config(
                "exchange.api_key, exchange.api_secret and exchange.api_passphrase are required"
                    .to_string(),
            ));
        }

        if self.telegram.is_enabled() && self.telegram.user_id == 0 {
            return Err(DcaError::Config(
                "telegram.user_id is required when telegram.bot_token is set".to_string(),
            ));
        }

        if self.database.url.is_none() && !self.dry_run {
            return Err(DcaError::Config(
                "database.url is required unless running in dry-run mode".to_string(),
            ));
        }

        if self.scheduler.tick_millis == 0 {
            return Err(DcaError::Config("scheduler.tick_millis must be positive".to_string()));
        }

        Ok(())
    }

    pub fn plan(&self) -> Result<DcaPlan> {
        let dca = &self.dca;
        Ok(DcaPlan {
            amount_usd: dca.amount_usd,
            cadence: dca.cadence.parse()?,
            initial: InitialPortfolio::new(dca.initial_units, dca.initial_avg_price),
            report_times: parse_report_times(&dca.report_times)?,
            lookback: chrono::Duration::hours(dca.lookback_hours as i64),
            interval_guard: dca.interval_guard,
            dry_run: self.dry_run,
        })
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            tick: Duration::from_millis(self.scheduler.tick_millis),
            shutdown_grace: Duration::from_secs(self.scheduler.shutdown_grace_secs),
            run_immediately: self.dca.run_immediately,
        }
    }
}

/// Parse `"09:00, 21:00"`. Duplicates are dropped; the result is sorted.
pub fn parse_report_times(list: &str) -> Result<Vec<(u32, u32)>> {
    let mut times = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_time_of_day)
        .collect::<Result<Vec<_>>>()?;

    let before = times.len();
    times.sort_unstable();
    times.dedup();
    if times.len() != before {
        tracing::warn!("Ignoring duplicate entries in dca.report_times '{}'", list);
    }

    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{IntervalUnit, JobKind};

    const BASE: &str = r#"
        dry_run = false

        [dca]
        amount_usd = 50.0
        max_transaction_limit = 100.0
        cadence = "daily@09:00"
        initial_units = 0.1
        initial_avg_price = 20000.0
        report_times = "21:00, 09:00"

        [exchange]
        api_key = "k"
        api_secret = "s"
        api_passphrase = "p"

        [database]
        url = "postgres://localhost/dcabot"
    "#;

    fn with(replace: &str, by: &str) -> String {
        BASE.replace(replace, by)
    }

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_toml(BASE).unwrap();
        assert_eq!(settings.exchange.symbol, "BTC-USDT");
        assert_eq!(settings.exchange.base_url, OKX_API_BASE);
        assert!(!settings.telegram.is_enabled());
        assert!(settings.telegram.notification_sound);
        assert_eq!(settings.scheduler.tick_millis, 1000);

        let plan = settings.plan().unwrap();
        assert_eq!(plan.cadence, Cadence::daily_at(9, 0).unwrap());
        assert_eq!(plan.initial, InitialPortfolio::new(0.1, 20000.0));
        assert_eq!(plan.report_times, vec![(9, 0), (21, 0)]);
        assert_eq!(plan.lookback, chrono::Duration::hours(12));
        assert!(!plan.interval_guard);
    }

    #[test]
    fn test_job_specs() {
        let plan = Settings::from_toml(BASE).unwrap().plan().unwrap();
        let specs = plan.job_specs().unwrap();
        let tags: Vec<_> = specs.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["purchase", "report@09:00", "report@21:00"]);
        assert_eq!(specs[0].kind, JobKind::Purchase);
        assert_eq!(specs[2].kind, JobKind::Report);
    }

    #[test]
    fn test_amount_must_be_positive_and_within_limit() {
        let zero = with("amount_usd = 50.0", "amount_usd = 0.0");
        assert!(Settings::from_toml(&zero).unwrap_err().is_fatal());

        let over = with("amount_usd = 50.0", "amount_usd = 150.0");
        assert!(Settings::from_toml(&over).unwrap_err().is_fatal());
    }

    #[test]
    fn test_invalid_cadence_is_fatal() {
        let weekly = with(r#"cadence = "daily@09:00""#, r#"cadence = "weekly""#);
        assert!(Settings::from_toml(&weekly).unwrap_err().is_fatal());
    }

    #[test]
    fn test_interval_cadence() {
        let hourly = with(r#"cadence = "daily@09:00""#, r#"cadence = "hourly""#);
        let plan = Settings::from_toml(&hourly).unwrap().plan().unwrap();
        assert_eq!(plan.cadence, Cadence::Every(IntervalUnit::Hour));
    }

    #[test]
    fn test_empty_report_times_disable_reports() {
        let none = with(r#"report_times = "21:00, 09:00""#, r#"report_times = """#);
        let plan = Settings::from_toml(&none).unwrap().plan().unwrap();
        assert!(plan.report_times.is_empty());
        assert_eq!(plan.job_specs().unwrap().len(), 1);
    }

    #[test]
    fn test_database_optional_only_in_dry_run() {
        let no_db = with(r#"url = "postgres://localhost/dcabot""#, "");
        assert!(Settings::from_toml(&no_db).unwrap_err().is_fatal());

        let dry = with("dry_run = false", "dry_run = true");
        let dry_no_db = dry.replace(r#"url = "postgres://localhost/dcabot""#, "");
        let settings = Settings::from_toml(&dry_no_db).unwrap();
        assert!(settings.database.url.is_none());
        assert!(settings.plan().unwrap().dry_run);
    }

    #[test]
    fn test_cli_flags_apply_before_validation() {
        let path = std::env::temp_dir().join(format!("dcabot-flags-{}.toml", std::process::id()));
        let no_db = with(r#"url = "postgres://localhost/dcabot""#, "");
        std::fs::write(&path, no_db).unwrap();

        tokio_test::assert_err!(Settings::load(Some(&path)));
        let settings = tokio_test::assert_ok!(Settings::load_with_flags(Some(&path), true, true));
        assert!(settings.dry_run);
        assert!(settings.scheduler_options().run_immediately);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let no_key = with(r#"api_key = "k""#, "");
        assert!(Settings::from_toml(&no_key).unwrap_err().is_fatal());
    }

    #[test]
    fn test_telegram_requires_user_id() {
        let toml = format!("{}\n[telegram]\nbot_token = \"abc\"\n", BASE);
        assert!(Settings::from_toml(&toml).unwrap_err().is_fatal());

        let toml = format!("{}\n[telegram]\nbot_token = \"abc\"\nuser_id = 42\n", BASE);
        let settings = Settings::from_toml(&toml).unwrap();
        assert!(settings.telegram.is_enabled());
    }

    #[test]
    fn test_parse_report_times() {
        assert!(parse_report_times("").unwrap().is_empty());
        assert_eq!(
            parse_report_times("21:00,09:00, 21:00").unwrap(),
            vec![(9, 0), (21, 0)]
        );
        assert!(parse_report_times("9am").is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = Settings::from_toml(BASE).unwrap();
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("api_key: \"k\""));
        assert!(!printed.contains("postgres://"));
    }

    #[test]
    fn test_scheduler_options() {
        let settings = Settings::from_toml(BASE).unwrap();
        let options = settings.scheduler_options();
        assert_eq!(options.tick, Duration::from_secs(1));
        assert_eq!(options.shutdown_grace, Duration::from_secs(30));
        assert!(!options.run_immediately);
    }
}
