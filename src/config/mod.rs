//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use aequitas_api_types::{Money, PotPriority};
use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::params::ExpenseSortField;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "aequitas";
const ENV_PREFIX: &str = "AEQUITAS";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api/v1";
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STALE_TIME_MS: u64 = 30_000;
const DEFAULT_GC_TIME_MS: u64 = 300_000;
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 500;
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Command-line arguments for the Aequitas binary.
#[derive(Debug, Parser)]
#[command(name = "aequitas", version, about = "Aequitas expense tracker client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "AEQUITAS_CONFIG_FILE", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override the API request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS", global = true)]
    pub api_timeout_seconds: Option<u64>,

    /// Override how long fetched data stays fresh.
    #[arg(long = "stale-time-ms", value_name = "MS", global = true)]
    pub stale_time_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List expenses with optional filters.
    Expenses(ExpensesArgs),
    /// Show the monthly spending summary.
    Summary(SummaryArgs),
    /// Savings goals.
    #[command(subcommand)]
    Pots(PotsCommand),
    /// Expense categories.
    #[command(subcommand)]
    Categories(CategoriesCommand),
    /// Request the AI spending analysis.
    Analysis,
    /// Load every dashboard panel at once.
    Dashboard,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ExpensesArgs {
    /// Free-text search over title and category.
    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Restrict to one category.
    #[arg(long, value_name = "NAME")]
    pub category: Option<String>,

    /// Restrict to avoidable (true) or necessary (false) expenses.
    #[arg(long, value_name = "BOOL", value_parser = BoolishValueParser::new())]
    pub avoidable: Option<bool>,

    /// Earliest date (YYYY-MM-DD).
    #[arg(long = "from", value_name = "DATE")]
    pub start_date: Option<String>,

    /// Latest date (YYYY-MM-DD).
    #[arg(long = "to", value_name = "DATE")]
    pub end_date: Option<String>,

    /// 1-based page number.
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Rows per page; defaults to `cache.default_page_size`.
    #[arg(long = "page-size", value_name = "COUNT")]
    pub page_size: Option<u32>,

    /// Sort column.
    #[arg(long, value_enum, value_name = "FIELD")]
    pub sort: Option<SortFieldArg>,

    /// Sort ascending instead of descending.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub ascending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortFieldArg {
    Date,
    Amount,
    Title,
    Category,
}

impl From<SortFieldArg> for ExpenseSortField {
    fn from(value: SortFieldArg) -> Self {
        match value {
            SortFieldArg::Date => ExpenseSortField::Date,
            SortFieldArg::Amount => ExpenseSortField::Amount,
            SortFieldArg::Title => ExpenseSortField::Title,
            SortFieldArg::Category => ExpenseSortField::Category,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct SummaryArgs {
    /// Calendar year; defaults to the current one.
    #[arg(long)]
    pub year: Option<i32>,

    /// Month (1-12); defaults to the current one.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
    pub month: Option<u8>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PotsCommand {
    /// List savings goals.
    List,
    /// Contribute to a goal.
    Add(PotContributionArgs),
    /// Create a goal.
    Create(PotCreateArgs),
    /// Delete a goal.
    Delete(IdArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PotContributionArgs {
    /// Goal identifier.
    #[arg(long)]
    pub id: String,

    /// Amount to add, e.g. `25.50`.
    #[arg(long, value_name = "AMOUNT")]
    pub amount: Money,
}

#[derive(Debug, Args, Clone)]
pub struct PotCreateArgs {
    #[arg(long)]
    pub title: String,

    /// Target amount, e.g. `1000`.
    #[arg(long, value_name = "AMOUNT")]
    pub target: Money,

    /// Amount already saved.
    #[arg(long, value_name = "AMOUNT", default_value = "0")]
    pub current: Money,

    /// Target date (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    pub date: String,

    #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
    pub priority: PriorityArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for PotPriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => PotPriority::Low,
            PriorityArg::Medium => PotPriority::Medium,
            PriorityArg::High => PotPriority::High,
        }
    }
}

#[derive(Debug, Subcommand, Clone)]
pub enum CategoriesCommand {
    /// List categories.
    List,
    /// Create a category.
    Create {
        #[arg(long)]
        name: String,
    },
    /// Delete a category.
    Delete(IdArgs),
}

#[derive(Debug, Args, Clone)]
pub struct IdArgs {
    #[arg(long)]
    pub id: String,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub stale_time_ms: u64,
    pub gc_time_ms: u64,
    pub search_debounce_ms: u64,
    pub default_page_size: u32,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
        if let Some(stale) = overrides.stale_time_ms {
            self.cache.stale_time_ms = Some(stale);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            cache,
            logging,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            cache: build_cache_settings(cache)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("api.base_url", format!("`{raw_url}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let timeout = non_zero_u64(
        api.timeout_seconds.unwrap_or(DEFAULT_API_TIMEOUT_SECS),
        "api.timeout_seconds",
    )?;

    Ok(ApiSettings {
        base_url,
        timeout: Duration::from_secs(timeout.get()),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let page_size = cache.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 {
        return Err(LoadError::invalid(
            "cache.default_page_size",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        stale_time_ms: cache.stale_time_ms.unwrap_or(DEFAULT_STALE_TIME_MS),
        gc_time_ms: cache.gc_time_ms.unwrap_or(DEFAULT_GC_TIME_MS),
        search_debounce_ms: cache
            .search_debounce_ms
            .unwrap_or(DEFAULT_SEARCH_DEBOUNCE_MS),
        default_page_size: page_size,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    stale_time_ms: Option<u64>,
    gc_time_ms: Option<u64>,
    search_debounce_ms: Option<u64>,
    default_page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
