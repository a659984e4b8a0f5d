use anyhow::{bail, Context};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

// CONFIGURATION STRUCTS
// Every field has a default, so a partial config.json still loads.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EndpointConfig {
    pub instruments_url: String,
    pub candles_url: String,
    pub provider_code: String, // "f" selects futures candles
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            instruments_url: "https://api.coindcx.com/exchange/v1/derivatives/futures/data/active_instruments?margin_currency_short_name[]=USDT".to_string(),
            candles_url: "https://public.coindcx.com/market_data/candlesticks".to_string(),
            provider_code: "f".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TradingConfig {
    pub quote_asset: String, // e.g., "USDT"
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub max_concurrent: usize, // requests in flight across all instruments
    pub periods: u32,          // candles requested per timeframe
    pub request_timeout_secs: u64,
    pub failure_pause_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 15,
            periods: 100,
            request_timeout_secs: 20,
            failure_pause_ms: 100,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub reports_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub top_n: usize,
    pub table_rows: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            exports_dir: PathBuf::from("exports"),
            top_n: 10,
            table_rows: 15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_minutes: u32,
    pub retry_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            retry_delay_secs: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub endpoints: EndpointConfig,
    pub trading: TradingConfig,
    pub fetch: FetchConfig,
    pub output: OutputConfig,
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fetch.max_concurrent == 0 {
            bail!("fetch.max_concurrent must be at least 1");
        }
        if self.fetch.periods == 0 {
            bail!("fetch.periods must be at least 1");
        }
        if self.fetch.request_timeout_secs == 0 {
            bail!("fetch.request_timeout_secs must be at least 1");
        }
        let interval = self.schedule.interval_minutes;
        if interval == 0 || 60 % interval != 0 {
            bail!("schedule.interval_minutes must divide 60, got {}", interval);
        }
        Ok(())
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted at `base_dir`, creating the directory if needed.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .await
                .with_context(|| format!("creating {:?}", base_dir))?;
        }
        Ok(Self { base_dir })
    }

    /// Creates a manager for a directory next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);
        Self::new(base_dir).await
    }

    /// Serializes `data` to `<filename>.json`.
    /// Writes a `.tmp` sibling first and renames it, so readers never see a partial file.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<PathBuf> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(&tmp_path, &final_path).await?;

        Ok(final_path)
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));
        let content = fs::read(&path).await?;
        let data = serde_json::from_slice(&content)
            .with_context(|| format!("parsing {:?}", path))?;
        Ok(data)
    }

    /// Loads `config.json`, writing the defaults first if it does not exist yet.
    ///
    /// The result is not validated; callers apply their overrides and then call
    /// [`AppConfig::validate`].
    pub async fn load_config(&self) -> anyhow::Result<AppConfig> {
        let path = self.base_dir.join("config.json");
        if !path.exists() {
            let config = AppConfig::default();
            self.save("config", &config).await?;
            info!(path = ?path, "wrote default configuration");
            return Ok(config);
        }
        self.load("config").await
    }
}
