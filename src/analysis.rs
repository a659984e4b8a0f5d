//! This module contains the core analysis pipeline logic.

use crate::candles::{self, MarketClient};
use crate::models::{AnalysisBatch, Instrument, InstrumentAnalysis, Timeframe, TimeframeResult};
use crate::storage_utils::{AppConfig, AsyncStorageManager};
use crate::{csv_export, indicators, instruments, report, scoring};
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Discovery returned nothing; no candles were requested.
    NoInstruments,
    /// Instruments were found but none produced a single indicator set.
    NoResults { instruments: usize },
    Ranked(AnalysisBatch),
}

/// Fans candle fetches for every discovered instrument out over the shared
/// limiter and ranks whatever comes back.
#[derive(Clone)]
pub struct Analyzer {
    client: MarketClient,
    quote_asset: String,
    periods: u32,
}

impl Analyzer {
    pub fn new(client: MarketClient, quote_asset: impl Into<String>, periods: u32) -> Self {
        Self {
            client,
            quote_asset: quote_asset.into(),
            periods,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = MarketClient::new(config.endpoints.clone(), &config.fetch)?;
        Ok(Self::new(
            client,
            config.trading.quote_asset.clone(),
            config.fetch.periods,
        ))
    }

    pub async fn run(&self) -> RunOutcome {
        let instruments = instruments::discover(&self.client, &self.quote_asset).await;
        if instruments.is_empty() {
            return RunOutcome::NoInstruments;
        }

        let total = instruments.len();
        info!("Analyzing {} instruments across {} timeframes", total, Timeframe::ALL.len());

        // One task per instrument so a panic stays contained to its own instrument.
        let tasks: Vec<_> = instruments
            .into_iter()
            .map(|instrument| {
                let analyzer = self.clone();
                tokio::spawn(async move { analyzer.analyze_instrument(instrument).await })
            })
            .collect();

        let analyses: Vec<InstrumentAnalysis> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(error = %e, "instrument task failed");
                    None
                }
            })
            .collect();

        if analyses.is_empty() {
            return RunOutcome::NoResults { instruments: total };
        }

        info!("Processed {} of {} instruments successfully", analyses.len(), total);
        RunOutcome::Ranked(AnalysisBatch::ranked(Utc::now(), analyses))
    }

    /// Fetches and scores all timeframes of one instrument.
    /// `None` if no timeframe yielded indicators.
    pub async fn analyze_instrument(&self, instrument: Instrument) -> Option<InstrumentAnalysis> {
        let fetches = Timeframe::ALL.map(|timeframe| {
            let instrument = &instrument;
            async move {
                let series = candles::fetch_candles(&self.client, instrument, timeframe, self.periods)
                    .await
                    .ok()?;
                let indicators = match indicators::compute(&series) {
                    Ok(set) => Some(set),
                    Err(e) => {
                        debug!(instrument = %instrument, timeframe = %timeframe, error = %e, "no indicators");
                        None
                    }
                };
                Some((timeframe, TimeframeResult::new(series, indicators)))
            }
        });

        let timeframes: BTreeMap<Timeframe, TimeframeResult> = futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect();

        let momentum_score = scoring::score(&timeframes)?;
        Some(InstrumentAnalysis {
            instrument,
            momentum_score,
            timeframes,
        })
    }
}

/// Hands a ranked batch to the console table, the insights report, the CSV
/// export and the JSON snapshot.
pub async fn publish(batch: &AnalysisBatch, config: &AppConfig, storage: &AsyncStorageManager) -> Result<()> {
    report::print_rankings(batch, config.output.table_rows);

    let report_path = report::write_insights_report(batch, &config.output).await?;
    info!("Insights report saved to {:?}", report_path);

    let csv_path = csv_export::export_to_csv(batch, &config.output.exports_dir).await?;
    info!("Data exported to {:?}", csv_path);

    let snapshot_path = storage.save("results", batch).await?;
    debug!("Snapshot saved to {:?}", snapshot_path);
    Ok(())
}

/// Runs the full analysis pipeline:
/// 1. Discovers the tradable instruments.
/// 2. Fetches candles for every instrument and timeframe and scores them.
/// 3. Publishes the ranked batch.
pub async fn run_analysis_pipeline(config: &AppConfig, storage: &AsyncStorageManager) -> Result<RunOutcome> {
    let analyzer = Analyzer::from_config(config)?;
    let outcome = analyzer.run().await;

    match &outcome {
        RunOutcome::NoInstruments => {
            println!("No instruments found. Exiting.");
        }
        RunOutcome::NoResults { instruments } => {
            println!("No valid results obtained from {} instruments.", instruments);
        }
        RunOutcome::Ranked(batch) => {
            publish(batch, config, storage).await?;
        }
    }

    Ok(outcome)
}
