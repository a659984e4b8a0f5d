use crate::models::{AnalysisBatch, InstrumentAnalysis, Timeframe};
use anyhow::Result;
use chrono::Utc;
use csv::Writer;
use std::path::{Path, PathBuf};

pub fn header() -> Vec<String> {
    let mut columns = vec![
        "Pair".to_string(),
        "Momentum_Score".to_string(),
        "Rank".to_string(),
    ];
    for timeframe in Timeframe::ALL {
        columns.push(format!("RSI_{}", timeframe));
        columns.push(format!("Volume_Ratio_{}", timeframe));
        columns.push(format!("Price_Change_{}", timeframe));
    }
    columns
}

/// One row per analysis; timeframes without indicators leave their cells empty.
pub fn row(rank: usize, analysis: &InstrumentAnalysis) -> Vec<String> {
    let mut cells = vec![
        analysis.instrument.display_pair(),
        analysis.momentum_score.to_string(),
        rank.to_string(),
    ];
    for timeframe in Timeframe::ALL {
        match analysis.indicators(timeframe) {
            Some(set) => {
                cells.push(set.rsi.to_string());
                cells.push(set.volume_ratio.to_string());
                cells.push(set.price_change_pct.to_string());
            }
            None => cells.extend(std::iter::repeat(String::new()).take(3)),
        }
    }
    cells
}

pub fn render_csv(batch: &AnalysisBatch) -> Result<Vec<u8>> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(header())?;
    for (i, analysis) in batch.analyses.iter().enumerate() {
        writer.write_record(row(i + 1, analysis))?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error().into())
}

/// Writes the batch as `crypto_momentum_analysis_<timestamp>.csv` under `dir`.
pub async fn export_to_csv(batch: &AnalysisBatch, dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!(
        "crypto_momentum_analysis_{}.csv",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    tokio::fs::write(&path, render_csv(batch)?).await?;
    Ok(path)
}
