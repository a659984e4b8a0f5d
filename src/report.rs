use crate::models::{AnalysisBatch, InstrumentAnalysis, Timeframe};
use crate::storage_utils::OutputConfig;
use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_BORDERS_ONLY, Attribute, Cell, CellAlignment,
    Color, ContentArrangement, Table,
};
use std::fmt::{self, Write as _};
use std::path::PathBuf;

pub const STRONG_BUY_THRESHOLD: f64 = 0.7;
pub const BULLISH_THRESHOLD: f64 = 0.6;
pub const BEARISH_THRESHOLD: f64 = 0.4;
const MAX_SIGNALS: usize = 5;

/// Summary statistics of the momentum scores of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreStats {
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    pub min: f64,
    pub std_dev: f64,
}

impl ScoreStats {
    /// `None` for an empty slice. `std_dev` is the population standard deviation.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;

        let mut sorted = scores.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            mean,
            median,
            max: sorted[sorted.len() - 1],
            min: sorted[0],
            std_dev: variance.sqrt(),
        })
    }
}

/// Counts of (strongly bullish, neutral, bearish) scores.
pub fn sentiment_breakdown(scores: &[f64]) -> (usize, usize, usize) {
    scores.iter().fold((0, 0, 0), |(bull, neutral, bear), &s| {
        if s > BULLISH_THRESHOLD {
            (bull + 1, neutral, bear)
        } else if s >= BEARISH_THRESHOLD {
            (bull, neutral + 1, bear)
        } else {
            (bull, neutral, bear + 1)
        }
    })
}

fn last_price(analysis: &InstrumentAnalysis) -> Option<f64> {
    analysis.indicators(Timeframe::M15).map(|set| set.last_price)
}

fn get_visibility_ratio(current: f64, top: f64) -> f64 {
    let ratio = 0.4 + 0.6 * (current / top);
    ratio.clamp(0.4, 1.0)
}

/// Prints the top `rows` analyses as a colored table.
pub fn print_rankings(batch: &AnalysisBatch, rows: usize) {
    if batch.is_empty() {
        println!("No data found.");
        return;
    }

    let taken_at = batch.latest_candle_time().unwrap_or(batch.generated_at);
    let title = format!("(Data taken at {} UTC)", taken_at.format("%d-%m-%Y %H:%M:%S"));

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rank").add_attribute(Attribute::Bold),
            Cell::new("Pair").add_attribute(Attribute::Bold),
            Cell::new("Timeframes").add_attribute(Attribute::Bold),
            Cell::new("Price (15m)")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Momentum")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);

    let top_score = batch.analyses[0].momentum_score;
    let safe_top = if top_score == 0.0 { 1.0 } else { top_score };

    for (rank, analysis) in batch.analyses.iter().take(rows).enumerate() {
        let ratio = get_visibility_ratio(analysis.momentum_score, safe_top);
        let cyan_val = (255.0 * ratio) as u8;
        let gray_val = (150.0 * ratio) as u8;

        let score_color = if analysis.momentum_score > BULLISH_THRESHOLD {
            Color::Rgb { r: 0, g: cyan_val, b: 0 }
        } else if analysis.momentum_score >= BEARISH_THRESHOLD {
            Color::Rgb { r: cyan_val, g: cyan_val, b: 0 }
        } else {
            Color::Rgb { r: cyan_val, g: 0, b: 0 }
        };

        let price = last_price(analysis)
            .map(|p| format!("{:.4}", p))
            .unwrap_or_else(|| "N/A".to_string());

        table.add_row(vec![
            Cell::new(rank + 1).fg(Color::DarkGrey),
            Cell::new(analysis.instrument.display_pair()).fg(Color::Rgb {
                r: 0,
                g: cyan_val,
                b: cyan_val,
            }),
            Cell::new(format!("{}/{}", analysis.scored_timeframes(), Timeframe::ALL.len())).fg(
                Color::Rgb {
                    r: gray_val,
                    g: gray_val,
                    b: gray_val,
                },
            ),
            Cell::new(price).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.3}", analysis.momentum_score))
                .fg(score_color)
                .set_alignment(CellAlignment::Right),
        ]);
    }

    println!("\n{}\n{}", title, table);
}

fn write_signals(out: &mut String, heading: &str, analyses: &[&InstrumentAnalysis]) -> fmt::Result {
    if analyses.is_empty() {
        return Ok(());
    }
    writeln!(out, "{}", heading)?;
    for analysis in analyses.iter().take(MAX_SIGNALS) {
        writeln!(
            out,
            "   • {} (Score: {:.3})",
            analysis.instrument.display_pair(),
            analysis.momentum_score
        )?;
    }
    Ok(())
}

/// Renders the plain-text insights report.
pub fn render_insights_report(batch: &AnalysisBatch, top_n: usize, now: DateTime<Utc>) -> Result<String> {
    let mut out = String::new();
    write_insights(&mut out, batch, top_n, now)?;
    Ok(out)
}

fn write_insights(
    out: &mut String,
    batch: &AnalysisBatch,
    top_n: usize,
    now: DateTime<Utc>,
) -> fmt::Result {
    let rule = "=".repeat(80);

    writeln!(out, "{}", rule)?;
    writeln!(out, "CRYPTO MOMENTUM ANALYSIS REPORT")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "Analysis Time: {}", now.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out, "Total Pairs Analyzed: {}", batch.len())?;
    writeln!(out)?;

    writeln!(out, "TOP {} MOMENTUM PERFORMERS", top_n)?;
    writeln!(out, "{}", "-".repeat(50))?;
    for (i, analysis) in batch.analyses.iter().take(top_n).enumerate() {
        let price = last_price(analysis)
            .map(|p| format!("${:.4}", p))
            .unwrap_or_else(|| "N/A".to_string());
        writeln!(
            out,
            "{:2}. {:15} | Score: {:.3} | Price: {}",
            i + 1,
            analysis.instrument.display_pair(),
            analysis.momentum_score,
            price
        )?;
    }

    let scores = batch.scores();
    if let Some(stats) = ScoreStats::from_scores(&scores) {
        writeln!(out, "\nMARKET STATISTICS")?;
        writeln!(out, "{}", "-".repeat(30))?;
        writeln!(out, "Average Momentum Score: {:.3}", stats.mean)?;
        writeln!(out, "Median Momentum Score:  {:.3}", stats.median)?;
        writeln!(out, "Highest Score:          {:.3}", stats.max)?;
        writeln!(out, "Lowest Score:           {:.3}", stats.min)?;
        writeln!(out, "Standard Deviation:     {:.3}", stats.std_dev)?;

        let (bullish, neutral, bearish) = sentiment_breakdown(&scores);
        let pct = |count: usize| count as f64 / scores.len() as f64 * 100.0;
        writeln!(out, "\nMARKET SENTIMENT BREAKDOWN")?;
        writeln!(out, "{}", "-".repeat(35))?;
        writeln!(out, "Strongly Bullish (>0.60): {:3} pairs ({:.1}%)", bullish, pct(bullish))?;
        writeln!(out, "Neutral (0.40-0.60):      {:3} pairs ({:.1}%)", neutral, pct(neutral))?;
        writeln!(out, "Bearish (<0.40):          {:3} pairs ({:.1}%)", bearish, pct(bearish))?;
    }

    writeln!(out, "\nTIMEFRAME ANALYSIS")?;
    writeln!(out, "{}", "-".repeat(25))?;
    for timeframe in Timeframe::ALL {
        writeln!(out, "{:6} Weight: {:4.1}%", timeframe.label(), timeframe.weight() * 100.0)?;
    }

    writeln!(out, "\nACTIONABLE TRADING SIGNALS")?;
    writeln!(out, "{}", "-".repeat(40))?;
    let strong_buy: Vec<&InstrumentAnalysis> = batch
        .analyses
        .iter()
        .filter(|a| a.momentum_score > STRONG_BUY_THRESHOLD)
        .collect();
    let buy: Vec<&InstrumentAnalysis> = batch
        .analyses
        .iter()
        .filter(|a| a.momentum_score > BULLISH_THRESHOLD && a.momentum_score <= STRONG_BUY_THRESHOLD)
        .collect();

    write_signals(out, "STRONG BUY SIGNALS:", &strong_buy)?;
    write_signals(out, "BUY SIGNALS:", &buy)?;
    if strong_buy.is_empty() && buy.is_empty() {
        writeln!(out, "No strong buy signals detected in current market conditions")?;
    }

    writeln!(out, "\n{}", rule)?;
    writeln!(out, "Report generated successfully!")?;
    writeln!(out, "{}", rule)
}

/// Writes the insights report into `output.reports_dir` and returns its path.
pub async fn write_insights_report(batch: &AnalysisBatch, output: &OutputConfig) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&output.reports_dir).await?;

    let now = Utc::now();
    let path = output.reports_dir.join(format!(
        "crypto_momentum_insights_{}.txt",
        now.format("%Y%m%d_%H%M%S")
    ));
    let content = render_insights_report(batch, output.top_n, now)?;
    tokio::fs::write(&path, content).await?;
    Ok(path)
}
