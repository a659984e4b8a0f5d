use crate::candles::MarketClient;
use crate::error::FetchError;
use crate::models::Instrument;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{info, warn};

/// Keeps the string entries of the catalog that contain `quote_asset`.
pub fn filter_instruments(catalog: &[Value], quote_asset: &str) -> Vec<Instrument> {
    catalog
        .iter()
        .filter_map(Value::as_str)
        .filter(|symbol| symbol.contains(quote_asset))
        .map(Instrument::new)
        .collect()
}

async fn fetch_catalog(client: &MarketClient) -> Result<Vec<Value>, FetchError> {
    let response = client
        .http()
        .get(&client.endpoints().instruments_url)
        .send()
        .await?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(FetchError::Status(status));
    }

    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Lists the currently tradable instruments quoted in `quote_asset`.
///
/// Any failure is logged and reported as an empty list.
pub async fn discover(client: &MarketClient, quote_asset: &str) -> Vec<Instrument> {
    match fetch_catalog(client).await {
        Ok(catalog) => {
            let instruments = filter_instruments(&catalog, quote_asset);
            info!("Found {} active {} instruments", instruments.len(), quote_asset);
            instruments
        }
        Err(e) => {
            warn!(error = %e, "failed to fetch active instruments");
            Vec::new()
        }
    }
}
