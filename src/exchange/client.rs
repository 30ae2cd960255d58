// =============================================================================
// Hyperliquid REST client — unsigned read endpoints
// =============================================================================
//
// Every call in this crate is a read: instrument metadata, account state,
// and mid prices. None of it requires request signing, so this client is a
// thin JSON-over-HTTP wrapper around the single `POST /info` endpoint with a
// typed `{"type": "..."}` request body per operation.
// =============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::util::safe_float;

#[derive(Clone)]
pub struct HyperliquidClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetMeta {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaResponse {
    pub universe: Vec<AssetMeta>,
}

#[derive(Debug, Clone, Default)]
pub struct MarginSummary {
    pub account_value: f64,
    pub total_unrealized_pnl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AssetPosition {
    pub coin: String,
    pub szi: f64,
    pub entry_px: f64,
    pub position_value: f64,
    pub leverage: f64,
    pub liquidation_px: Option<f64>,
    pub margin_used: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct UserState {
    pub margin_summary: MarginSummary,
    pub asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Clone)]
pub struct Fill {
    pub coin: String,
    pub side: String, // "B" | "A"
    pub px: f64,
    pub sz: f64,
    pub time_ms: i64,
}

impl HyperliquidClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    async fn post_info(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/info", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("info request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("info request returned status {}", resp.status());
        }
        resp.json::<serde_json::Value>()
            .await
            .context("failed to parse info response as JSON")
    }

    /// Instrument universe (`{"type": "meta"}`).
    #[instrument(skip(self), name = "hyperliquid.meta")]
    pub async fn meta(&self) -> Result<MetaResponse> {
        let raw = self.post_info(serde_json::json!({ "type": "meta" })).await?;
        let universe = raw
            .get("universe")
            .and_then(|v| v.as_array())
            .context("meta response missing universe array")?
            .iter()
            .filter_map(|a| a.get("name").and_then(|n| n.as_str()).map(String::from))
            .map(|name| AssetMeta { name })
            .collect();
        Ok(MetaResponse { universe })
    }

    /// Per-instrument mid prices (`{"type": "allMids"}`).
    #[instrument(skip(self), name = "hyperliquid.all_mids")]
    pub async fn all_mids(&self) -> Result<std::collections::HashMap<String, f64>> {
        let raw = self
            .post_info(serde_json::json!({ "type": "allMids" }))
            .await?;
        let map = raw
            .as_object()
            .context("allMids response is not a JSON object")?
            .iter()
            .map(|(k, v)| (k.clone(), safe_float(v)))
            .collect();
        Ok(map)
    }

    /// Account margin + open position state (`{"type": "clearinghouseState", "user": address}`).
    #[instrument(skip(self), name = "hyperliquid.user_state")]
    pub async fn user_state(&self, address: &str) -> Result<UserState> {
        let raw = self
            .post_info(serde_json::json!({ "type": "clearinghouseState", "user": address }))
            .await?;

        let margin_summary = raw.get("marginSummary").map(|m| MarginSummary {
            account_value: safe_float(m.get("accountValue").unwrap_or(&serde_json::Value::Null)),
            total_unrealized_pnl: safe_float(
                m.get("totalUnrealizedPnl").unwrap_or(&serde_json::Value::Null),
            ),
        });

        let asset_positions = raw
            .get("assetPositions")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| entry.get("position"))
                    .map(|p| AssetPosition {
                        coin: p
                            .get("coin")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                        szi: safe_float(p.get("szi").unwrap_or(&serde_json::Value::Null)),
                        entry_px: safe_float(p.get("entryPx").unwrap_or(&serde_json::Value::Null)),
                        position_value: safe_float(
                            p.get("positionValue").unwrap_or(&serde_json::Value::Null),
                        ),
                        leverage: p
                            .get("leverage")
                            .and_then(|l| l.get("value"))
                            .map(safe_float)
                            .unwrap_or(1.0),
                        liquidation_px: p
                            .get("liquidationPx")
                            .filter(|v| !v.is_null())
                            .map(safe_float),
                        margin_used: safe_float(p.get("marginUsed").unwrap_or(&serde_json::Value::Null)),
                        unrealized_pnl: safe_float(
                            p.get("unrealizedPnl").unwrap_or(&serde_json::Value::Null),
                        ),
                    })
                    .collect()
            })
            .unwrap_or_default();

        debug!(address = %address, positions = asset_positions.len(), "fetched user state");

        Ok(UserState {
            margin_summary: margin_summary.unwrap_or_default(),
            asset_positions,
        })
    }

    /// Recent fills for an address (`{"type": "userFills", "user": address}`).
    #[instrument(skip(self), name = "hyperliquid.user_fills")]
    pub async fn user_fills(&self, address: &str) -> Result<Vec<Fill>> {
        let raw = self
            .post_info(serde_json::json!({ "type": "userFills", "user": address }))
            .await?;
        let fills = raw
            .as_array()
            .context("userFills response is not a JSON array")?
            .iter()
            .filter_map(|f| {
                let coin = f.get("coin")?.as_str()?.to_string();
                let side = f.get("side")?.as_str()?.to_string();
                let px = safe_float(f.get("px").unwrap_or(&serde_json::Value::Null));
                let sz = safe_float(f.get("sz").unwrap_or(&serde_json::Value::Null));
                let time_ms = f.get("time").and_then(|t| t.as_i64()).unwrap_or(0);
                Some(Fill { coin, side, px, sz, time_ms })
            })
            .collect();
        Ok(fills)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_constructs_with_base_url() {
        let c = HyperliquidClient::new("https://api.hyperliquid.xyz");
        assert_eq!(c.base_url, "https://api.hyperliquid.xyz");
    }
}
