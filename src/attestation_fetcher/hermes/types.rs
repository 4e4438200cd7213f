// Wire types for the Hermes `/v2/updates/price/latest` response.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestPriceUpdates {
    pub binary: BinaryUpdateData,
    pub parsed: Vec<ParsedPriceUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryUpdateData {
    pub encoding: String,
    pub data: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPriceUpdate {
    pub id: String,
    pub price: ParsedPrice,
    #[serde(default)]
    pub ema_price: Option<ParsedPrice>,
}

/// Mantissa and confidence arrive as decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPrice {
    pub price: String,
    pub conf: String,
    pub expo: i32,
    pub publish_time: i64,
}
