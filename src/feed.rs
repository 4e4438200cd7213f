//! Feed identifiers and off-chain price records.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use eyre::{Error, Result};
use lazy_static::lazy_static;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const FEED_ID_BYTES: usize = 32;

lazy_static! {
    /// Feeds the binary caller can name instead of spelling out hex ids.
    pub static ref KNOWN_FEEDS: HashMap<&'static str, FeedId> = {
        let mut feeds = HashMap::new();
        feeds.insert(
            "ETH_USD",
            FeedId::from_hex("0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace")
                .unwrap(),
        );
        feeds.insert(
            "BTC_USD",
            FeedId::from_hex("0xe62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43")
                .unwrap(),
        );
        feeds.insert(
            "SOL_USD",
            FeedId::from_hex("0xef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d")
                .unwrap(),
        );
        feeds.insert(
            "USDC_USD",
            FeedId::from_hex("0xeaa020c61cc479712813461ce153894a96a6c1f1001ee01c12a3a9a77d5bfb9f")
                .unwrap(),
        );
        feeds
    };
}

/// Opaque identifier of one price series, e.g. ETH/USD.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId([u8; FEED_ID_BYTES]);

impl FeedId {
    pub const fn new(bytes: [u8; FEED_ID_BYTES]) -> FeedId {
        FeedId(bytes)
    }

    /// Parse a feed id from hex, with or without a leading `0x`.
    pub fn from_hex(raw: &str) -> Result<FeedId> {
        let stripped = raw.strip_prefix("0x").unwrap_or(raw);
        let decoded = hex::decode(stripped)?;
        let bytes: [u8; FEED_ID_BYTES] = decoded.try_into().map_err(|decoded: Vec<u8>| {
            Error::msg(format!(
                "feed id must be {} bytes, got {}",
                FEED_ID_BYTES,
                decoded.len()
            ))
        })?;
        Ok(FeedId(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; FEED_ID_BYTES] {
        &self.0
    }

    /// Human label for logs: the well-known name when there is one, hex otherwise.
    pub fn label(&self) -> String {
        feed_name(self)
            .map(str::to_string)
            .unwrap_or_else(|| self.to_string())
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({})", self)
    }
}

impl FromStr for FeedId {
    type Err = Error;

    fn from_str(raw: &str) -> Result<FeedId> {
        FeedId::from_hex(raw)
    }
}

impl Serialize for FeedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FeedId {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<FeedId, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FeedId::from_hex(&raw).map_err(D::Error::custom)
    }
}

/// Reverse lookup into [`KNOWN_FEEDS`].
pub fn feed_name(feed_id: &FeedId) -> Option<&'static str> {
    KNOWN_FEEDS
        .iter()
        .find(|(_, id)| *id == feed_id)
        .map(|(name, _)| *name)
}

/// Resolve a well-known feed name or a hex id.
pub fn resolve_feed(name_or_hex: &str) -> Result<FeedId> {
    if let Some(feed_id) = KNOWN_FEEDS.get(name_or_hex) {
        return Ok(*feed_id);
    }
    FeedId::from_hex(name_or_hex)
}

/// One attested price as reported by the attestation service.
///
/// The price is sign-magnitude: `price * 10^expo`, with `conf` in the same
/// units. A new fetch produces a new record; records are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub feed_id: FeedId,
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: i64,
}

impl PriceRecord {
    /// Price as a decimal number, `price * 10^expo`.
    pub fn value(&self) -> f64 {
        self.price as f64 * 10f64.powi(self.expo)
    }

    /// Confidence interval scaled the same way as [`PriceRecord::value`].
    pub fn confidence(&self) -> f64 {
        self.conf as f64 * 10f64.powi(self.expo)
    }

    /// Seconds elapsed since `publish_time`, clamped at zero for records
    /// published marginally in the future.
    pub fn age_seconds(&self, now_unix: i64) -> u64 {
        (now_unix - self.publish_time).max(0) as u64
    }

    /// Convert a USD amount into this feed's base asset at the attested
    /// price. `None` when the attested price is zero or negative.
    pub fn convert_usd(&self, usd_amount: f64) -> Option<f64> {
        let value = self.value();
        if value > 0.0 {
            Some(usd_amount / value)
        } else {
            None
        }
    }
}
