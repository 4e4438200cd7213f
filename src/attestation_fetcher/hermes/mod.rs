//! # Hermes fetcher
//! Pulls the latest signed price updates for a set of feeds from a
//! Hermes-style HTTP endpoint and normalizes them into price records plus
//! one opaque update package for on-chain submission.
use std::collections::HashMap;

use async_trait::async_trait;
use eyre::{eyre, Context, Result};

use crate::attestation_fetcher::{AttestationFetcher, FetchedUpdate, UpdatePackage};
use crate::error::PipelineError;
use crate::feed::{FeedId, PriceRecord};

mod types;

pub const DEFAULT_HERMES_URL: &str = "https://hermes.pyth.network";
const LATEST_UPDATES_PATH: &str = "/v2/updates/price/latest";

pub struct HermesAttestationFetcher {
    endpoint: String,
    client: reqwest::Client,
}

impl HermesAttestationFetcher {
    pub fn new(endpoint: &str) -> HermesAttestationFetcher {
        HermesAttestationFetcher {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn request_latest(&self, feed_ids: &[FeedId]) -> Result<types::LatestPriceUpdates> {
        let url = format!("{}{}", self.endpoint, LATEST_UPDATES_PATH);
        let query: Vec<(&str, String)> = feed_ids
            .iter()
            .map(|feed_id| ("ids[]", feed_id.to_string()))
            .collect();
        log::debug!(
            "Requesting latest updates for {} feed(s) from {}",
            feed_ids.len(),
            url
        );
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .wrap_err("attestation request failed")?
            .error_for_status()
            .wrap_err("attestation service returned an error status")?;
        response
            .json()
            .await
            .wrap_err("failed to decode attestation response")
    }
}

fn decode_blobs(binary: &types::BinaryUpdateData) -> Result<UpdatePackage> {
    if binary.encoding != "hex" {
        return Err(eyre!("unsupported update encoding: {}", binary.encoding));
    }
    let blobs = binary
        .data
        .iter()
        .map(|blob| {
            hex::decode(blob.strip_prefix("0x").unwrap_or(blob))
                .wrap_err("update blob is not valid hex")
        })
        .collect::<Result<Vec<_>>>()?;
    if blobs.is_empty() {
        return Err(eyre!("attestation response carried no update data"));
    }
    Ok(UpdatePackage::new(blobs))
}

fn decode_response(
    feed_ids: &[FeedId],
    response: types::LatestPriceUpdates,
) -> Result<FetchedUpdate> {
    let update_package = decode_blobs(&response.binary)?;

    let mut by_feed: HashMap<FeedId, types::ParsedPriceUpdate> =
        HashMap::with_capacity(response.parsed.len());
    for parsed in response.parsed {
        let feed_id = FeedId::from_hex(&parsed.id)
            .wrap_err("attestation response carried a malformed feed id")?;
        by_feed.insert(feed_id, parsed);
    }

    // Callers see records in request order regardless of response order.
    let prices = feed_ids
        .iter()
        .map(|feed_id| {
            let parsed = by_feed
                .get(feed_id)
                .ok_or_else(|| eyre!("feed {} missing from attestation response", feed_id))?;
            Ok(PriceRecord {
                feed_id: *feed_id,
                price: parsed
                    .price
                    .price
                    .parse()
                    .wrap_err("malformed price mantissa")?,
                conf: parsed.price.conf.parse().wrap_err("malformed confidence")?,
                expo: parsed.price.expo,
                publish_time: parsed.price.publish_time,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FetchedUpdate {
        prices,
        update_package,
    })
}

fn fetch_failed(report: eyre::Report) -> PipelineError {
    PipelineError::FetchFailed {
        cause: format!("{report:#}"),
    }
}

#[async_trait]
impl AttestationFetcher for HermesAttestationFetcher {
    async fn fetch(&self, feed_ids: &[FeedId]) -> Result<FetchedUpdate, PipelineError> {
        if feed_ids.is_empty() {
            return Err(PipelineError::FetchFailed {
                cause: "no feed ids requested".to_string(),
            });
        }
        let response = self.request_latest(feed_ids).await.map_err(fetch_failed)?;
        let update = decode_response(feed_ids, response).map_err(fetch_failed)?;
        for record in &update.prices {
            log::info!(
                "{}: {:.2} +/- {:.2} (published at {})",
                record.feed_id.label(),
                record.value(),
                record.confidence(),
                record.publish_time
            );
        }
        Ok(update)
    }
}
