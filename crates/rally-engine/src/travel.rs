//! Travel-time estimation.
//!
//! Estimators may fail or time out. Callers go through [`estimate_or_fallback`]
//! so a routing outage degrades to a straight-line guess instead of failing
//! the request.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use rally_types::models::{Location, TravelMode};
use serde::Deserialize;
use tracing::warn;

use crate::geo;

/// Distance in metres and duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub distance: u32,
    pub duration: u32,
}

#[async_trait]
pub trait TravelEstimator: Send + Sync {
    async fn estimate(&self, origin: Location, destination: Location, mode: TravelMode) -> Result<Estimate>;
}

/// Estimator used when no routing provider is configured.
pub struct StraightLineEstimator;

#[async_trait]
impl TravelEstimator for StraightLineEstimator {
    async fn estimate(&self, origin: Location, destination: Location, mode: TravelMode) -> Result<Estimate> {
        Ok(geo::straight_line(origin, destination, mode))
    }
}

pub async fn estimate_or_fallback(
    estimator: &dyn TravelEstimator,
    origin: Location,
    destination: Location,
    mode: TravelMode,
) -> Estimate {
    match estimator.estimate(origin, destination, mode).await {
        Ok(estimate) => estimate,
        Err(e) => {
            warn!("Route estimate failed, using straight line: {}", e);
            geo::straight_line(origin, destination, mode)
        }
    }
}

// -- AMap --

const AMAP_BASE_URL: &str = "https://restapi.amap.com/v3/direction";

/// Client for the AMap web-service direction API.
pub struct AmapEstimator {
    client: reqwest::Client,
    key: String,
    city: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AmapResponse {
    status: String,
    #[serde(default)]
    info: String,
    route: Option<AmapRoute>,
}

#[derive(Debug, Default, Deserialize)]
struct AmapRoute {
    #[serde(default)]
    transits: Vec<AmapLeg>,
    #[serde(default)]
    paths: Vec<AmapLeg>,
}

#[derive(Debug, Deserialize)]
struct AmapLeg {
    distance: String,
    duration: String,
}

impl AmapEstimator {
    pub fn new(key: String, city: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            key,
            city,
            base_url: AMAP_BASE_URL.to_string(),
        })
    }

    async fn request(&self, path: &str, query: &[(&str, String)]) -> Result<AmapResponse> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .query(&[("key", self.key.as_str())])
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("AMap HTTP {}", response.status());
        }

        Ok(response.json::<AmapResponse>().await?)
    }
}

fn coords(location: Location) -> String {
    format!("{:.6},{:.6}", location.lng, location.lat)
}

/// Picks the first route option out of an AMap direction response. Returns
/// `Ok(None)` when the provider answered but found no route.
fn first_leg(response: AmapResponse, mode: TravelMode) -> Result<Option<Estimate>> {
    if response.status != "1" {
        bail!("AMap error: {}", response.info);
    }

    let route = response.route.unwrap_or_default();
    let legs = match mode {
        TravelMode::Transit => route.transits,
        TravelMode::Driving | TravelMode::Walking => route.paths,
    };

    let Some(leg) = legs.into_iter().next() else {
        return Ok(None);
    };

    let distance = leg
        .distance
        .parse::<f64>()
        .map_err(|_| anyhow!("AMap returned bad distance {:?}", leg.distance))?;
    let duration = leg
        .duration
        .parse::<f64>()
        .map_err(|_| anyhow!("AMap returned bad duration {:?}", leg.duration))?;

    Ok(Some(Estimate {
        distance: distance.round() as u32,
        duration: duration.round() as u32,
    }))
}

#[async_trait]
impl TravelEstimator for AmapEstimator {
    async fn estimate(&self, origin: Location, destination: Location, mode: TravelMode) -> Result<Estimate> {
        let mut query = vec![
            ("origin", coords(origin)),
            ("destination", coords(destination)),
        ];
        let path = match mode {
            TravelMode::Transit => {
                query.push(("city", self.city.clone()));
                query.push(("strategy", "0".to_string()));
                "transit/integrated"
            }
            TravelMode::Driving => {
                query.push(("strategy", "10".to_string()));
                "driving"
            }
            TravelMode::Walking => "walking",
        };

        let response = self.request(path, &query).await?;
        match first_leg(response, mode)? {
            Some(estimate) => Ok(estimate),
            // Short hops often have no transit option; walk instead.
            None if mode == TravelMode::Transit => {
                let response = self.request("walking", &query[..2]).await?;
                first_leg(response, TravelMode::Walking)?
                    .ok_or_else(|| anyhow!("AMap found no route"))
            }
            None => Err(anyhow!("AMap found no route")),
        }
    }
}
