use std::time::Duration;

use appointment_cache::{Slot, TraceId, Window};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::converter::convert_slots;
use crate::error::SourceError;

/// Public scheduler endpoint listing the slots of one location
pub const DEFAULT_SLOTS_URL: &str = "https://ttp.cbp.dhs.gov/schedulerapi/locations/[LOCATION_ID]/slots?startTimestamp=[START_DATE]&endTimestamp=[END_DATE]";

const URL_DATE_FORMAT: &str = "%Y-%m-%dT00:00:00";

/// Where the poll cycle gets the current availability of a window
#[async_trait]
pub trait SlotSource: Send + Sync {
    /// Every slot the source lists for the window's location and dates
    async fn fetch_slots(&self, window: &Window, trace: &TraceId) -> Result<Vec<Slot>, SourceError>;
}

/// Client for the appointment scheduler API
pub struct TtpSchedulerClient {
    client: Client,
    url_template: String,
}

impl TtpSchedulerClient {
    /// Create a client for `url_template`, or the public endpoint when `None`
    pub fn new(url_template: Option<String>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url_template: url_template.unwrap_or_else(|| DEFAULT_SLOTS_URL.to_string()),
        })
    }

    /// Request URL for a window; the end timestamp is midnight after the last day
    pub fn slots_url(&self, window: &Window) -> String {
        build_slots_url(&self.url_template, window)
    }
}

/// Fill the `[LOCATION_ID]`, `[START_DATE]` and `[END_DATE]` placeholders
pub fn build_slots_url(template: &str, window: &Window) -> String {
    let end = window.end_date.succ_opt().unwrap_or(window.end_date);
    template
        .replace("[LOCATION_ID]", &window.location_id.to_string())
        .replace("[START_DATE]", &format_date(window.start_date))
        .replace("[END_DATE]", &format_date(end))
}

fn format_date(date: NaiveDate) -> String {
    date.format(URL_DATE_FORMAT).to_string()
}

/// Map a non-success status to the matching error
pub fn status_error(status: StatusCode) -> SourceError {
    match status.as_u16() {
        429 => SourceError::RateLimited,
        404 => SourceError::NotFound,
        _ => SourceError::Http(format!("HTTP {}", status)),
    }
}

#[async_trait]
impl SlotSource for TtpSchedulerClient {
    async fn fetch_slots(&self, window: &Window, trace: &TraceId) -> Result<Vec<Slot>, SourceError> {
        let url = self.slots_url(window);
        debug!(trace_id = %trace, "Fetching slots from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Http(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Http(format!("Failed to read response: {}", e)))?;

        let slots = convert_slots(&body, window.location_id)?;
        info!(trace_id = %trace, "Fetched {} slots for {}", slots.len(), window);
        Ok(slots)
    }
}
