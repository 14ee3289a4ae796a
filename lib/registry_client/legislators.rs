use log::debug;
use serde::{Deserialize, Serialize};

use super::{RegistryClientError, RegistryRateLimiter};

/// Client for the `unitedstates/congress-legislators` published JSON files.
///
/// The dataset is a static export, so there is no server-side pagination; the
/// current-legislators file is fetched whole and filtered locally.
pub struct LegislatorsClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RegistryRateLimiter,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct LegislatorIds {
    pub bioguide: Option<String>,
    pub govtrack: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct LegislatorName {
    pub first: Option<String>,
    pub last: Option<String>,
    pub official_full: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct LegislatorTerm {
    #[serde(rename = "type")]
    pub term_type: Option<String>,
    pub state: Option<String>,
    pub party: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct LegislatorRecord {
    #[serde(default)]
    pub id: LegislatorIds,
    #[serde(default)]
    pub name: LegislatorName,
    #[serde(default)]
    pub terms: Vec<LegislatorTerm>,
}

impl LegislatorRecord {
    /// Display name preferring the curated official form.
    pub fn display_name(&self) -> String {
        if let Some(full) = &self.name.official_full {
            return full.clone();
        }
        match (&self.name.first, &self.name.last) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => String::new(),
        }
    }
}

impl LegislatorsClient {
    pub fn new(base_url: String, limiter: RegistryRateLimiter) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            limiter,
        }
    }

    /// Fetches the full current-legislators export.
    pub async fn fetch_current(&self) -> Result<Vec<LegislatorRecord>, RegistryClientError> {
        self.limiter.until_ready().await;

        let url = format!("{}/legislators-current.json", self.base_url);
        debug!("fetching current legislators export");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RegistryClientError::UnexpectedStatus {
                resource: "legislators-current".to_string(),
                status: response.status().as_u16(),
            });
        }

        let records = response.json::<Vec<LegislatorRecord>>().await?;
        Ok(records)
    }

    /// Fetches current legislators whose name contains `name_filter`
    /// (case-insensitive). Filtering is local; the export has no query API.
    pub async fn search_by_name(
        &self,
        name_filter: &str,
    ) -> Result<Vec<LegislatorRecord>, RegistryClientError> {
        let needle = name_filter.trim().to_lowercase();
        let records = self.fetch_current().await?;
        if needle.is_empty() {
            return Ok(records);
        }
        Ok(records
            .into_iter()
            .filter(|record| record.display_name().to_lowercase().contains(&needle))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_official_full() {
        let record = LegislatorRecord {
            name: LegislatorName {
                first: Some("Alexandria".to_string()),
                last: Some("Ocasio-Cortez".to_string()),
                official_full: Some("Alexandria Ocasio-Cortez".to_string()),
            },
            ..LegislatorRecord::default()
        };
        assert_eq!(record.display_name(), "Alexandria Ocasio-Cortez");
    }

    #[test]
    fn display_name_falls_back_to_parts() {
        let record = LegislatorRecord {
            name: LegislatorName {
                first: Some("Jane".to_string()),
                last: Some("Doe".to_string()),
                official_full: None,
            },
            ..LegislatorRecord::default()
        };
        assert_eq!(record.display_name(), "Jane Doe");
    }
}
