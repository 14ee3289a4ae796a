use log::debug;
use serde::{Deserialize, Serialize};

use super::{RegistryClientError, RegistryRateLimiter};

const MAX_PAGE_SIZE: u32 = 250;

/// Client for the Congress.gov v3 API.
///
/// Every call waits on the shared rate limiter before touching the network;
/// Congress.gov enforces a per-key hourly budget.
pub struct CongressClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limiter: RegistryRateLimiter,
}

/// One member as returned by the `/member` list endpoint.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CongressMember {
    #[serde(rename = "bioguideId")]
    pub bioguide_id: String,
    pub name: Option<String>,
    #[serde(rename = "partyName")]
    pub party_name: Option<String>,
    pub state: Option<String>,
    pub district: Option<i64>,
    pub url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MembersEnvelope {
    #[serde(default)]
    members: Vec<CongressMember>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize, Debug)]
struct Pagination {
    count: i64,
}

/// One page of member results with the upstream total for pagination UI.
#[derive(Debug, Clone)]
pub struct MemberPage {
    pub members: Vec<CongressMember>,
    pub total: i64,
}

impl CongressClient {
    pub fn new(base_url: String, api_key: Option<String>, limiter: RegistryRateLimiter) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            limiter,
        }
    }

    fn api_key(&self) -> Result<&str, RegistryClientError> {
        self.api_key
            .as_deref()
            .ok_or(RegistryClientError::MissingApiKey("Congress.gov"))
    }

    /// Fetches one page of current members, offset-paginated.
    pub async fn fetch_members(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<MemberPage, RegistryClientError> {
        let api_key = self.api_key()?;
        self.limiter.until_ready().await;

        let url = format!(
            "{}/member?format=json&currentMember=true&limit={}&offset={}&api_key={}",
            self.base_url,
            limit.clamp(1, MAX_PAGE_SIZE),
            offset,
            api_key
        );
        debug!("fetching Congress.gov members at offset {offset}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RegistryClientError::UnexpectedStatus {
                resource: format!("member list (offset {offset})"),
                status: response.status().as_u16(),
            });
        }

        let envelope = response.json::<MembersEnvelope>().await?;
        let total = envelope
            .pagination
            .map(|pagination| pagination.count)
            .unwrap_or(envelope.members.len() as i64);

        Ok(MemberPage {
            members: envelope.members,
            total,
        })
    }

    /// Fetches one member by bioguide id. Missing members are `None`, not an
    /// error; operators paste ids by hand.
    pub async fn fetch_member(
        &self,
        bioguide_id: &str,
    ) -> Result<Option<CongressMember>, RegistryClientError> {
        let api_key = self.api_key()?;
        self.limiter.until_ready().await;

        let url = format!(
            "{}/member/{}?format=json&api_key={}",
            self.base_url, bioguide_id, api_key
        );

        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryClientError::UnexpectedStatus {
                resource: format!("member {bioguide_id}"),
                status: response.status().as_u16(),
            });
        }

        #[derive(Deserialize)]
        struct DetailEnvelope {
            member: CongressMember,
        }

        let envelope = response.json::<DetailEnvelope>().await?;
        Ok(Some(envelope.member))
    }
}
