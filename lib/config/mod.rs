use std::env;

const DEFAULT_CONGRESS_API_URL: &str = "https://api.congress.gov/v3";
const DEFAULT_FEDERAL_REGISTER_API_URL: &str = "https://www.federalregister.gov/api/v1";
const DEFAULT_LEGISLATORS_REPO_URL: &str =
    "https://unitedstates.github.io/congress-legislators";

pub struct Config {
    pub db_url: String,
    pub congress_api_url: String,
    /// Congress.gov requires an API key; search routes fail without one.
    pub congress_api_key: Option<String>,
    pub federal_register_api_url: String,
    pub legislators_repo_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let db_url = env::var("DATABASE_URL")?;
        let congress_api_url =
            env::var("CONGRESS_API_URL").unwrap_or_else(|_| DEFAULT_CONGRESS_API_URL.to_string());
        let congress_api_key = env::var("CONGRESS_API_KEY").ok();
        let federal_register_api_url = env::var("FEDERAL_REGISTER_API_URL")
            .unwrap_or_else(|_| DEFAULT_FEDERAL_REGISTER_API_URL.to_string());
        let legislators_repo_url = env::var("LEGISLATORS_REPO_URL")
            .unwrap_or_else(|_| DEFAULT_LEGISLATORS_REPO_URL.to_string());

        Ok(Self {
            db_url,
            congress_api_url,
            congress_api_key,
            federal_register_api_url,
            legislators_repo_url,
        })
    }
}
