use crate::core::input::Secret;
use crate::core::record::AnalysisRecord;
use crate::core::storage::RecordSink;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://api.apify.com";
const INPUT_KEY: &str = "INPUT";
const WAIT_FOR_FINISH_SECS: u64 = 60;

/// Environment the platform provides to a running actor.
#[derive(Debug, Clone, Default)]
pub struct PlatformEnv {
    pub token: Option<Secret>,
    pub api_base: Option<String>,
    pub run_id: Option<String>,
    pub dataset_id: Option<String>,
    pub key_value_store_id: Option<String>,
}

impl PlatformEnv {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        Self {
            token: var("APIFY_TOKEN").map(Secret::new),
            api_base: var("APIFY_API_PUBLIC_BASE_URL").or_else(|| var("APIFY_API_BASE_URL")),
            run_id: var("APIFY_ACTOR_RUN_ID"),
            dataset_id: var("APIFY_DEFAULT_DATASET_ID"),
            key_value_store_id: var("APIFY_DEFAULT_KEY_VALUE_STORE_ID"),
        }
    }

    pub fn client(&self) -> Result<Option<ApifyClient>> {
        match &self.token {
            Some(token) => Ok(Some(ApifyClient::new(
                token.clone(),
                self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE),
            )?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRun {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub default_dataset_id: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

impl ActorRun {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "SUCCEEDED" | "FAILED" | "TIMED-OUT" | "ABORTED"
        )
    }

    pub fn succeeded(&self) -> bool {
        self.status == "SUCCEEDED"
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct ApifyClient {
    http: reqwest::Client,
    token: Secret,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: Secret, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            // waitForFinish holds the request open for up to a minute
            .timeout(Duration::from_secs(WAIT_FOR_FINISH_SECS + 30))
            .build()?;

        Ok(Self {
            http,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.bearer_auth(self.token.expose()).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::custom(api_error_message(status, &body)))
    }

    async fn data<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let envelope: DataEnvelope<T> = self.send(request).await?.json().await?;
        Ok(envelope.data)
    }

    /// Read a record from a key-value store; `None` when it does not exist.
    pub async fn get_record(&self, store_id: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let response = self
            .http
            .get(self.url(&format!("key-value-stores/{store_id}/records/{key}")))
            .bearer_auth(self.token.expose())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::custom(api_error_message(status, &body)));
        }

        Ok(Some(response.json().await?))
    }

    pub async fn get_input(&self, store_id: &str) -> Result<Option<serde_json::Value>> {
        self.get_record(store_id, INPUT_KEY).await
    }

    pub async fn push_items<T: Serialize + Sync>(&self, dataset_id: &str, item: &T) -> Result<()> {
        self.send(
            self.http
                .post(self.url(&format!("datasets/{dataset_id}/items")))
                .json(item),
        )
        .await?;
        Ok(())
    }

    pub async fn set_status_message(&self, run_id: &str, message: &str, terminal: bool) -> Result<()> {
        self.send(
            self.http
                .put(self.url(&format!("actor-runs/{run_id}")))
                .json(&serde_json::json!({
                    "statusMessage": message,
                    "isStatusMessageTerminal": terminal,
                })),
        )
        .await?;
        Ok(())
    }

    pub async fn start_actor(&self, actor_id: &str, input: &serde_json::Value) -> Result<ActorRun> {
        // the API wants `user~actor`, not `user/actor`
        let actor_id = actor_id.replace('/', "~");
        let run: ActorRun = self
            .data(self.http.post(self.url(&format!("acts/{actor_id}/runs"))).json(input))
            .await?;
        info!(actor = %actor_id, run_id = %run.id, "Started actor run");
        Ok(run)
    }

    /// Block until the run reaches a terminal status.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<ActorRun> {
        loop {
            let run: ActorRun = self
                .data(
                    self.http
                        .get(self.url(&format!("actor-runs/{run_id}")))
                        .query(&[("waitForFinish", WAIT_FOR_FINISH_SECS)]),
                )
                .await?;

            if run.is_terminal() {
                info!(run_id = %run.id, status = %run.status, "Actor run finished");
                return Ok(run);
            }
            debug!(run_id = %run.id, status = %run.status, "Actor run still in progress");
        }
    }

    pub async fn dataset_items(&self, dataset_id: &str) -> Result<Vec<serde_json::Value>> {
        let items = self
            .send(
                self.http
                    .get(self.url(&format!("datasets/{dataset_id}/items")))
                    .query(&[("format", "json"), ("clean", "true")]),
            )
            .await?
            .json()
            .await?;
        Ok(items)
    }
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => format!("Apify API returned {status}: {}", envelope.error.message),
        Err(_) => format!("Apify API returned {status}"),
    }
}

/// Publishes records into the run's default dataset.
pub struct ApifyDataset {
    client: ApifyClient,
    dataset_id: String,
}

impl ApifyDataset {
    pub fn new(client: ApifyClient, dataset_id: impl Into<String>) -> Self {
        Self {
            client,
            dataset_id: dataset_id.into(),
        }
    }
}

#[async_trait]
impl RecordSink for ApifyDataset {
    async fn publish(&self, record: &AnalysisRecord) -> Result<String> {
        self.client
            .push_items(&self.dataset_id, record)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;
        Ok(format!("dataset {}", self.dataset_id))
    }
}
