//! Azure OpenAI LLM Provider with streaming support

use async_trait::async_trait;
use serde_json::Value;

use super::openai::{OpenAiProvider, OpenAiResponse};
use super::{resolve_api_key, CompletionRequest, CompletionResponse, LlmProvider, LlmStream};
use crate::agents::config::ProviderConfig;
use crate::agents::error::{LlmError, LlmResult};

const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Azure OpenAI LLM Provider.
///
/// Same wire format as OpenAI, addressed as
/// `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=..`
/// and authenticated with an `api-key` header.
pub struct AzureOpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    url: String,
    deployment: String,
}

impl AzureOpenAiProvider {
    pub fn new(config: &ProviderConfig) -> LlmResult<Self> {
        let api_key = resolve_api_key(config, "AZURE_OPENAI_API_KEY")?;

        let endpoint = config.base_url.clone().ok_or_else(|| {
            LlmError::InvalidRequest(
                "Azure OpenAI requires base_url to be set (e.g., https://your-resource.openai.azure.com)"
                    .to_string(),
            )
        })?;

        let deployment = config.model_or_default();
        let api_version = config.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION);

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            url: deployment_url(&endpoint, &deployment, api_version),
            deployment,
        })
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
    }
}

fn deployment_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        "azure-openai"
    }

    fn model(&self) -> &str {
        &self.deployment
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let body = OpenAiProvider::build_request_body(&request, &self.deployment);
        let response = self.post(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {}", e)))?;

        OpenAiProvider::parse_response(parsed)
    }

    fn complete_stream(&self, mut request: CompletionRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(64);
        request.stream = true;
        let http = self.post(&OpenAiProvider::build_request_body(&request, &self.deployment));

        tokio::spawn(async move {
            if let Err(e) = OpenAiProvider::stream_sse(http, sender.clone()).await {
                let _ = sender.send_error(e).await;
            }
        });

        stream
    }
}
