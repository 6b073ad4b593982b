//! OpenAI Chat Completions broker with JSON-schema constrained outputs.
//!
//! Plans and classifications use `response_format: json_schema` and are
//! deserialized into typed results with a bounded parse-retry budget; the
//! retrieval decision call is plain text with tunable sampling parameters.
//! Every call is wrapped in a timeout; elapsed timeouts classify as provider
//! server errors so the usual replan policy applies. Requests set
//! `store=false` and never stream here — streaming to the subscriber happens
//! at the event layer, not the LLM call.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};

use crate::plan::{
    ClassificationOutput, ConvClassificationPlan, DEFAULT_TARGET_SAMPLE_SIZE,
};
use crate::schema::{
    classification_schema, planning_schema, CLASSIFICATION_SCHEMA_NAME, PLANNING_SCHEMA_NAME,
};

use super::{BrokerFailure, BrokerResult, LlmBroker, SamplingParams};

/// Parse attempts for constrained outputs before giving up.
const PARSE_RETRIES: u32 = 3;

const SYSTEM_PROMPT: &str =
    "You are the engine of an autonomous conversation-classification agent. \
     Follow the requested output format exactly.";

/// Wire shape of the planner's structured output (`planningSchema`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    #[serde(default)]
    target_sample_size: Option<u32>,
    stop_requested: bool,
    #[serde(default)]
    additional_instructions: String,
    query_map: Value,
    #[serde(default)]
    plan_details: String,
}

/// Wire shape of the classifier's structured output (`classificationSchema`).
#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    outputs: Vec<ClassificationOutput>,
}

/// OpenAI-backed [`LlmBroker`].
pub struct OpenAiBroker {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiBroker {
    /// Builds a broker for the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key.into());
        Self::with_config(config, model)
    }

    /// Builds a broker with a custom config (e.g. base URL override).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Bounds each LLM call; elapsed timeouts become server errors.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_messages(prompt: &str) -> Vec<ChatCompletionRequestMessage> {
        vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
                SYSTEM_PROMPT,
            )),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(prompt)),
        ]
    }

    /// One completion call; returns the first choice's content.
    async fn completion(
        &self,
        prompt: &str,
        response_format: Option<ResponseFormat>,
        params: Option<&SamplingParams>,
    ) -> BrokerResult<String> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::request_messages(prompt));
        args.store(false);
        if let Some(format) = response_format {
            args.response_format(format);
        }
        if let Some(p) = params {
            args.temperature(p.temperature);
            args.top_p(p.top_p);
            args.frequency_penalty(p.frequency_penalty);
            args.presence_penalty(p.presence_penalty);
        }
        let request = args
            .build()
            .map_err(|e| BrokerFailure::client(format!("request build failed: {e}")))?;

        debug!(model = %self.model, prompt_len = prompt.len(), "chat completion");

        let chat = self.client.chat();
        let call = chat.create(request);
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_error(&e)),
            Err(_) => {
                return Err(BrokerFailure::server(format!(
                    "provider timeout after {:?}",
                    self.timeout
                )))
            }
        };

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BrokerFailure::server("provider returned no choices"))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    /// Schema-constrained call with a bounded parse-retry budget.
    async fn structured_call<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: Value,
    ) -> BrokerResult<T> {
        let mut last_parse_error = String::new();
        for attempt in 1..=PARSE_RETRIES {
            let format = ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: schema_name.to_string(),
                    schema: Some(schema.clone()),
                    strict: Some(true),
                },
            };
            let content = self.completion(prompt, Some(format), None).await?;
            match serde_json::from_str::<T>(&content) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(attempt, schema = schema_name, error = %e, "constrained output did not parse");
                    last_parse_error = e.to_string();
                }
            }
        }
        Err(BrokerFailure::validation(format!(
            "constrained output for {schema_name} failed to parse after {PARSE_RETRIES} attempts: {last_parse_error}"
        )))
    }
}

#[async_trait]
impl LlmBroker for OpenAiBroker {
    async fn plan(&self, prompt: &str) -> BrokerResult<ConvClassificationPlan> {
        let response: PlanResponse = self
            .structured_call(prompt, PLANNING_SCHEMA_NAME, planning_schema())
            .await?;
        let query_map_serialized = serde_json::to_string(&response.query_map)
            .map_err(|e| BrokerFailure::validation(format!("query map not serializable: {e}")))?;
        Ok(ConvClassificationPlan {
            target_sample_size: response
                .target_sample_size
                .unwrap_or(DEFAULT_TARGET_SAMPLE_SIZE),
            stop_requested: response.stop_requested,
            additional_instructions: response.additional_instructions,
            query_map_serialized,
            plan_details: response.plan_details,
        })
    }

    async fn classify(&self, prompt: &str) -> BrokerResult<Vec<ClassificationOutput>> {
        let response: ClassificationResponse = self
            .structured_call(prompt, CLASSIFICATION_SCHEMA_NAME, classification_schema())
            .await?;
        Ok(response.outputs)
    }

    async fn summarize(&self, prompt: &str) -> BrokerResult<String> {
        self.completion(prompt, None, None).await
    }

    async fn decide_next_query(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> BrokerResult<String> {
        self.completion(prompt, None, Some(params)).await
    }
}

/// Maps provider errors onto the replan taxonomy: 4xx-shaped API errors are
/// client failures, everything else (transport, stream, 5xx) is a server
/// failure.
fn classify_error(error: &OpenAIError) -> BrokerFailure {
    match error {
        OpenAIError::ApiError(api) => {
            if is_client_api_error(api) {
                BrokerFailure::client(format!("provider rejected request: {error}"))
            } else {
                BrokerFailure::server(format!("provider error: {error}"))
            }
        }
        OpenAIError::InvalidArgument(msg) => {
            BrokerFailure::client(format!("invalid request: {msg}"))
        }
        other => BrokerFailure::server(format!("provider transport error: {other}")),
    }
}

fn is_client_api_error(api: &ApiError) -> bool {
    let tag = api
        .r#type
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let message = api.message.to_ascii_lowercase();
    const CLIENT_MARKERS: [&str; 5] = [
        "invalid_request",
        "authentication",
        "permission",
        "not_found",
        "invalid_api_key",
    ];
    CLIENT_MARKERS
        .iter()
        .any(|m| tag.contains(m) || message.contains(m))
}
