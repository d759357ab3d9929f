//! Qianfan chat-completions client.
//!
//! One outbound call per generation: the user's topic is interpolated into a
//! fixed prompt template and sent as the sole chat message. Authentication is
//! either the plain `access_token` query parameter or the `bce-auth-v1`
//! HMAC-SHA256 request signature, chosen at configuration time. Retries are
//! deliberately absent; the submission controller wraps every call in its own
//! absolute deadline.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

const CHAT_HOST: &str = "aip.baidubce.com";
const CHAT_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/completions";
/// The provider's fast/cheap model tier; override via `QIANFAN_MODEL`.
pub const DEFAULT_MODEL: &str = "ERNIE-Speed";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_PROMPT: &str = "测试API连通性";

/// Characters that stay literal in signed query strings: the RFC 3986
/// unreserved set.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error)]
pub enum GenerateError {
    /// Connect or read timeout on the remote call.
    #[error("API请求超时，请稍后重试")]
    Timeout,
    /// The endpoint answered with a non-success status.
    #[error("API返回错误状态码: {status}")]
    Remote { status: u16 },
    /// Transport failure before a response was received.
    #[error("API请求失败: {0}")]
    Transport(reqwest::Error),
    /// A 200 response without the expected `result` text field.
    #[error("API响应异常：缺少result字段")]
    MalformedResponse,
    /// Zero usable headline lines after parsing.
    #[error("未能生成任何标题，请换个主题重试")]
    EmptyResult,
}

impl GenerateError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerateError::Timeout
        } else {
            GenerateError::Transport(err)
        }
    }
}

/// Credential material plus the scheme used to present it on the wire.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// Static credential passed as the `access_token` query parameter.
    AccessToken { access_key: String },
    /// `bce-auth-v1` HMAC-SHA256 request signature in the `Authorization`
    /// header, with `access_token` and `timestamp` query parameters.
    BceSigning {
        access_key: String,
        secret_key: String,
    },
}

impl AuthScheme {
    pub fn access_key(&self) -> &str {
        match self {
            AuthScheme::AccessToken { access_key }
            | AuthScheme::BceSigning { access_key, .. } => access_key,
        }
    }
}

/// Seam between the submission controller and the remote API, so tests can
/// substitute a deterministic backend.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, topic: &str) -> Result<Vec<String>, GenerateError>;
}

/// Outcome of one diagnostic probe call, success or not.
#[derive(Debug)]
pub struct ProbeReport {
    pub status: u16,
    pub elapsed: Duration,
    pub body: String,
}

pub struct QianfanClient {
    http: reqwest::Client,
    auth: AuthScheme,
    model: String,
    url: String,
}

impl QianfanClient {
    pub fn new(auth: AuthScheme, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            auth,
            model: model.into(),
            url: format!("https://{CHAT_HOST}{CHAT_PATH}"),
        }
    }

    /// Access key with everything but the first and last four characters
    /// hidden, for the diagnostic page.
    pub fn masked_access_key(&self) -> String {
        mask_key(self.auth.access_key())
    }

    /// One synchronous test call with a flat timeout, reporting status,
    /// latency, and the raw body whatever the outcome.
    pub async fn probe(&self) -> Result<ProbeReport, GenerateError> {
        let started = std::time::Instant::now();
        let response = self.post_chat(PROBE_PROMPT, Some(PROBE_TIMEOUT)).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(GenerateError::from_reqwest)?;
        Ok(ProbeReport {
            status,
            elapsed: started.elapsed(),
            body,
        })
    }

    fn auth_material(&self) -> (Vec<(String, String)>, Option<String>) {
        match &self.auth {
            AuthScheme::AccessToken { access_key } => (
                vec![("access_token".to_string(), access_key.clone())],
                None,
            ),
            AuthScheme::BceSigning {
                access_key,
                secret_key,
            } => {
                let timestamp = unix_now();
                let params = vec![
                    ("access_token".to_string(), access_key.clone()),
                    ("timestamp".to_string(), timestamp.to_string()),
                ];
                let header = signed_header(access_key, secret_key, timestamp, &params);
                (params, Some(header))
            }
        }
    }

    async fn post_chat(
        &self,
        content: &str,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, GenerateError> {
        let (params, authorization) = self.auth_material();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
        };
        let mut request = self.http.post(&self.url).query(&params).json(&body);
        if let Some(header) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request.send().await.map_err(GenerateError::from_reqwest)
    }
}

#[async_trait]
impl TitleGenerator for QianfanClient {
    async fn generate(&self, topic: &str) -> Result<Vec<String>, GenerateError> {
        let prompt = prompt_for(topic);
        debug!(model = %self.model, "sending generation request");
        let response = self.post_chat(&prompt, None).await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "generation request rejected by remote API");
            return Err(GenerateError::Remote {
                status: status.as_u16(),
            });
        }
        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|_| GenerateError::MalformedResponse)?;
        let text = payload.result.ok_or(GenerateError::MalformedResponse)?;
        Ok(parse_titles(&text))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    result: Option<String>,
}

/// The fixed instruction sent for every generation request.
fn prompt_for(topic: &str) -> String {
    format!("生成5个小红书风格标题，关于{topic}，带emoji和热点话题")
}

/// Split completion text into trimmed, non-empty candidate headlines,
/// preserving order.
fn parse_titles(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET).to_string()
}

/// Canonical string for the `bce-auth-v1` signature: method, host, path, and
/// the sorted percent-encoded query parameters, joined by newlines.
fn canonical_request(method: &str, host: &str, path: &str, params: &[(String, String)]) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect();
    pairs.sort();
    format!("{method}\n{host}\n{path}\n{}", pairs.join("&"))
}

fn sign(secret_key: &str, canonical: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn signed_header(
    access_key: &str,
    secret_key: &str,
    timestamp: u64,
    params: &[(String, String)],
) -> String {
    let canonical = canonical_request("POST", CHAT_HOST, CHAT_PATH, params);
    let signature = sign(secret_key, &canonical);
    format!("bce-auth-v1/{access_key}/{timestamp}/{signature}")
}
