//! HTTP surface: the form page, the diagnostic probe, and liveness.
//!
//! Every form outcome renders as a banner on the page — error (red) or
//! informational (blue) — the handlers never surface generation failures as
//! HTTP errors. An accepted submission answers immediately with a pending
//! banner and a small auto-refresh script; the refreshed page load polls the
//! controller for the finished result.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use askama::Template;
use axum::{
    Form, Json, Router,
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::info;

use crate::client::QianfanClient;
use crate::config::DEFAULT_PORT;
use crate::controller::{SubmissionController, SubmissionOutcome};

type SharedState = Arc<AppState>;

const MSG_TOPIC_REQUIRED: &str = "请输入产品名称！";
const MSG_PENDING: &str = "标题生成中，请稍后刷新页面...";
const MSG_BUSY: &str = "已有请求在处理中，请稍后再试";
const MSG_THROTTLED: &str = "操作过于频繁，请稍后再试";

pub struct AppState {
    pub controller: SubmissionController,
    pub client: Arc<QianfanClient>,
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(state: AppState, config: WebConfig) -> Result<(), WebError> {
    let router = build_router(Arc::new(state));
    info!(%config.addr, "Binding HTTP listener");
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home).post(submit))
        .route("/test-connection", get(test_connection))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Deserialize)]
struct SubmitForm {
    product: Option<String>,
}

async fn home() -> impl IntoResponse {
    render_page(page(""))
}

async fn submit(State(state): State<SharedState>, Form(form): Form<SubmitForm>) -> impl IntoResponse {
    let topic = form
        .product
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if topic.is_empty() {
        let mut template = page("");
        template.error = Some(MSG_TOPIC_REQUIRED.to_string());
        return render_page(template);
    }

    let mut template = page(&topic);
    if let Some(result) = state.controller.poll(&topic) {
        match result.error {
            Some(error) => template.error = Some(error),
            None => template.titles = result.titles.unwrap_or_default(),
        }
    } else {
        match state.controller.submit(&topic) {
            SubmissionOutcome::Accepted => {
                template.info = Some(MSG_PENDING.to_string());
                template.auto_refresh = true;
            }
            SubmissionOutcome::RejectedBusy => template.error = Some(MSG_BUSY.to_string()),
            SubmissionOutcome::RejectedThrottled => template.info = Some(MSG_THROTTLED.to_string()),
        }
    }
    render_page(template)
}

async fn test_connection(State(state): State<SharedState>) -> impl IntoResponse {
    match state.client.probe().await {
        Ok(report) if report.status == 200 => Html(format!(
            "<h1>连接测试成功</h1>\n<p>响应时间: {:.2}秒</p>\n<p>Access Token: {}</p>\n<pre>{}</pre>",
            report.elapsed.as_secs_f64(),
            state.client.masked_access_key(),
            html_escape(&report.body)
        )),
        Ok(report) => Html(format!(
            "<h1>连接测试失败</h1>\n<p>状态码: {}</p>\n<pre>{}</pre>",
            report.status,
            html_escape(&report.body)
        )),
        Err(err) => Html(format!(
            "<h1>连接测试异常</h1>\n<p>详细信息: {}</p>",
            html_escape(&err.to_string())
        )),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "titleforge-web" }))
}

fn page(product: &str) -> PageTemplate {
    PageTemplate {
        error: None,
        info: None,
        product: product.to_string(),
        titles: Vec::new(),
        auto_refresh: false,
    }
}

fn render_page(template: PageTemplate) -> Html<String> {
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(err.to_string())),
    )
}

fn render_error_page(message: impl Into<String>) -> String {
    let message = message.into();
    format!(
        r#"<!DOCTYPE html>
<html lang="zh-CN">
  <head>
    <meta charset="utf-8" />
    <title>小红书标题生成器 • 出错了</title>
  </head>
  <body>
    <h1>页面渲染失败</h1>
    <p>{message}</p>
    <a href="/">返回首页</a>
  </body>
</html>"#,
        message = html_escape(&message),
    )
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="zh-CN">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>小红书标题生成器</title>
    <style>
      body { font-family: 'PingFang SC', 'Microsoft YaHei', sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; background-color: #fef6f6; color: #333; }
      h1 { color: #ff2442; text-align: center; margin-bottom: 30px; }
      .container { background-color: white; padding: 30px; border-radius: 12px; box-shadow: 0 4px 12px rgba(0, 0, 0, 0.05); }
      form { display: flex; flex-direction: column; gap: 15px; }
      input[type="text"] { padding: 12px 15px; border: 1px solid #ffcdd2; border-radius: 8px; font-size: 16px; }
      input[type="text"]:focus { outline: none; border-color: #ff2442; }
      button { background-color: #ff2442; color: white; border: none; padding: 12px; border-radius: 8px; font-size: 16px; cursor: pointer; transition: background-color 0.3s; }
      button:hover { background-color: #e61e3c; }
      .error, .info { padding: 10px; border-radius: 6px; margin-bottom: 15px; }
      .error { color: #ff2442; background-color: #ffebee; }
      .info { color: #2465ff; background-color: #ebf0ff; }
      .result { margin-top: 30px; }
      .title-list { list-style-type: none; padding: 0; }
      .title-item { padding: 15px; margin-bottom: 10px; background-color: #fff9f9; border-left: 4px solid #ff2442; border-radius: 4px; }
      .product-name { color: #ff2442; font-weight: bold; }
      .tips { background-color: #fff8e1; padding: 10px; border-radius: 6px; margin-top: 20px; font-size: 14px; }
      .refresh-btn { background-color: #2465ff; margin-top: 10px; display: inline-block; }
      .refresh-btn:hover { background-color: #1a50d9; }
      footer { margin-top: 30px; text-align: center; color: #888; font-size: 14px; }
    </style>
  </head>
  <body>
    <div class="container">
      <h1>小红书爆款标题生成器</h1>

      {% if error.is_some() %}
      <div class="error">⚠️ {{ error.as_ref().unwrap() }}</div>
      {% endif %}
      {% if info.is_some() %}
      <div class="info">ℹ️ {{ info.as_ref().unwrap() }}</div>
      {% endif %}

      <form method="POST" action="/">
        <input type="text" name="product" placeholder="输入产品/主题名称（如：房产、化妆品、健身等）" value="{{ product }}" required>
        <button type="submit">生成标题</button>
      </form>

      <div class="tips">小贴士：输入越具体，生成的标题越精准！例如："上海学区房"、"抗衰老面霜"</div>

      {% if titles.len() > 0 %}
      <div class="result">
        <h3>关于<span class="product-name">{{ product }}</span>的爆款标题建议：</h3>
        <ul class="title-list">
          {% for title in titles %}
          <li class="title-item">{{ title }}</li>
          {% endfor %}
        </ul>
        <form method="POST" action="/">
          <input type="hidden" name="product" value="{{ product }}">
          <button type="submit" class="refresh-btn">重新生成</button>
        </form>
      </div>
      {% endif %}

      <footer>Powered by 百度千帆大模型</footer>
    </div>
    {% if auto_refresh %}
    <script>
      setTimeout(() => window.location.reload(), 5000);
    </script>
    {% endif %}
  </body>
</html>"#,
    ext = "html"
)]
struct PageTemplate {
    error: Option<String>,
    info: Option<String>,
    product: String,
    titles: Vec<String>,
    auto_refresh: bool,
}
