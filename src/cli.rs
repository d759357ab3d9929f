use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use titleforge_rs::web::{self, AppState, WebConfig};
use titleforge_rs::{
    AppConfig, QianfanClient, SubmissionController, SubmissionPolicy, TitleGenerator,
};

#[derive(Parser, Debug)]
#[command(
    name = "titleforge-rs",
    about = "Generate Xiaohongshu-style headlines via the Qianfan chat API",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Listen port; overrides the PORT environment variable.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate headlines for a topic once and print them.
    Generate {
        /// Product or topic to write headlines about.
        topic: String,
    },
    /// Call the remote API once and report status and latency.
    TestConnection,
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    match cli.command {
        Command::Serve { port } => handle_serve(config, port).await,
        Command::Generate { topic } => handle_generate(config, topic, cli.json).await,
        Command::TestConnection => handle_test_connection(config, cli.json).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn handle_serve(config: AppConfig, port: Option<u16>) -> Result<(), Box<dyn Error>> {
    let client = Arc::new(QianfanClient::new(config.auth.clone(), config.model.clone()));
    let generator: Arc<dyn TitleGenerator> = client.clone();
    let policy = SubmissionPolicy {
        empty_results: config.empty_results,
        ..SubmissionPolicy::default()
    };
    let controller = SubmissionController::with_policy(generator, policy);
    let web_config = WebConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.port))),
    };
    web::serve(AppState { controller, client }, web_config).await?;
    Ok(())
}

async fn handle_generate(
    config: AppConfig,
    topic: String,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let topic = topic.trim().to_string();
    if topic.is_empty() {
        return Err("Topic cannot be empty".into());
    }
    let client = QianfanClient::new(config.auth, config.model);
    let titles = client.generate(&topic).await?;
    if as_json {
        let payload = json!({ "topic": topic, "titles": titles });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_titles(&topic, &titles);
    }
    Ok(())
}

async fn handle_test_connection(config: AppConfig, as_json: bool) -> Result<(), Box<dyn Error>> {
    let client = QianfanClient::new(config.auth, config.model);
    let report = client.probe().await?;
    if as_json {
        let payload = json!({
            "status": report.status,
            "elapsed_secs": report.elapsed.as_secs_f64(),
            "access_token": client.masked_access_key(),
            "body": report.body,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Status: {}", report.status);
        println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
        println!("Access token: {}", client.masked_access_key());
        println!("{}", report.body);
    }
    Ok(())
}

fn print_titles(topic: &str, titles: &[String]) {
    if titles.is_empty() {
        println!("No headlines came back for \"{topic}\".");
        return;
    }
    println!("Headline suggestions for \"{topic}\":");
    for (index, title) in titles.iter().enumerate() {
        println!("{:>2}. {}", index + 1, title);
    }
}
