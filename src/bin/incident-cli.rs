use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "incident-cli")]
#[command(about = "Management CLI for the incident API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "ADMIN_URL", default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long, env = "ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service status
    Status,
    /// Show connection pool statistics
    Pool,
    /// Show rate limiter statistics
    Limiter,
    /// List blacklisted clients
    Blacklist,
    /// Blacklist a client (e.g. "ip:203.0.113.9" or "user:42")
    Block {
        client: String,
        /// Ban length in seconds; defaults to the server's blacklist duration
        #[arg(short, long)]
        secs: Option<u64>,
    },
    /// Remove a client from the blacklist
    Unblock { client: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let (method, path) = match &cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string()),
        Commands::Pool => (Method::GET, "/admin/pool".to_string()),
        Commands::Limiter => (Method::GET, "/admin/limiter".to_string()),
        Commands::Blacklist => (Method::GET, "/admin/blacklist".to_string()),
        Commands::Block { client, secs } => {
            let mut path = format!("/admin/blacklist/{}", encode_segment(client));
            if let Some(secs) = secs {
                path.push_str(&format!("?duration_secs={secs}"));
            }
            (Method::POST, path)
        }
        Commands::Unblock { client } => (
            Method::DELETE,
            format!("/admin/blacklist/{}", encode_segment(client)),
        ),
    };

    let res = client
        .request(method, format!("{base}{path}"))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await?;

    Ok(())
}

/// Percent-encode a client id for use as a single path segment.
fn encode_segment(segment: &str) -> String {
    let mut url = reqwest::Url::parse("http://placeholder/").expect("static url parses");
    url.path_segments_mut()
        .expect("http url has path segments")
        .push(segment);
    url.path().trim_start_matches('/').to_string()
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
