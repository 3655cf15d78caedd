use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "session-cli")]
#[command(about = "Manage sessions held by the session affinity proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Session API path on the proxy.
    #[arg(short, long, default_value = "/session")]
    path: String,

    /// Bearer key, when the proxy requires one.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one session's payload and remaining TTL
    Get { session_id: String },
    /// Create a session from a JSON payload
    Create { data: String },
    /// Replace an existing session's payload
    Update { session_id: String, data: String },
    /// Delete a session
    Delete { session_id: String },
    /// List every live session
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let endpoint = format!("{}{}", cli.url.trim_end_matches('/'), cli.path);

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
    }

    let request = match cli.command {
        Commands::Get { session_id } => client.get(&endpoint).query(&[("session_id", session_id)]),
        Commands::Create { data } => client
            .post(&endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(data),
        Commands::Update { session_id, data } => client
            .put(&endpoint)
            .query(&[("session_id", session_id)])
            .header(CONTENT_TYPE, "application/json")
            .body(data),
        Commands::Delete { session_id } => client.delete(&endpoint).query(&[("session_id", session_id)]),
        Commands::List => client.get(&endpoint),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: session API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
