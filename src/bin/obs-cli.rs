use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "obs-cli")]
#[command(about = "Inspect a running request-observability service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service health
    Health,
    /// Dump the Prometheus scrape
    Metrics {
        /// Only print lines for this metric family
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Create a test trace and print its IDs
    TraceTest,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{base}/health")).send().await?;
            print_json(res).await?;
        }
        Commands::Metrics { name } => {
            let res = client.get(format!("{base}/metrics")).send().await?;
            let status = res.status();
            if !status.is_success() {
                eprintln!("Error: service returned status {status}");
                return Ok(());
            }
            let text = res.text().await?;
            for line in text.lines() {
                if name.as_deref().map_or(true, |n| line.contains(n)) {
                    println!("{line}");
                }
            }
        }
        Commands::TraceTest => {
            let res = client.get(format!("{base}/trace-test")).send().await?;
            print_json(res).await?;
        }
    }

    Ok(())
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: service returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
