use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "crud-cli")]
#[command(about = "Client for the crud-gateway HTTP console", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List invokable methods and their request templates
    Methods,
    /// Check that the console is up
    Health,
    /// Invoke a method with a JSON request body
    Call {
        /// Method name, e.g. CreateUser
        method: String,
        /// Request as JSON; defaults to an empty object
        #[arg(default_value = "{}")]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Methods => client.get(format!("{base}/api/methods")).send().await?,
        Commands::Health => client.get(format!("{base}/healthz")).send().await?,
        Commands::Call { method, body } => {
            let body: Value = serde_json::from_str(&body)?;
            client
                .post(format!("{base}/api/invoke/{method}"))
                .json(&body)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if !status.is_success() {
        eprintln!("Error: console returned status {}", status);
        eprintln!("{}", rendered);
        std::process::exit(1);
    }

    println!("{}", rendered);
    Ok(())
}
