use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::Client;

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(about = "Meshgate Local Administrative CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Gateway base URL. The admin surface is origin restricted, so this
    /// must resolve to a trusted address of the gateway.
    #[arg(long, env = "MESHGATE_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Bearer token for the token-restricted endpoints.
    #[arg(long, env = "MESHGATE_TOKEN")]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Codebase uploads
    Code {
        #[command(subcommand)]
        sub: CodeCommands,
    },
    /// Name registry queries and rebinds
    Dns {
        #[command(subcommand)]
        sub: DnsCommands,
    },
    /// Trigger a boot from a spec file
    Boot {
        /// Path to a boot spec document
        file: PathBuf,
    },
    /// Push a config value at a running service
    Config {
        #[arg(long)]
        service: String,
        #[arg(long)]
        key: String,
        /// JSON value or plain text
        value: String,
    },
    /// Fetch a service's documentation
    Doc {
        name: String,
    },
    /// Fetch code for a named spec
    Fetch {
        name: String,
    },
}

#[derive(Subcommand)]
enum CodeCommands {
    /// Upload a code artifact
    Put {
        id: String,
        file: PathBuf,
    },
    /// Upload artifact metadata
    Meta {
        id: String,
        file: PathBuf,
    },
    /// Upload a static asset
    Assets {
        id: String,
        file: PathBuf,
    },
    /// Upload a named service spec
    Named {
        name: String,
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum DnsCommands {
    /// Resolve a registry key
    Get {
        name: String,
    },
    /// Point a name at an instance id
    Bind {
        name: String,
        instance: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Code { sub } => {
            let (keyspace, id, file) = match sub {
                CodeCommands::Put { id, file } => ("code", id, file),
                CodeCommands::Meta { id, file } => ("meta", id, file),
                CodeCommands::Assets { id, file } => ("assets", id, file),
                CodeCommands::Named { name, file } => ("named", name, file),
            };
            let body = tokio::fs::read(&file).await?;
            let url = format!("{}/_codebase/{}/{}", cli.server, keyspace, id);
            let res = client.put(&url).body(body).send().await?;
            println!("{} {}", res.status(), res.text().await?);
        }
        Commands::Dns { sub } => match sub {
            DnsCommands::Get { name } => {
                let res = client.get(format!("{}/_dns/{}", cli.server, name)).send().await?;
                println!("{} {}", res.status(), res.text().await?);
            }
            DnsCommands::Bind { name, instance } => {
                let res = client
                    .put(format!("{}/_dns/{}", cli.server, name))
                    .json(&serde_json::Value::String(instance))
                    .send()
                    .await?;
                println!("{}", res.status());
            }
        },
        Commands::Boot { file } => {
            let spec: serde_json::Value = serde_json::from_str(&tokio::fs::read_to_string(&file).await?)?;
            let res = client.post(format!("{}/_boot", cli.server)).json(&spec).send().await?;
            let report: serde_json::Value = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config { service, key, value } => {
            let body = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            let res = client
                .put(format!("{}/{}/_config/{}", cli.server, service, key))
                .json(&body)
                .send()
                .await?;
            println!("{}", res.status());
        }
        Commands::Doc { name } => {
            let res = client.get(format!("{}/_doc/{}", cli.server, name)).send().await?;
            println!("{}", res.text().await?);
        }
        Commands::Fetch { name } => {
            let mut request = client.get(format!("{}/_codebase/{}", cli.server, name));
            if let Some(token) = &cli.token {
                request = request.bearer_auth(token);
            }
            let res = request.send().await?;
            if let Some(config) = res.headers().get("x-service-config") {
                eprintln!("config: {}", config.to_str().unwrap_or_default());
            }
            println!("{}", res.text().await?);
        }
    }

    Ok(())
}
