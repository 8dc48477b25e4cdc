//! Recordbase command-line demo client.
//!
//! Connects to a cluster, fetches one record, and prints it.
//!
//! # Usage
//!
//! ```bash
//! # Fetch a record by primary key
//! recordbase-cli --endpoints n1:8500,n2:8500 acme 42
//!
//! # Endpoints and token from environment variables
//! RECORDBASE_ENDPOINTS=n1:8500,n2:8500 \
//! RECORDBASE_AUTH=my-token \
//! recordbase-cli acme 42
//! ```

use std::process::ExitCode;

use clap::Parser;
use recordbase_client::{RecordClient, proto};
use tracing_subscriber::EnvFilter;

/// Fetch and print a Recordbase record.
#[derive(Debug, Parser)]
#[command(name = "recordbase-cli", version, about)]
struct Cli {
    /// Comma-separated bootstrap endpoints.
    #[arg(long, env = "RECORDBASE_ENDPOINTS", default_value = "127.0.0.1:8500")]
    endpoints: String,

    /// Bearer token; empty for unauthenticated access.
    #[arg(long, env = "RECORDBASE_AUTH", default_value = "", hide_env_values = true)]
    token: String,

    /// Tenant the record belongs to.
    tenant: String,

    /// Primary key of the record.
    primary_key: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> recordbase_client::Result<()> {
    let client = RecordClient::connect(&cli.endpoints, &cli.token).await?;

    let record = client
        .get(proto::GetRequest { tenant: cli.tenant, primary_key: cli.primary_key })
        .await?;

    println!("tenant:      {}", record.tenant);
    println!("primary key: {}", record.primary_key);
    println!("version:     {}", record.version);
    println!("created at:  {}", record.created_at);
    println!("updated at:  {}", record.updated_at);
    for attr in &record.attributes {
        println!("  {} = {}", attr.name, attr.value);
    }
    if !record.file_names.is_empty() {
        println!("files:       {}", record.file_names.join(", "));
    }

    client.close();
    Ok(())
}
