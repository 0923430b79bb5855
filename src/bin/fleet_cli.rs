//! Fleet CLI Binary
//!
//! Command-line client for a running fleet runtime server.

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

/// Command-line client for the fleet runtime.
#[derive(Parser)]
#[command(name = "fleet-cli", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Base URL of a running fleet server.
    #[arg(long, env = "FLEET_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Tenant/path prefix, e.g. "acme/wh/a".
    #[arg(long, default_value = "demo")]
    path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current counter/children state.
    State,
    /// Increment the counter.
    Increment,
    /// Send a broadcast, or a direct message with `--to`.
    Message {
        /// Direct recipient child name; broadcasts to all children if omitted.
        #[arg(long)]
        to: Option<String>,
        text: String,
    },
    /// Apply a stock operation.
    Stock {
        sku: String,
        quantity: u32,
        #[arg(value_enum)]
        operation: StockOp,
    },
    /// Query current stock for a SKU.
    StockQuery {
        sku: String,
    },
    /// List active low-stock alerts.
    Alerts,
    /// Run the demand forecast for every SKU this agent tracks.
    Forecast,
    /// Delete this agent's entire subtree.
    DeleteSubtree,
}

#[derive(Clone, Copy, ValueEnum)]
enum StockOp {
    Set,
    Increment,
    Decrement,
}

impl StockOp {
    fn as_wire(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Increment => "increment",
            Self::Decrement => "decrement",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = format!("{}/{}", args.url.trim_end_matches('/'), args.path.trim_start_matches('/'));

    match args.command {
        Command::State => print_json(client.get(format!("{base}/state")).send().await?).await?,
        Command::Increment => print_json(client.post(format!("{base}/increment")).send().await?).await?,
        Command::Message { to, text } => {
            let body = json!({ "to": to, "message": text });
            print_status(client.post(format!("{base}/message")).json(&body).send().await?).await;
        }
        Command::Stock { sku, quantity, operation } => {
            let body = json!({ "sku": sku, "quantity": quantity, "operation": operation.as_wire() });
            print_status(client.post(format!("{base}/inventory/stock")).json(&body).send().await?).await;
        }
        Command::StockQuery { sku } => {
            print_json(client.get(format!("{base}/inventory/query")).query(&[("sku", sku)]).send().await?).await?;
        }
        Command::Alerts => print_json(client.get(format!("{base}/inventory/alerts")).send().await?).await?,
        Command::Forecast => print_json(client.get(format!("{base}/ai/forecast")).send().await?).await?,
        Command::DeleteSubtree => {
            print_status(client.post(format!("{base}/delete-subtree")).send().await?).await;
        }
    }
    Ok(())
}

async fn print_json(resp: reqwest::Response) -> anyhow::Result<()> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
    println!("{status}");
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn print_status(resp: reqwest::Response) {
    println!("{}", resp.status());
}
