use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "txledger-cli")]
#[command(about = "CLI client for the transaction ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine a transaction into the chain right away
    Submit {
        /// Transaction id
        #[arg(long)]
        id: String,
        /// Extra fields as key=value; values are parsed as JSON when possible
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Queue a transaction as pending in the node's transaction store
    Enqueue {
        #[arg(long)]
        id: String,
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Sync every pending transaction
    Sync,
    /// Verify a signed transaction against the chain
    Verify {
        /// Transaction JSON, exactly as it was signed
        #[arg(long)]
        tx: String,
        /// Hex Ed25519 signature
        #[arg(long)]
        signature: String,
        /// Hex Ed25519 public key
        #[arg(long)]
        public_key: String,
    },
    /// Print the whole chain
    Chain,
    /// Audit the chain
    Validate,
}

fn transaction(id: String, fields: &[String]) -> Result<Value> {
    let mut tx = Map::new();
    for field in fields {
        let (key, raw) = field
            .split_once('=')
            .with_context(|| format!("field {field:?} is not KEY=VALUE"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        tx.insert(key.to_string(), value);
    }
    tx.insert("id".into(), Value::String(id));
    Ok(Value::Object(tx))
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let node = cli.node.trim_end_matches('/');
    let req = match cli.cmd {
        Command::Submit { id, fields } => client
            .post(format!("{node}/tx"))
            .json(&transaction(id, &fields)?),
        Command::Enqueue { id, fields } => client
            .post(format!("{node}/transactions"))
            .json(&transaction(id, &fields)?),
        Command::Sync => client.post(format!("{node}/sync")),
        Command::Verify {
            tx,
            signature,
            public_key,
        } => {
            let tx: Value = serde_json::from_str(&tx).context("--tx is not JSON")?;
            client.post(format!("{node}/verify")).json(&json!({
                "transaction": tx,
                "signature": signature,
                "publicKey": public_key,
            }))
        }
        Command::Chain => client.get(format!("{node}/chain")),
        Command::Validate => client.get(format!("{node}/chain/valid")),
    };
    debug!("sending {req:?}");

    let res = req.send().await?;
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    match serde_json::from_str::<Value>(&body) {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}
