use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use memrepro::control_plane::{Binding, ControlPlaneClient, Namespace};
use memrepro::fanout::{FanOutReport, validate_width};
use memrepro::protocol::Operation;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

const NAMESPACE_NAME: &str = "memory-issue-namespace";
const SCRIPT_NAME: &str = "memory-issue-repro";
const NAMESPACE_BINDING_NAME: &str = "memoryNamespace";
const ACTOR_CLASS: &str = "MemoryActor";

#[derive(Parser)]
#[command(name = "repro-tool")]
#[command(about = "Deploy, tear down and drive the memory repro harness")]
struct Cli {
    /// Override the control-plane API base URL.
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the namespace if needed, upload the script and bind them.
    Push {
        #[arg(long)]
        script: PathBuf,
    },
    /// Delete the namespace and the script.
    Teardown,
    /// Run one fan-out against a running host and print its summary.
    Fanout {
        #[arg(long, default_value = "http://127.0.0.1:8787")]
        url: String,
        #[arg(long, default_value = "query")]
        operation: String,
        #[arg(long, default_value_t = 1)]
        n: usize,
        /// Print every per-actor response, not just the summary.
        #[arg(long)]
        responses: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Push { script } => push(client(cli.api_base)?, script).await,
        Command::Teardown => teardown(client(cli.api_base)?).await,
        Command::Fanout {
            url,
            operation,
            n,
            responses,
        } => fanout(&url, &operation, n, responses).await,
    }
}

fn read_required_env(name: &str) -> Result<String> {
    let value = std::env::var(name).unwrap_or_default().trim().to_string();
    if value.is_empty() {
        bail!("Need to set {}", name);
    }
    Ok(value)
}

fn client(api_base: Option<String>) -> Result<ControlPlaneClient> {
    dotenvy::dotenv().ok();
    let account_id = read_required_env("CF_ACCOUNT_ID")?;
    let api_token = read_required_env("CF_API_TOKEN")?;
    let client = ControlPlaneClient::new(account_id, api_token);
    Ok(match api_base {
        Some(base) => client.with_base_url(base),
        None => client,
    })
}

async fn push(client: ControlPlaneClient, script: PathBuf) -> Result<()> {
    let contents = fs::read(&script)
        .with_context(|| format!("failed to read script from {}", script.display()))?;

    let namespace = match client.find_namespace(NAMESPACE_NAME).await? {
        Some(namespace) => {
            println!("{} namespace exists", NAMESPACE_NAME);
            namespace
        }
        None => {
            println!("creating namespace {}...", NAMESPACE_NAME);
            let namespace = client.create_namespace(NAMESPACE_NAME, None, None).await?;
            println!("created namespace {}", NAMESPACE_NAME);
            namespace
        }
    };

    println!("putting script {}...", SCRIPT_NAME);
    let start = Instant::now();
    let bindings = vec![Binding::DurableObjectNamespace {
        name: NAMESPACE_BINDING_NAME.to_string(),
        namespace_id: namespace.id.clone(),
    }];
    client.put_script(SCRIPT_NAME, contents, bindings).await?;
    println!(
        "put script {} in {}ms",
        SCRIPT_NAME,
        start.elapsed().as_millis()
    );

    if !namespace.is_bound() {
        println!("defining namespace {}...", NAMESPACE_NAME);
        let bound = Namespace {
            script: Some(SCRIPT_NAME.to_string()),
            class: Some(ACTOR_CLASS.to_string()),
            ..namespace
        };
        client.update_namespace(&bound).await?;
        println!("defined namespace {}", NAMESPACE_NAME);
    }
    Ok(())
}

async fn teardown(client: ControlPlaneClient) -> Result<()> {
    println!("deleting namespace {}...", NAMESPACE_NAME);
    match client.find_namespace(NAMESPACE_NAME).await? {
        Some(namespace) => {
            client.delete_namespace(&namespace.id).await?;
            println!("deleted namespace {}", NAMESPACE_NAME);
        }
        None => println!("namespace {} does not exist", NAMESPACE_NAME),
    }

    println!("deleting script {}...", SCRIPT_NAME);
    match client.delete_script(SCRIPT_NAME).await {
        Ok(_) => println!("deleted script {}", SCRIPT_NAME),
        Err(err) if err.mentions("script_not_found") => {
            println!("script {} does not exist", SCRIPT_NAME)
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

async fn fanout(url: &str, operation: &str, n: usize, show_responses: bool) -> Result<()> {
    let operation: Operation = operation.parse()?;
    validate_width(n)?;
    let endpoint = format!("{}/{}/{}", url.trim_end_matches('/'), operation, n);

    let start = Instant::now();
    let response = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("request to {} failed", endpoint))?;
    let status = response.status();
    let body = response.text().await.context("failed to read response body")?;
    if !status.is_success() {
        return Err(anyhow!("{} answered HTTP {}: {}", endpoint, status, body));
    }

    let report: FanOutReport =
        serde_json::from_str(&body).context("response is not a fan-out report")?;
    let output = if show_responses {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string_pretty(&report.summary)?
    };
    println!("{}", output);
    println!("fan-out finished in {}ms", start.elapsed().as_millis());
    Ok(())
}
