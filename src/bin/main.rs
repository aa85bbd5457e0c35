use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use wsrpc::{
    CallRequest, RpcClient, RpcError, RpcResult, RpcSettings, StreamEvent, StreamRequest,
    load_settings,
};

/// Call or stream methods on a wsrpc server over WebSocket, falling back to HTTP
#[derive(Parser)]
#[command(name = "wsrpc")]
#[command(version)]
#[command(about = "Call or stream methods on a wsrpc server")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Config file layered over the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server endpoint (http, https, ws or wss URL)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Never open a WebSocket; send every request over HTTP
    #[arg(long, global = true)]
    disable_websocket: bool,

    /// Default HTTP header, repeatable (KEY=VALUE)
    #[arg(long = "header", value_name = "KEY=VALUE", value_parser = parse_header, global = true)]
    headers: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a method and print its response
    Call {
        /// Method name
        method: String,

        /// Parameters as JSON
        #[arg(value_parser = parse_json)]
        params: Option<Value>,
    },
    /// Stream a method and print each increment until it completes
    Stream {
        /// Method name
        method: String,

        /// Parameters as JSON
        #[arg(value_parser = parse_json)]
        params: Option<Value>,

        /// Stop after this many increments
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))
}

impl ConnectionArgs {
    fn overrides(&self) -> RpcSettings {
        RpcSettings {
            endpoint: self.endpoint.clone(),
            disable_websocket: self.disable_websocket.then_some(true),
            default_headers: (!self.headers.is_empty())
                .then(|| self.headers.iter().cloned().collect::<BTreeMap<_, _>>()),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> RpcResult<()> {
    let settings = load_settings(
        cli.connection.config.as_deref(),
        Some(cli.connection.overrides()),
    )?;
    let client = RpcClient::connect(&settings)?;

    if let Err(e) = client.ready().await {
        // Requests still go out over HTTP while the socket retries
        eprintln!("Warning: {}", e);
    }

    match cli.command {
        Commands::Call { method, params } => {
            let mut request = CallRequest::new().method(method);
            if let Some(params) = params {
                request = request.params(params);
            }
            let Some(pending) = client.call(request).pop() else {
                return Err(RpcError::EngineStopped);
            };
            match pending.await {
                Ok(response) => print_json(response.raw()),
                Err(RpcError::Remote(response)) => {
                    print_json(response.raw());
                    std::process::exit(1);
                }
                Err(e) => return Err(e),
            }
        }
        Commands::Stream {
            method,
            params,
            limit,
        } => {
            let mut request = StreamRequest::new().method(method);
            if let Some(params) = params {
                request = request.params(params);
            }
            let mut stream = client.stream(request);
            let mut received = 0;
            while let Some(event) = stream.recv().await {
                print_json(event.response().raw());
                match event {
                    StreamEvent::Data(_) => {
                        received += 1;
                        if limit.is_some_and(|limit| received >= limit) {
                            break;
                        }
                    }
                    StreamEvent::Error(_) => {}
                    StreamEvent::Complete(_) => break,
                }
            }
        }
    }

    Ok(())
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}
