use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

use spcall::config::{DelaySpec, OperationPolicy};
use spcall::logging::{init_logging, LoggingConfig};
use spcall::{
    ApiClient, ApiError, CallContext, CancelHandle, ErrorClassifier, HttpTransport, InvokeError,
    Invoker, Method, PolicyConfig, RequestDescriptor, ResponseEnvelope,
};

/// Exit code for a call that failed with a classified error.
const EXIT_CALL_FAILED: u8 = 1;
/// Exit code for bad arguments or configuration.
const EXIT_USAGE: u8 = 2;
/// Exit code when the overall deadline passed (matches timeout(1)).
const EXIT_DEADLINE: u8 = 124;
/// Exit code after Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

/// Name used for ad-hoc policies given on the command line.
const AD_HOC_OPERATION: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "spcall")]
#[command(version)]
#[command(about = "Issue REST API calls with rate metering, retries and error classification")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Policy configuration file (TOML)
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify an error response body and print the result as JSON
    Classify {
        /// Response body; read from stdin when omitted
        body: Option<String>,

        /// HTTP status that accompanied the body
        #[arg(long)]
        status: Option<u16>,
    },
    /// Print the resolved policy for every configured operation
    Policies,
    /// Issue a single request
    Call {
        /// Scheme and host of the API, e.g. https://sellingpartnerapi-na.amazon.com
        #[arg(long, value_name = "URL")]
        base_url: String,

        /// Configured operation whose policy applies to this call
        #[arg(long, short)]
        operation: Option<String>,

        /// Requests per second (overrides the operation's rate)
        #[arg(long)]
        rate: Option<f64>,

        /// Linear backoff step in seconds; enables retries
        #[arg(long, value_name = "SECONDS")]
        retry_step: Option<f64>,

        /// Maximum attempts including the first
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Overall deadline in seconds, retries and waits included
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<f64>,

        /// Query parameter as NAME=VALUE (repeatable)
        #[arg(long, short, value_name = "NAME=VALUE")]
        query: Vec<String>,

        /// Header as NAME:VALUE (repeatable)
        #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
        headers: Vec<String>,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,

        /// HTTP method
        method: Method,

        /// Request path, e.g. /orders/v0/orders
        path: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] spcall::PolicyConfigError),
    #[error(transparent)]
    Transport(#[from] spcall::TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_verbosity(cli.verbose));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let policies = match &cli.config {
        Some(path) => PolicyConfig::load(path)?,
        None => PolicyConfig::default(),
    };

    match cli.command {
        Commands::Classify { body, status } => {
            let body = match body {
                Some(body) => body,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };
            let classifier = ErrorClassifier::default();
            let error = match status {
                Some(status) => classifier.classify_response(&ResponseEnvelope::new(status, body)),
                None => classifier.classify(&body),
            };
            println!("{}", serde_json::to_string_pretty(&error_json(&error))?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Policies => {
            let mut operations = serde_json::Map::new();
            for name in policies.operation_names() {
                let resolved = policies.resolve(name);
                operations.insert(
                    name.to_string(),
                    json!({
                        "rate": resolved.rate,
                        "max_attempts": resolved.retry.as_ref().map(|r| r.max_attempts()).unwrap_or(1),
                        "total_backoff_secs": resolved.retry.as_ref().map(|r| r.total_backoff().as_secs_f64()),
                        "timeout_secs": resolved.timeout.map(|t| t.as_secs_f64()),
                    }),
                );
            }
            println!("{}", serde_json::to_string_pretty(&operations)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Call {
            base_url,
            operation,
            rate,
            retry_step,
            max_attempts,
            timeout,
            query,
            headers,
            body,
            method,
            path,
        } => {
            let mut policies = policies;
            let operation = operation.unwrap_or_else(|| AD_HOC_OPERATION.to_string());
            if rate.is_some() || retry_step.is_some() || max_attempts.is_some() || timeout.is_some() {
                let base = policies.get(&operation).cloned().unwrap_or_default();
                let policy = OperationPolicy {
                    rate: rate.or(base.rate),
                    delay: retry_step
                        .map(|step_secs| DelaySpec::Linear { step_secs })
                        .or(base.delay),
                    max_attempts: max_attempts.or(base.max_attempts),
                    timeout_secs: timeout.or(base.timeout_secs),
                };
                policies.operations.insert(operation.clone(), policy);
                policies.validate()?;
            }

            let request = build_request(method, &path, &query, &headers, body.as_deref())?;
            let client = ApiClient::new(HttpTransport::new(base_url)?).with_policies(policies);
            let invoker = client.operation(&operation)?;
            debug!(
                operation = %operation,
                timeout = ?invoker.timeout().map(|t| t.as_secs_f64()),
                "issuing request"
            );

            let cancel = CancelHandle::new();
            let ctx = CallContext::none().with_cancel(cancel.clone());
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("cancelling request");
                    cancel.cancel();
                }
            });

            match invoker.execute_with(&request, &ctx).await {
                Ok(response) => {
                    println!("{}", response.body());
                    Ok(ExitCode::SUCCESS)
                }
                Err(InvokeError::Api(error)) => {
                    println!("{}", serde_json::to_string_pretty(&error_json(&error))?);
                    Ok(ExitCode::from(EXIT_CALL_FAILED))
                }
                Err(InvokeError::DeadlineExceeded { last }) => {
                    if let Some(error) = last {
                        println!("{}", serde_json::to_string_pretty(&error_json(&error))?);
                    }
                    eprintln!("Error: deadline exceeded");
                    Ok(ExitCode::from(EXIT_DEADLINE))
                }
                Err(InvokeError::Cancelled) => {
                    eprintln!("Error: cancelled");
                    Ok(ExitCode::from(EXIT_CANCELLED))
                }
            }
        }
    }
}

fn build_request(
    method: Method,
    path: &str,
    query: &[String],
    headers: &[String],
    body: Option<&str>,
) -> Result<RequestDescriptor, CliError> {
    let mut builder = RequestDescriptor::builder(method, path);
    for pair in query {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| CliError::Usage(format!("query must be NAME=VALUE, got '{}'", pair)))?;
        builder = builder.query(name, value);
    }
    for pair in headers {
        let (name, value) = pair
            .split_once(':')
            .ok_or_else(|| CliError::Usage(format!("header must be NAME:VALUE, got '{}'", pair)))?;
        builder = builder.header(name.trim(), value.trim());
    }
    if let Some(body) = body {
        builder = builder.body(serde_json::from_str(body)?);
    }
    Ok(builder.build())
}

fn error_json(error: &ApiError) -> serde_json::Value {
    json!({
        "kind": error.kind().name(),
        "code": error.code(),
        "message": error.message(),
        "status": error.status(),
        "retriable": error.is_retriable(),
        "details": error.details(),
        "context": error.context(),
    })
}
