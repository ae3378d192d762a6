//! Nitric FaaS echo worker
//!
//! Answers HTTP triggers with a JSON description of the request and
//! acknowledges topic events after logging them.

use serde_json::json;
use tokio::signal;
use tracing::info;

use nitric_faas::logging::init_logging;
use nitric_faas::{FaasServer, Reply, Trigger, TriggerContext, WorkerConfig};

fn parse_args() -> WorkerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = WorkerConfig::from_env();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--address" | "-a" => {
                if i + 1 < args.len() {
                    config.service_address = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("error: --address requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("nitric-faas-echo - Nitric FaaS echo worker");
                println!();
                println!("USAGE:");
                println!("    nitric-faas-echo [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -a, --address <ADDR>      Runtime address [default: $SERVICE_ADDRESS or 127.0.0.1:50051]");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    config
}

async fn echo(trigger: Trigger) -> anyhow::Result<Reply> {
    match trigger.context() {
        TriggerContext::Http(http) => {
            let body = String::from_utf8_lossy(trigger.data());
            Ok(Reply::json(&json!({
                "method": http.method,
                "path": http.path,
                "headers": http.headers,
                "query": http.query_params,
                "body": body,
            }))?)
        }
        TriggerContext::Topic(topic) => {
            info!(topic = %topic.topic, bytes = trigger.data().len(), "topic event received");
            Ok(Reply::empty())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let config = parse_args();

    info!(version = env!("CARGO_PKG_VERSION"), address = %config.service_address, "starting echo worker");

    let result = FaasServer::new(config)
        .with_handler(echo)
        .run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await;

    match result {
        Ok(()) => {
            info!("shut down");
            Ok(())
        }
        Err(err) if err.is_connection_refused() => {
            eprintln!("error: {err} - is the Nitric runtime running?");
            std::process::exit(2);
        }
        Err(err) => Err(err.into()),
    }
}
