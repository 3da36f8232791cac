// Copyright 2025 Granville Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use granville::queue::DEFAULT_QUEUE_SIZE;
use granville::{backend, ModelSpec, ServerConfig};
use std::path::PathBuf;
use tracing::{debug, info};

/// Granville - local inference kernel
#[derive(Parser, Debug)]
#[command(name = "granville", author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GRANVILLE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load models and serve tasks over the local socket
    Serve {
        /// Models to load: `path`, `type:path`, or `type:id:path`
        #[arg(required = true)]
        models: Vec<String>,

        /// Listening socket path
        #[arg(short, long, env = "GRANVILLE_SOCKET")]
        socket: Option<PathBuf>,

        /// Ranked queue capacity
        #[arg(short, long, default_value_t = DEFAULT_QUEUE_SIZE)]
        queue_size: usize,

        /// Worker thread count (default: one per model, capped at 8)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Inference driver name
        #[arg(short, long, env = "GRANVILLE_DRIVER", default_value = "echo")]
        driver: String,

        /// Reserved for the status endpoint
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the drivers this build can instantiate
    Drivers,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Serve {
            models,
            socket,
            queue_size,
            workers,
            driver,
            port,
        } => {
            if port.is_some() {
                debug!("status endpoint is not available yet; ignoring --port");
            }

            let mut builder = ServerConfig::builder()
                .queue_size(queue_size)
                .driver(driver);
            if let Some(socket) = socket {
                builder = builder.socket_path(socket);
            }
            if let Some(workers) = workers {
                builder = builder.worker_count(workers);
            }
            for spec in &models {
                builder = builder.model_spec(spec.parse::<ModelSpec>()?);
            }
            let config = builder.build()?;

            info!("Starting granville v{}", granville::VERSION);
            info!("Socket: {}", config.socket_path.display());
            info!(
                "Queue size: {}, Driver: {}, Models: {}",
                config.queue_size,
                config.driver,
                config.models.len()
            );

            granville::run_server(config)?;
        }
        Commands::Drivers => {
            for name in backend::available() {
                println!("{name}");
            }
        }
    }

    Ok(())
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .with(env_filter)
        .init();
}
