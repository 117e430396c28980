use std::path::PathBuf;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use courier::broker::amqp::AmqpBroker;
use courier::config::Settings;
use courier::inference::command::CommandAdapter;
use courier::{DispatchClient, Shutdown, Worker};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overrides the configured one
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume requests and answer them with an external program
    Worker {
        /// Queue to consume requests from
        #[arg(long)]
        input_queue: Option<String>,

        /// Queue for replies to requests that name no reply_to
        #[arg(long)]
        default_output_queue: Option<String>,

        /// Program (and arguments) that reads the request data on stdin and
        /// writes the result as JSON on stdout
        #[arg(long, num_args = 1.., allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Publish one request and print its reply
    Submit {
        /// The request's `data` object as JSON
        #[arg(long)]
        payload: String,

        /// Queue to publish to
        #[arg(long)]
        queue: Option<String>,

        /// Seconds to wait for the reply
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
        settings.logging.filter = None;
    }
    courier::logging::init(&settings.logging)?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            trigger.trigger();
        }
    });

    let broker = AmqpBroker::from_settings(&settings.broker);
    info!(broker = %settings.broker.redacted_uri(), "starting");

    match cli.command {
        Commands::Worker {
            input_queue,
            default_output_queue,
            command,
        } => {
            if let Some(queue) = input_queue {
                settings.worker.input_queue = queue;
            }
            if let Some(queue) = default_output_queue {
                settings.worker.default_output_queue = queue;
            }
            settings.validate()?;

            let (program, args) = command.split_first().ok_or("--command needs a program")?;
            let adapter = CommandAdapter::new(program.as_str(), args.iter().cloned());
            let worker = Worker::new(broker, adapter, &settings.worker, settings.retry.policy());
            if let Err(err) = worker.run(&shutdown).await {
                error!(error = %err, "worker stopped");
                return Err(err.into());
            }
        }
        Commands::Submit { payload, queue, timeout } => {
            if let Some(queue) = queue {
                settings.dispatch.request_queue = queue;
            }
            if let Some(timeout) = timeout {
                settings.dispatch.reply_timeout_secs = timeout;
            }
            settings.validate()?;

            let data = match serde_json::from_str::<Value>(&payload)? {
                Value::Object(data) => data,
                other => return Err(format!("payload must be a JSON object, got {other}").into()),
            };
            let client = DispatchClient::start(broker, settings.retry.policy(), &settings.dispatch);
            let submission = tokio::select! {
                submission = client.submit(data) => submission?,
                _ = shutdown.stopped() => return Ok(()),
            };
            info!(correlation_id = %submission.correlation_id, "waiting for reply");

            let reply = tokio::select! {
                reply = submission.reply => reply,
                _ = shutdown.stopped() => {
                    client.shutdown().await;
                    return Ok(());
                }
            };
            client.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&reply?)?);
        }
    }

    Ok(())
}
