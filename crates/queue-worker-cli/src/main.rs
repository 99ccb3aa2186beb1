use queue_worker_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(error = %e, "Queue worker failed");
        eprintln!("queue-worker: {}", e);

        std::process::exit(e.exit_code());
    }
}
