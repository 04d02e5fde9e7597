use settle_cli::{build_cli, run, wants_json_logs};
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if wants_json_logs(&matches) {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut stdout = std::io::stdout().lock();
    let converged = run(&matches, &mut stdout).await?;
    stdout.flush()?;
    std::process::exit(if converged { 0 } else { 1 });
}
