mod config;
mod logging;
mod rpc;
mod server;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = config::Config::from_env()?;
    server::serve(config).await
}
