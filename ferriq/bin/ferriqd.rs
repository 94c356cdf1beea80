#![deny(clippy::pedantic, clippy::all, clippy::nursery)]

use tracing::info;

use ferriq::{BrokerConfig, Ferriq};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ferriq::logging::init();

    let config = match BrokerConfig::find_file()? {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            BrokerConfig::from_file(&path)?
        }
        None => {
            info!("no configuration file found, using defaults");
            BrokerConfig::default()
        }
    };

    Ferriq::new(config).run().await
}
