//! Create an entry and list the store using the Azure CLI login.
//!
//! ```text
//! az login
//! APPCONFIG_ENDPOINT=https://my-config.azconfig.io cargo run -p appconfig-core --example keyvalues
//! ```

use appconfig_core::{AppConfigClient, CreateOrUpdateKeyValueArgs, KeyValueStore, ListKeyValuesArgs, UreqTransport};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("appconfig_core=info")))
        .init();

    let endpoint =
        std::env::var("APPCONFIG_ENDPOINT").unwrap_or_else(|_| "https://my-config.azconfig.io".to_string());
    let client = AppConfigClient::from_cli(&endpoint, UreqTransport::new())?;

    let created = client.create_or_update_key_value(
        &CreateOrUpdateKeyValueArgs::new("mykey", "myvalue").with_label("mylabel"),
    )?;
    println!("KeyValue created. Key: {}", created.key.unwrap_or_default());

    let list = client.list_key_values(&ListKeyValuesArgs::default())?;
    for (i, item) in list.items.iter().enumerate() {
        println!("KeyValue {}. Key: {}", i + 1, item.key.as_deref().unwrap_or_default());
    }
    Ok(())
}
