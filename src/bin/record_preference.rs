use ord_context_broker::{build_store, init_tracing, BrokerConfig, ContextBroker};
use serde_json::json;

const USER_ID: &str = "test_user_1742690565421";
const PREFERENCE_TYPE: &str = "preferred_network";
const PREFERENCE_VALUE: &str = "mainnet";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = BrokerConfig::from_env()?;
    let store = build_store(&config);
    let (broker, _report) = ContextBroker::start(store, config).await?;

    broker
        .record_user_preference(USER_ID, PREFERENCE_TYPE, PREFERENCE_VALUE)
        .await?;

    println!("{}", json!({ "success": true }));
    Ok(())
}
