use ord_context_broker::{build_store, init_tracing, BrokerConfig, ContextBroker};
use serde_json::json;

const USER_ID: &str = "test_user_1742690565421";
const RESPONSE: &str = "Bitcoin Ordinals are a way to assign unique identifiers to individual \
                        satoshis on the Bitcoin blockchain.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = BrokerConfig::from_env()?;
    let store = build_store(&config);
    let (broker, _report) = ContextBroker::start(store, config).await?;

    let new_facts = vec!["Bitcoin has 100 million satoshis per coin".to_string()];
    let new_knowledge = vec!["Ordinal inscriptions became popular in early 2023".to_string()];

    broker
        .record_response(USER_ID, RESPONSE, &new_facts, &new_knowledge)
        .await?;

    println!("{}", json!({ "success": true }));
    Ok(())
}
