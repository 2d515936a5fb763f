use ord_context_broker::{build_store, init_tracing, BrokerConfig, ContextBroker};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = BrokerConfig::from_env()?;
    let store = build_store(&config);
    let (broker, _report) = ContextBroker::start(store, config).await?;

    let user_id = "test_user_123";

    // Process a user message
    let context = broker.process(user_id, "Tell me about Bitcoin Ordinals").await?;
    println!("\nGenerated context:");
    println!("{}", serde_json::to_string_pretty(&context)?);

    // Record a simulated response
    let response =
        "Bitcoin Ordinals are a way to assign unique identifiers to individual satoshis.";
    broker.record_response(user_id, response, &[], &[]).await?;

    broker
        .record_user_preference(user_id, "favorite_topic", "rare_satoshis")
        .await?;

    let context = broker.process(user_id, "What are rare satoshis?").await?;
    println!("\nUpdated context:");
    println!("{}", serde_json::to_string_pretty(&context)?);

    info!(epoch = broker.current_epoch(), "Demo complete");
    Ok(())
}
