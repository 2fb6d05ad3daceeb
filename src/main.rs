use stress_test::{stress_test_replicas, stress_test_scaling};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> crrow_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC REPLICATION STRESS TESTS                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Small scale, heavy key contention
    let stats = stress_test_replicas(4, 100, 200, 32).await?;
    stats.print();

    // Medium scale
    let stats = stress_test_replicas(10, 500, 1000, 256).await?;
    stats.print();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 3).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
