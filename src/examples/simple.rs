//! Simple example of using proxy-rotator.

use proxy_rotator::source::sources_from_config;
use proxy_rotator::{ExportFiles, ProxyPool, ProxyPoolConfig, ProxyPoolMiddleware, Verifier};
use reqwest_middleware::ClientBuilder;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    let config = ProxyPoolConfig::builder()
        // free http proxy lists, one `ip:port` per line
        .sources(vec![
            "https://raw.githubusercontent.com/clarketm/proxy-list/master/proxy-list-raw.txt",
            "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
        ])
        .max_in_flight(100)
        .probe_timeout(Duration::from_secs(5))
        .retry_count(2)
        // rate limit for each proxy, lower performance but avoid banned
        .max_requests_per_second(3.0)
        .build();

    let files = ExportFiles::in_dir(std::env::temp_dir());
    let pool = match ProxyPool::import(config.clone(), &files) {
        Ok(pool) => pool,
        Err(e) => {
            println!("Starting with an empty pool: {}", e);
            ProxyPool::new(config.clone())
        }
    };
    let pool = Arc::new(pool);

    let verifier = Verifier::http(&config);
    let sources = sources_from_config(&config.sources);
    let report = pool.fetch_sources(&sources, &verifier, false).await;
    println!("Verified: {:?}", report);

    let _maintenance = pool.spawn_maintenance();

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ProxyPoolMiddleware::new(Arc::clone(&pool)))
        .build();

    println!("Sending request...");
    let response = client.get("https://httpbin.org/ip").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);

    pool.export(&files)?;
    Ok(())
}
