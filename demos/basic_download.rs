//! Basic download example
//!
//! Demonstrates the core flow:
//! - Configuring an NNTP server and a destination category
//! - Building an `Engine` and subscribing to its event bus
//! - Ingesting an NZB file
//! - Running the engine until a termination signal arrives

use nzb_engine::config::{CategoryConfig, ServerConfig};
use nzb_engine::{Engine, EngineConfig, Event};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = ServerConfig {
        host: "news.example.com".to_string(),
        port: 563,
        tls: true,
        username: Some("your_username".to_string()),
        password: Some("your_password".to_string()),
        connections: 10,
        level: 0,
        group: 0,
        active: true,
        optional: false,
        pipeline_depth: 10,
    };

    let config = EngineConfig {
        servers: vec![server],
        categories: vec![CategoryConfig {
            name: "movies".to_string(),
            destination: "downloads/movies".into(),
        }],
        temp_dir: "temp".into(),
        ..Default::default()
    };

    let engine = Engine::new(config).await?;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::ArticleStarted { nzb_id, article_id } => {
                    println!("started article {article_id} for nzb {nzb_id}");
                }
                Event::FileCompleted { nzb_id, completed, .. } => {
                    println!("file {} assembled for nzb {nzb_id}", completed.filename);
                }
                Event::NzbDownloaded { nzb_id } => {
                    println!("nzb {nzb_id} fully downloaded, entering post-processing");
                }
                Event::NzbHealthFailed { nzb_id } => {
                    println!("nzb {nzb_id} fell below the health threshold");
                }
                _ => {}
            }
        }
    });

    let xml = std::fs::read("example.nzb")?;
    let nzb_id = engine.add_nzb(&xml, "Example.Release", "example.nzb").await?;
    println!("added nzb {nzb_id}");

    nzb_engine::run_with_shutdown(engine).await?;
    Ok(())
}
