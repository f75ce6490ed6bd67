use std::time::Duration;

use clap::Parser;
use engine::{EngineError, PasswordHasher, UserService};

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = settings::Args::parse();
    let settings = settings::Settings::new(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "stocks={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let economy = settings.economy.economy()?;
    let schedule = settings.sweep.schedule()?;
    let addr = settings.server.addr()?;

    let db = engine::connect(&settings.database, &settings.security.key).await?;
    let service = UserService::new(
        db.clone(),
        PasswordHasher::new(&settings.security.salt),
        economy,
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut tasks = tokio::task::JoinSet::new();

    let server_service = service.clone();
    tasks.spawn(async move {
        if let Err(err) = server::run_with_listener(server_service, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    tasks.spawn(async move {
        schedule
            .run(|| {
                let service = service.clone();
                async move {
                    match service.convert_stocks().await {
                        Ok(converted) => {
                            for user in &converted {
                                tracing::info!("{user}");
                            }
                            tracing::info!("stock sweep paid {} users", converted.len());
                            Ok(())
                        }
                        Err(EngineError::ConversionInterrupted { converted, source }) => {
                            for user in &converted {
                                tracing::info!("{user}");
                            }
                            Err(*source)
                        }
                        Err(err) => Err(err),
                    }
                }
            })
            .await;
    });

    let deadline = async {
        match args.run_for {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted, shutting down");
        }
        _ = deadline => tracing::info!("run time elapsed, shutting down"),
        _ = tasks.join_next() => tracing::warn!("a task stopped, shutting down"),
    }

    tasks.shutdown().await;
    db.close().await?;

    Ok(())
}
