//! The three subcommands.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use websub_subscriber::store::SubscriptionIter;
use websub_subscriber::{
    CallbackServerConfig, DiscoverOptions, JsonFileStore, SubscribeOptions, SubscriberConfig,
    SubscriptionEngine, SubscriptionInfo,
};

use crate::events::{describe, forward, LabeledEvent};
use crate::SubscribeArgs;

pub async fn discover(topic: &str, head_only: bool) -> Result<()> {
    let engine = SubscriptionEngine::builder(SubscriberConfig::default())
        .build()
        .context("Failed to create subscription engine")?;

    let discovery = engine
        .discover(topic, DiscoverOptions { head_only })
        .await
        .with_context(|| format!("Failed to discover {topic}"))?;

    println!("Topic: {}", discovery.topic);
    if discovery.hubs.is_empty() {
        println!("No hubs advertised");
    }
    for hub in &discovery.hubs {
        println!("Hub:   {hub}");
    }
    Ok(())
}

pub async fn list(store_path: &Path, json: bool) -> Result<()> {
    let store = JsonFileStore::open(store_path)
        .await
        .with_context(|| format!("Failed to open {}", store_path.display()))?;
    let records: Vec<SubscriptionInfo> = SubscriptionIter::snapshot(&store)
        .await?
        .map(SubscriptionInfo::from)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No subscriptions in {}", store_path.display());
        return Ok(());
    }
    for info in &records {
        let expires = info
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9} {}  via {}  expires {}",
            info.callback,
            info.state.as_str(),
            info.topic,
            info.hub,
            expires
        );
    }
    Ok(())
}

pub async fn subscribe(args: SubscribeArgs) -> Result<()> {
    let store = JsonFileStore::open(&args.store)
        .await
        .with_context(|| format!("Failed to open {}", args.store.display()))?;

    let mut config = SubscriberConfig::new();
    if let Some(url) = &args.public_url {
        config = config.with_callback_base_url(url.clone());
    }
    let engine = SubscriptionEngine::builder(config)
        .with_store(Arc::new(store))
        .build()
        .context("Failed to create subscription engine")?;

    let mut server_config = CallbackServerConfig::default().with_port_range(args.port_start, args.port_end);
    if let Some(url) = &args.public_url {
        server_config = server_config.with_public_base_url(url.clone());
    }
    let server = engine
        .serve(server_config)
        .await
        .context("Failed to start callback server")?;
    info!(base_url = %server.base_url(), "callback server ready");

    let (sink, mut printed) = mpsc::channel::<LabeledEvent>(64);

    let recovered = engine.recover().await.context("Failed to recover subscriptions")?;
    if recovered > 0 {
        info!(recovered, "resuming stored subscriptions");
        for info in engine.all_subscriptions().await? {
            let events = engine.watch(&info.callback).await?;
            tokio::spawn(forward(info.callback, info.hub, events, sink.clone()));
        }
    }
    engine.start_renewal().await;

    let mut options = SubscribeOptions::new().with_renew_window(args.renew_window());
    if let Some(lease) = args.lease {
        options = options.with_lease_seconds(lease);
    }
    if let Some(max_hubs) = args.max_hubs {
        options = options.with_max_hubs(max_hubs);
    }
    if args.secret {
        options = options.with_secret();
    }
    if args.head_only {
        options = options.head_only();
    }

    let result = engine
        .subscribe(&args.topic, options)
        .await
        .with_context(|| format!("Failed to subscribe to {}", args.topic))?;
    for (hub, e) in &result.failed {
        warn!(%hub, error = %e, "hub refused the subscription");
    }

    let callbacks: Vec<String> = result.callbacks().into_iter().map(str::to_string).collect();
    println!("Subscribed to {} at {} hub(s)", result.topic, callbacks.len());
    for handle in result.subscriptions {
        let callback = handle.info.callback.clone();
        let hub = handle.info.hub.clone();
        tokio::spawn(forward(callback, hub, handle.events, sink.clone()));
    }
    drop(sink);

    loop {
        tokio::select! {
            received = printed.recv() => match received {
                Some(labeled) => println!("{}", describe(&labeled, args.show_body)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    if args.cancel_on_exit {
        for callback in &callbacks {
            if let Err(e) = engine.cancel(callback).await {
                error!(%callback, error = %e, "failed to cancel subscription");
            }
        }
    }

    engine.shutdown().await?;
    server.shutdown().await?;
    Ok(())
}
