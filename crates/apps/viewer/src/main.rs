use std::collections::BTreeMap;

use clap::Parser;
use foundation::math::{driving_minutes, nearest_distance_meters, LatLng};
use streaming::{Spot, SpotId, SpotStatus};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use viewer::{Args, SpotView, SyncEngine, ViewerConfig, ViewerError};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), ViewerError> {
    let origin = args.origin;
    let config = ViewerConfig::from_args(&args)?;
    let (bounds, status) = (config.bounds, config.status);
    info!("parkview using {} (live {})", config.api_base, config.ws_url);

    let engine = SyncEngine::start(config)?;
    let mut updates = engine.subscribe();
    engine.set_viewport(bounds, status);

    let mut last: BTreeMap<SpotId, SpotStatus> = BTreeMap::new();
    let mut was_connected = false;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if view.connected != was_connected {
                    was_connected = view.connected;
                    let state = if view.connected { "connected" } else { "disconnected" };
                    println!("live channel {state}");
                }
                report(&view, &engine.counts_by_status(), &mut last, origin);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn report(
    view: &SpotView,
    counts: &BTreeMap<SpotStatus, usize>,
    last: &mut BTreeMap<SpotId, SpotStatus>,
    origin: Option<LatLng>,
) {
    let current: BTreeMap<SpotId, SpotStatus> =
        view.spots.iter().map(|s| (s.id, s.status)).collect();
    if current == *last {
        return;
    }

    for spot in view.spots.iter() {
        match last.get(&spot.id) {
            Some(prev) if *prev != spot.status => {
                println!("  spot {} ({}) {prev} -> {}", spot.id, label(spot), spot.status);
            }
            _ => {}
        }
    }

    let summary: Vec<String> = counts.iter().map(|(s, n)| format!("{s} {n}")).collect();
    println!(
        "rev {}: {} spots [{}]",
        view.revision,
        view.spots.len(),
        summary.join(", ")
    );

    if let Some(origin) = origin {
        let free = view.spots.iter().filter(|s| s.is_available()).map(Spot::position);
        match nearest_distance_meters(origin, free) {
            Some(m) => println!(
                "  nearest available: {:.0} m, ~{} min drive",
                m,
                driving_minutes(m)
            ),
            None => println!("  no available spots in view"),
        }
    }

    *last = current;
}

fn label(spot: &Spot) -> &str {
    if spot.location.is_empty() {
        spot.city.as_deref().unwrap_or("-")
    } else {
        &spot.location
    }
}
