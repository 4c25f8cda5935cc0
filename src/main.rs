// src/main.rs

mod analysis;
mod clock;
mod config;
mod frame_source;
mod led_board;
mod pipeline;
mod record_log;
mod topology;
mod types;
mod vehicle_detection;

use analysis::{ApproachDetector, RiskFusion};
use anyhow::{bail, Context, Result};
use clock::{Clock, MonotonicClock};
use frame_source::{ReplayLocator, ReplayReader};
use led_board::{LedBoard, Renderer};
use pipeline::{
    EventBus, JunctionEvent, JunctionMetrics, RoadWorker, StatusBroadcaster, TransitionWatcher,
};
use record_log::{JsonlRecordLog, NullSink, RecordClock, RecordSink, StatusRecord};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use topology::JunctionTopology;
use tracing::{debug, error, info, warn};
use types::{Config, SignalColor};

const MAX_PENDING_EVENTS: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config::config_path(
        std::env::args().nth(1),
        std::env::var(config::CONFIG_PATH_ENV).ok(),
    );
    let mut cfg = Config::load(&config_path)?;

    let log_filter =
        std::env::var(config::LOG_FILTER_ENV).unwrap_or_else(|_| cfg.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("🚦 Junction Safety System Starting");

    cfg.apply_shape_override(std::env::var(config::SHAPE_ENV).ok().as_deref())?;
    cfg.validate()?;
    info!("✓ Configuration loaded from {}", config_path.display());

    let topology = Arc::new(JunctionTopology::for_shape(cfg.junction.shape));
    let roads = cfg.active_roads(&topology);
    if roads.is_empty() {
        bail!("No roads to monitor for a {} junction", topology.shape());
    }

    let approach_config = cfg.approach.resolve();
    info!(
        "Junction {} | roads={:?} | profile={:?} confirm_frames={} hold={:.1}s near_field={:.0}",
        topology.shape(),
        roads.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        cfg.approach.profile,
        approach_config.approach_frames_required,
        approach_config.alert_hold.as_secs_f32(),
        approach_config.near_field_threshold
    );

    let detector = vehicle_detection::build_detector(&cfg.detector);
    let metrics = JunctionMetrics::new();
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock);

    let mut broadcaster = StatusBroadcaster::new(
        roads.iter().map(|r| r.name.clone()).collect(),
        cfg.pipeline.status_timeout(),
        approach_config.alert_hold,
        Arc::clone(&clock),
    );

    let shutdown_tx = Arc::new(watch::channel(false).0);
    spawn_quit_listener(Arc::clone(&shutdown_tx))?;
    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                shutdown_tx.send_replace(true);
            }
        });
    }

    // ===== ROAD WORKERS =====
    let locator = ReplayLocator::new(cfg.sources.input_dir.clone());
    let mut handles: Vec<(String, JoinHandle<()>)> = Vec::new();

    for (road, path) in locator.resolve(&roads) {
        let Some(path) = path else {
            broadcaster.mark_offline(&road, "no replay source found");
            continue;
        };
        let reader = match ReplayReader::open(&path) {
            Ok(reader) => reader,
            Err(e) => {
                broadcaster.mark_offline(&road, &format!("{:#}", e));
                continue;
            }
        };

        let (tick_rx, status_tx) = broadcaster.subscribe();
        let worker = RoadWorker::new(
            Box::new(reader),
            Arc::clone(&detector),
            ApproachDetector::new(road.clone(), approach_config.clone(), Arc::clone(&clock)),
            cfg.pipeline.frame_skip,
            metrics.clone(),
            status_tx,
        );
        let handle = worker.spawn(tick_rx, shutdown_tx.subscribe());
        handles.push((road, handle));
    }

    if handles.is_empty() {
        warn!("⚠️  No road has a working source; every road reports idle");
    } else {
        info!("✓ {} of {} road worker(s) running", handles.len(), roads.len());
    }

    let mut sink = open_record_sink(&cfg);
    let record_clock = RecordClock::start();
    let fusion = RiskFusion::new(Arc::clone(&topology));
    let mut renderer: Box<dyn Renderer> = Box::new(LedBoard::new(Arc::clone(&topology)));
    let mut bus = EventBus::new(MAX_PENDING_EVENTS);
    let mut watcher = TransitionWatcher::new();

    info!("Type 'q' + Enter or press Ctrl-C to stop");

    // ===== JUNCTION LOOP =====
    let mut interval = tokio::time::interval(cfg.pipeline.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    break;
                }
                continue;
            }
            _ = interval.tick() => {}
        }

        let snapshot = broadcaster.next_snapshot().await;
        metrics.inc(&metrics.ticks);
        metrics.add(&metrics.stale_statuses, snapshot.stale_roads.len() as u64);

        let signal = fusion.evaluate(&snapshot.statuses);
        if signal.signal == SignalColor::Yellow {
            metrics.inc(&metrics.yellow_ticks);
            for risk in fusion.score(&snapshot.statuses) {
                debug!(
                    "Tick {} risk [{}] {:.2} = vehicles {:.0} + proximity {:.2} + speed {:.2}",
                    snapshot.tick,
                    risk.road,
                    risk.risk,
                    risk.vehicle_term,
                    risk.proximity_term,
                    risk.speed_term
                );
            }
        }

        let timestamp = record_clock.now();
        for status in &snapshot.statuses {
            let record = StatusRecord::from_status(timestamp, snapshot.tick, status);
            match sink.append(&record) {
                Ok(()) => metrics.inc(&metrics.records_written),
                Err(e) => {
                    metrics.inc(&metrics.record_failures);
                    warn!("Failed to write status record for {}: {:#}", status.road, e);
                }
            }
        }

        renderer.render(&snapshot, &signal);

        watcher.observe(&snapshot, &signal, &mut bus);
        for event in bus.drain() {
            log_event(&event, &metrics);
        }

        if cfg.pipeline.stop_when_exhausted && broadcaster.all_finished() {
            info!("🏁 All road sources finished after {} ticks", snapshot.tick);
            break;
        }
    }

    // ===== SHUTDOWN =====
    shutdown_tx.send_replace(true);
    let deadline = tokio::time::Instant::now() + cfg.pipeline.shutdown_timeout();
    for (road, mut handle) in handles {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ [{}] Road worker failed: {}", road, e),
            Err(_) => {
                warn!("⚠️  [{}] Road worker did not stop in time, aborting", road);
                handle.abort();
            }
        }
    }

    if let Err(e) = sink.flush() {
        error!("Failed to flush status records: {:#}", e);
    }

    let summary = metrics.summary();
    info!("\n========================================");
    info!("✓ Junction run complete");
    info!("  Ticks: {} ({:.1}/s)", summary.ticks, summary.tick_rate);
    info!("  Yellow ticks: {}", summary.yellow_ticks);
    info!("  Signal changes: {}", summary.signal_changes);
    info!("  Frames processed: {}", summary.frames_processed);
    info!("  Stale statuses: {}", summary.stale_statuses);
    if summary.detector_failures > 0 || summary.record_failures > 0 {
        warn!(
            "  ⚠️  Detector failures: {} | record failures: {}",
            summary.detector_failures, summary.record_failures
        );
    }
    info!("  Records written: {}", summary.records_written);
    debug!(
        "Metrics: {}",
        serde_json::to_string(&summary).context("Failed to serialize metrics")?
    );
    info!("========================================\n");

    Ok(())
}

fn open_record_sink(cfg: &Config) -> Box<dyn RecordSink> {
    if !cfg.logging.records_enabled {
        info!("Status record logging disabled");
        return Box::new(NullSink);
    }
    match JsonlRecordLog::create(&cfg.logging.record_path) {
        Ok(log) => Box::new(log),
        Err(e) => {
            warn!("⚠️  Status records disabled: {:#}", e);
            Box::new(NullSink)
        }
    }
}

/// Console quit control. Runs on a plain thread since stdin reads block.
fn spawn_quit_listener(shutdown_tx: Arc<watch::Sender<bool>>) -> Result<()> {
    std::thread::Builder::new()
        .name("quit-listener".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let cmd = line.trim();
                if cmd.eq_ignore_ascii_case("q") || cmd.eq_ignore_ascii_case("quit") {
                    info!("Quit requested from console");
                    shutdown_tx.send_replace(true);
                    break;
                }
            }
        })
        .context("Failed to start quit listener")?;
    Ok(())
}

fn log_event(event: &JunctionEvent, metrics: &JunctionMetrics) {
    match event {
        JunctionEvent::SignalChanged { tick, from, to } => {
            metrics.inc(&metrics.signal_changes);
            match to.signal {
                SignalColor::Yellow => warn!(
                    "🟡 Tick {}: signal {} -> YELLOW, hazard from {}",
                    tick,
                    from.signal.as_str(),
                    to.direction_name()
                ),
                SignalColor::Green => info!(
                    "🟢 Tick {}: signal {} -> GREEN",
                    tick,
                    from.signal.as_str()
                ),
            }
        }
        JunctionEvent::RoadAlertChanged { tick, road, alert } => {
            debug!("Tick {}: [{}] alert={}", tick, road, alert);
        }
        JunctionEvent::RoadsStale { tick, roads } => {
            debug!("Tick {}: stale statuses from {:?}", tick, roads);
        }
    }
}
