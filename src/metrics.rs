// Prometheus metrics definitions for the tilewar server.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// 1 while the simulation thread is running.
    pub static ref ACTIVE_GAMES: IntGauge =
        IntGauge::new("tilewar_active_games", "Currently running games").unwrap();

    /// Live TCP connections (players and spectators).
    pub static ref CONNECTED_CLIENTS: IntGauge =
        IntGauge::new("tilewar_connected_clients", "Live client connections").unwrap();

    /// Soldiers currently on the board, dying ones included.
    pub static ref LIVE_UNITS: IntGauge =
        IntGauge::new("tilewar_live_units", "Soldiers currently on the board").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    pub static ref TICKS_TOTAL: IntCounter =
        IntCounter::new("tilewar_ticks_total", "Simulation ticks run").unwrap();

    /// Player commands, by outcome (applied / refused).
    pub static ref COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tilewar_commands_total", "Player commands processed"),
        &["outcome"],
    )
    .unwrap();

    /// Buildings started, by tag.
    pub static ref BUILDINGS_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tilewar_buildings_started_total", "Buildings placed or upgraded"),
        &["kind"],
    )
    .unwrap();

    /// Buildings destroyed in combat, by tag.
    pub static ref BUILDINGS_DESTROYED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tilewar_buildings_destroyed_total", "Buildings destroyed"),
        &["kind"],
    )
    .unwrap();

    pub static ref UNITS_RELEASED: IntCounter =
        IntCounter::new("tilewar_units_released_total", "Soldiers released onto paths").unwrap();

    pub static ref PLAYERS_ELIMINATED_TOTAL: IntCounter =
        IntCounter::new("tilewar_players_eliminated_total", "Players who lost their castle").unwrap();

    /// Total snapshot messages put on the broadcast channel.
    pub static ref SNAPSHOTS_BROADCAST_TOTAL: IntCounter = IntCounter::new(
        "tilewar_snapshots_broadcast_total",
        "Snapshots broadcast to clients",
    )
    .unwrap();

    /// Inbound lines that failed to decode.
    pub static ref MALFORMED_MESSAGES_TOTAL: IntCounter = IntCounter::new(
        "tilewar_malformed_messages_total",
        "Malformed client messages",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Per-tick processing time in milliseconds.
    pub static ref GAME_TICK_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("tilewar_game_tick_duration_ms", "Per-tick processing time in ms")
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
    )
    .unwrap();

    /// Encoded snapshot size in bytes.
    pub static ref SNAPSHOT_BYTES: Histogram = Histogram::with_opts(
        HistogramOpts::new("tilewar_snapshot_bytes", "Encoded snapshot size in bytes")
            .buckets(vec![512.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0]),
    )
    .unwrap();
}

static REGISTER: Once = Once::new();

/// Register all metrics with the custom registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(ACTIVE_GAMES.clone()),
            Box::new(CONNECTED_CLIENTS.clone()),
            Box::new(LIVE_UNITS.clone()),
            Box::new(TICKS_TOTAL.clone()),
            Box::new(COMMANDS_TOTAL.clone()),
            Box::new(BUILDINGS_STARTED_TOTAL.clone()),
            Box::new(BUILDINGS_DESTROYED_TOTAL.clone()),
            Box::new(UNITS_RELEASED.clone()),
            Box::new(PLAYERS_ELIMINATED_TOTAL.clone()),
            Box::new(SNAPSHOTS_BROADCAST_TOTAL.clone()),
            Box::new(MALFORMED_MESSAGES_TOTAL.clone()),
            Box::new(GAME_TICK_DURATION_MS.clone()),
            Box::new(SNAPSHOT_BYTES.clone()),
        ];

        for c in collectors {
            if let Err(e) = REGISTRY.register(c) {
                tracing::error!("failed to register metric: {e}");
            }
        }
    });
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
