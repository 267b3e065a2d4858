//! Periodic diagnostic snapshots of the selector and the atlases.

use serde::Serialize;

use crate::compositor::{CompositorStats, ZoomSummary};
use crate::config::{LodStrategy, TelemetryConfig};
use crate::lod::{Band, SelectionStats, ZoomRange};

/// How many frames ended each way since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    pub frames: u64,
    pub recomputed: u64,
    pub debounced: u64,
    pub skipped: u64,
}

/// One zoom's figures in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoomTelemetry {
    /// Candidates in the most recent selection.
    pub candidates: usize,
    /// Whether the zoom is bound to a shader slot.
    pub active: bool,
    #[serde(flatten)]
    pub state: ZoomSummary,
}

/// Everything worth knowing about the atlas at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub time_seconds: f64,
    pub strategy: LodStrategy,
    pub zoom_range: Option<ZoomRange>,
    pub frames: FrameCounters,
    pub selection: Option<SelectionStats>,
    pub zooms: Vec<ZoomTelemetry>,
    pub compositor: CompositorStats,
    /// Band radii from the last bands pass.
    pub bands: Option<Vec<Band>>,
}

impl TelemetrySnapshot {
    /// Total candidates across zooms.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.zooms.iter().map(|z| z.candidates).sum()
    }
}

/// Frame counters plus the log rate limiter.
#[derive(Debug, Default)]
pub struct Telemetry {
    counters: FrameCounters,
    last_emit: Option<f64>,
}

impl Telemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    pub fn record_recomputed(&mut self) {
        self.counters.frames += 1;
        self.counters.recomputed += 1;
    }

    pub fn record_debounced(&mut self) {
        self.counters.frames += 1;
        self.counters.debounced += 1;
    }

    pub fn record_skipped(&mut self) {
        self.counters.frames += 1;
        self.counters.skipped += 1;
    }

    /// Whether a snapshot should be logged at `time`.
    #[must_use]
    pub fn is_due(&self, time: f64, config: &TelemetryConfig) -> bool {
        config.enabled
            && self
                .last_emit
                .is_none_or(|last| time - last >= config.log_interval_seconds)
    }

    /// Log `snapshot` and restart the interval.
    pub fn emit(&mut self, snapshot: &TelemetrySnapshot) {
        self.last_emit = Some(snapshot.time_seconds);

        let range = snapshot
            .zoom_range
            .map_or_else(|| "-".to_string(), |r| format!("{}..={}", r.min, r.max));
        let c = &snapshot.compositor;
        tracing::info!(
            "Atlas [{:?}] zooms {range}: {} candidates, frames {}/{}/{} (recomputed/debounced/skipped), loads {} issued {} done {} failed {} stale {} deferred",
            snapshot.strategy,
            snapshot.candidate_count(),
            snapshot.frames.recomputed,
            snapshot.frames.debounced,
            snapshot.frames.skipped,
            c.loads_issued,
            c.loads_completed,
            c.loads_failed,
            c.stale_completions,
            c.deferred_loads,
        );
        for zoom in &snapshot.zooms {
            let s = &zoom.state;
            tracing::info!(
                "  z{}{}: {} candidates, {} desired, {} resident, {} in flight, grid {}x{} @ {}px",
                s.zoom,
                if zoom.active { "*" } else { "" },
                zoom.candidates,
                s.desired,
                s.resident,
                s.in_flight,
                s.grid_size,
                s.grid_size,
                s.cell_px,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(time: f64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            time_seconds: time,
            strategy: LodStrategy::Trapezoid,
            zoom_range: Some(ZoomRange { min: 12, max: 15 }),
            frames: FrameCounters::default(),
            selection: None,
            zooms: vec![ZoomTelemetry {
                candidates: 7,
                active: true,
                state: ZoomSummary {
                    zoom: 15,
                    desired: 7,
                    resident: 3,
                    in_flight: 2,
                    pending: 2,
                    grid_size: 4,
                    cell_px: 256,
                    generation: 1,
                    has_target: true,
                },
            }],
            compositor: CompositorStats::default(),
            bands: None,
        }
    }

    #[test]
    fn test_disabled_never_due() {
        let telemetry = Telemetry::new();
        assert!(!telemetry.is_due(10.0, &TelemetryConfig::default()));
    }

    #[test]
    fn test_rate_limited_by_interval() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let config = TelemetryConfig {
            enabled: true,
            log_interval_seconds: 2.0,
        };
        let mut telemetry = Telemetry::new();
        assert!(telemetry.is_due(0.0, &config));
        telemetry.emit(&snapshot(0.0));
        assert!(!telemetry.is_due(1.9, &config));
        assert!(telemetry.is_due(2.0, &config));
    }

    #[test]
    fn test_counters() {
        let mut telemetry = Telemetry::new();
        telemetry.record_recomputed();
        telemetry.record_debounced();
        telemetry.record_debounced();
        telemetry.record_skipped();
        assert_eq!(
            telemetry.counters(),
            FrameCounters {
                frames: 4,
                recomputed: 1,
                debounced: 2,
                skipped: 1,
            }
        );
    }

    #[test]
    fn test_snapshot_serializes_flat_zoom_figures() {
        let value = serde_json::to_value(snapshot(1.0)).unwrap();
        assert_eq!(value["strategy"], "trapezoid");
        assert_eq!(value["zoom_range"]["max"], 15);
        let zoom = &value["zooms"][0];
        assert_eq!(zoom["zoom"], 15);
        assert_eq!(zoom["candidates"], 7);
        assert_eq!(zoom["in_flight"], 2);
        assert_eq!(zoom["active"], true);
    }
}
