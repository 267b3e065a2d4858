//! Gate that decides whether the selector runs this frame.
//!
//! Small camera motions are absorbed until they accumulate past a threshold
//! or a refresh interval elapses. A separate minimum interval throttles
//! recomputation regardless of why it was requested.

use glam::{DVec2, DVec3};

use crate::camera::CameraPose;
use crate::config::DebounceConfig;

/// Why the gate let a recomputation through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeReason {
    FirstFrame,
    ConfigChanged,
    Moved,
    IntervalElapsed,
}

/// Outcome of [`DebounceGate::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Recompute(RecomputeReason),
    /// Motion is below every threshold.
    Hold,
    /// A recomputation is due but the throttle forbids it for now.
    Throttled,
}

#[derive(Debug, Clone, Copy)]
struct Committed {
    position: DVec3,
    forward: DVec3,
    time: f64,
}

/// Camera motion debounce plus minimum-interval throttle.
#[derive(Debug, Default)]
pub struct DebounceGate {
    last: Option<Committed>,
}

impl DebounceGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether to recompute for `pose` at `time`.
    ///
    /// Does not record anything; call [`DebounceGate::commit`] after an
    /// actual recomputation.
    #[must_use]
    pub fn check(
        &self,
        pose: &CameraPose,
        time: f64,
        config_changed: bool,
        thresholds: &DebounceConfig,
    ) -> GateDecision {
        let Some(last) = self.last else {
            return GateDecision::Recompute(RecomputeReason::FirstFrame);
        };

        let reason = if config_changed {
            Some(RecomputeReason::ConfigChanged)
        } else if moved_significantly(&last, pose, thresholds) {
            Some(RecomputeReason::Moved)
        } else if time - last.time >= thresholds.interval_seconds
            && (pose.position != last.position || pose.forward != last.forward)
        {
            Some(RecomputeReason::IntervalElapsed)
        } else {
            None
        };

        match reason {
            None => GateDecision::Hold,
            Some(_) if time - last.time < thresholds.min_interval_seconds => {
                GateDecision::Throttled
            }
            Some(reason) => GateDecision::Recompute(reason),
        }
    }

    /// Record the pose a recomputation was made for.
    pub fn commit(&mut self, pose: &CameraPose, time: f64) {
        self.last = Some(Committed {
            position: pose.position,
            forward: pose.forward,
            time,
        });
    }

    /// Forget the last recomputation so the next check always passes.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

fn moved_significantly(last: &Committed, pose: &CameraPose, thresholds: &DebounceConfig) -> bool {
    let delta = pose.position - last.position;
    if DVec2::new(delta.x, delta.z).length() > thresholds.move_meters {
        return true;
    }
    if delta.y.abs() > thresholds.height_meters {
        return true;
    }
    let (a, b) = (last.forward.normalize_or_zero(), pose.forward.normalize_or_zero());
    if a == DVec3::ZERO || b == DVec3::ZERO {
        return false;
    }
    a.angle_between(b).to_degrees() > thresholds.angle_degrees
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(position: DVec3) -> CameraPose {
        CameraPose {
            position,
            forward: DVec3::new(0.0, -1.0, -1.0),
            up: DVec3::Y,
        }
    }

    fn committed_gate(at: DVec3) -> DebounceGate {
        let mut gate = DebounceGate::new();
        gate.commit(&pose(at), 0.0);
        gate
    }

    #[test]
    fn test_first_frame_recomputes() {
        let gate = DebounceGate::new();
        assert_eq!(
            gate.check(&pose(DVec3::ZERO), 0.0, false, &DebounceConfig::default()),
            GateDecision::Recompute(RecomputeReason::FirstFrame)
        );
    }

    #[test]
    fn test_small_move_held_until_interval() {
        let config = DebounceConfig::default();
        let gate = committed_gate(DVec3::new(0.0, 1000.0, 0.0));
        let moved = pose(DVec3::new(10.0, 1000.0, 0.0));
        assert_eq!(gate.check(&moved, 0.2, false, &config), GateDecision::Hold);
        assert_eq!(
            gate.check(&moved, 0.6, false, &config),
            GateDecision::Recompute(RecomputeReason::IntervalElapsed)
        );
    }

    #[test]
    fn test_large_move_recomputes() {
        let config = DebounceConfig::default();
        let gate = committed_gate(DVec3::new(0.0, 1000.0, 0.0));
        let moved = pose(DVec3::new(20.0, 1000.0, 0.0));
        assert_eq!(
            gate.check(&moved, 0.2, false, &config),
            GateDecision::Recompute(RecomputeReason::Moved)
        );
    }

    #[test]
    fn test_height_and_angle_thresholds() {
        let config = DebounceConfig::default();
        let gate = committed_gate(DVec3::new(0.0, 1000.0, 0.0));
        let climbed = pose(DVec3::new(0.0, 1025.0, 0.0));
        assert_eq!(
            gate.check(&climbed, 0.2, false, &config),
            GateDecision::Recompute(RecomputeReason::Moved)
        );

        let mut turned = pose(DVec3::new(0.0, 1000.0, 0.0));
        turned.forward = DVec3::new(0.1, -1.0, -1.0);
        assert_eq!(
            gate.check(&turned, 0.2, false, &config),
            GateDecision::Recompute(RecomputeReason::Moved)
        );
    }

    #[test]
    fn test_stationary_camera_holds() {
        let config = DebounceConfig::default();
        let at = DVec3::new(0.0, 1000.0, 0.0);
        let gate = committed_gate(at);
        assert_eq!(gate.check(&pose(at), 10.0, false, &config), GateDecision::Hold);
    }

    #[test]
    fn test_config_change_is_throttled() {
        let config = DebounceConfig::default();
        let at = DVec3::new(0.0, 1000.0, 0.0);
        let gate = committed_gate(at);
        assert_eq!(gate.check(&pose(at), 0.01, true, &config), GateDecision::Throttled);
        assert_eq!(
            gate.check(&pose(at), 0.1, true, &config),
            GateDecision::Recompute(RecomputeReason::ConfigChanged)
        );
    }

    #[test]
    fn test_reset() {
        let config = DebounceConfig::default();
        let at = DVec3::new(0.0, 1000.0, 0.0);
        let mut gate = committed_gate(at);
        gate.reset();
        assert_eq!(
            gate.check(&pose(at), 0.0, false, &config),
            GateDecision::Recompute(RecomputeReason::FirstFrame)
        );
    }
}
