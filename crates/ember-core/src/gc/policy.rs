//! GC trigger policy: when to collect and how hard (spec §4.2 "GC policy
//! engine"). Deliberately separate from [`crate::gc::collector`] — this
//! type only ever *decides*, never traces or sweeps.

use std::time::Duration;

/// A point-in-time snapshot of heap occupancy the collector reports after
/// every allocation batch (or on-demand before a policy decision).
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUsage {
    pub nursery_bytes: usize,
    pub nursery_capacity: usize,
    pub old_bytes: usize,
    pub old_capacity: usize,
    pub total_bytes: usize,
    pub total_capacity: usize,
    pub fragmentation: f64,
}

impl MemoryUsage {
    fn ratio(used: usize, capacity: usize) -> f64 {
        if capacity == 0 {
            0.0
        } else {
            used as f64 / capacity as f64
        }
    }

    pub fn nursery_ratio(&self) -> f64 {
        Self::ratio(self.nursery_bytes, self.nursery_capacity)
    }

    pub fn old_ratio(&self) -> f64 {
        Self::ratio(self.old_bytes, self.old_capacity)
    }

    pub fn total_ratio(&self) -> f64 {
        Self::ratio(self.total_bytes, self.total_capacity)
    }
}

/// What kind of pass the policy wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    Minor,
    Major,
    Full,
    Incremental,
    Concurrent,
}

/// How soon the caller should honor the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Low,
    Normal,
    High,
    Immediate,
}

/// The human-auditable reason a decision fired, matching the rule it came
/// from (spec §4.2's seven-rule decision order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    CriticalPressure,
    PromotionFailures,
    NurseryFull,
    OldFull,
    TotalFull,
    AllocationRateHigh,
    Fragmented,
}

#[derive(Debug, Clone, Copy)]
pub struct GcDecision {
    pub kind: GcKind,
    pub reason: Reason,
    pub urgency: Urgency,
}

/// Which generation a failed allocation was attempting to land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSite {
    Nursery,
    Survivor,
    Old,
    Large,
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyThresholds {
    pub nursery_threshold: f64,
    pub old_threshold: f64,
    pub full_threshold: f64,
    pub fragmentation_threshold: f64,
    pub high_allocation_rate_bytes_per_sec: f64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            nursery_threshold: 0.8,
            old_threshold: 0.7,
            full_threshold: 0.9,
            fragmentation_threshold: 0.3,
            high_allocation_rate_bytes_per_sec: 10.0 * 1024.0 * 1024.0,
        }
    }
}

const MIN_THRESHOLD: f64 = 0.5;
const MAX_THRESHOLD: f64 = 0.95;
const MAX_GC_OVERHEAD: f64 = 0.15;
const TARGET_GC_OVERHEAD: f64 = 0.05;
const OVERHEAD_ADJUSTMENT_STEP: f64 = 0.05;
const DEFAULT_ADAPTIVE_PERIOD: u32 = 10;
const DEFAULT_PROMOTION_AGE: u8 = 3;

/// Decides when and how aggressively to collect, given a [`MemoryUsage`]
/// snapshot and recent allocation-rate/overhead history. Consumes no
/// knowledge of the heap's internal layout; `crate::gc::collector` drives
/// the decisions this emits.
pub struct GcPolicyEngine {
    thresholds: PolicyThresholds,
    adaptive_period: u32,
    promotion_age: u8,
    consecutive_promotion_failures: u32,
    consecutive_minor_escalations: u32,
    collections_since_tuning: u32,
    time_in_gc: Duration,
    time_total: Duration,
    last_allocation_rate: f64,
}

impl GcPolicyEngine {
    pub fn new() -> Self {
        Self {
            thresholds: PolicyThresholds::default(),
            adaptive_period: DEFAULT_ADAPTIVE_PERIOD,
            promotion_age: DEFAULT_PROMOTION_AGE,
            consecutive_promotion_failures: 0,
            consecutive_minor_escalations: 0,
            collections_since_tuning: 0,
            time_in_gc: Duration::ZERO,
            time_total: Duration::ZERO,
            last_allocation_rate: 0.0,
        }
    }

    pub fn promotion_age(&self) -> u8 {
        self.promotion_age
    }

    pub fn record_promotion_failure(&mut self) {
        self.consecutive_promotion_failures += 1;
    }

    pub fn record_promotion_success(&mut self) {
        self.consecutive_promotion_failures = 0;
    }

    pub fn record_allocation_rate(&mut self, bytes_per_sec: f64) {
        self.last_allocation_rate = bytes_per_sec;
    }

    /// Decide what, if anything, to collect, given the current heap
    /// occupancy. First match in the spec's seven-rule order wins.
    pub fn decide(&mut self, usage: &MemoryUsage) -> Option<GcDecision> {
        let t = self.thresholds;

        if usage.total_ratio() >= 1.0 {
            return Some(GcDecision { kind: GcKind::Full, reason: Reason::CriticalPressure, urgency: Urgency::Immediate });
        }
        if self.consecutive_promotion_failures >= 3 {
            return Some(GcDecision { kind: GcKind::Major, reason: Reason::PromotionFailures, urgency: Urgency::High });
        }
        if usage.nursery_ratio() >= t.nursery_threshold {
            return Some(GcDecision { kind: GcKind::Minor, reason: Reason::NurseryFull, urgency: Urgency::Normal });
        }
        if usage.old_ratio() >= t.old_threshold {
            return Some(GcDecision { kind: GcKind::Major, reason: Reason::OldFull, urgency: Urgency::High });
        }
        if usage.total_ratio() >= t.full_threshold {
            return Some(GcDecision { kind: GcKind::Full, reason: Reason::TotalFull, urgency: Urgency::High });
        }
        if self.last_allocation_rate >= t.high_allocation_rate_bytes_per_sec {
            self.consecutive_minor_escalations += 1;
            let kind = if self.consecutive_minor_escalations > 5 { GcKind::Major } else { GcKind::Minor };
            return Some(GcDecision { kind, reason: Reason::AllocationRateHigh, urgency: Urgency::Normal });
        }
        self.consecutive_minor_escalations = 0;
        if usage.fragmentation >= t.fragmentation_threshold {
            return Some(GcDecision { kind: GcKind::Full, reason: Reason::Fragmented, urgency: Urgency::Low });
        }
        None
    }

    /// What to do right now when an allocation into `site` failed even
    /// after any collection already attempted this turn.
    pub fn on_allocation_failure(&self, site: AllocationSite) -> GcDecision {
        let (kind, reason) = match site {
            AllocationSite::Nursery | AllocationSite::Survivor => (GcKind::Minor, Reason::NurseryFull),
            AllocationSite::Old => (GcKind::Major, Reason::OldFull),
            AllocationSite::Large => (GcKind::Full, Reason::TotalFull),
        };
        GcDecision { kind, reason, urgency: Urgency::Immediate }
    }

    /// Record wall-clock spent collecting versus total elapsed time, and
    /// every `adaptive_period` collections, relax or tighten thresholds to
    /// keep GC overhead near `TARGET_GC_OVERHEAD`.
    pub fn record_collection_time(&mut self, gc_time: Duration, total_time: Duration) {
        self.time_in_gc += gc_time;
        self.time_total += total_time;
        self.collections_since_tuning += 1;
        if self.collections_since_tuning >= self.adaptive_period {
            self.tune();
            self.collections_since_tuning = 0;
            self.time_in_gc = Duration::ZERO;
            self.time_total = Duration::ZERO;
        }
    }

    fn overhead(&self) -> f64 {
        if self.time_total.is_zero() {
            0.0
        } else {
            self.time_in_gc.as_secs_f64() / self.time_total.as_secs_f64()
        }
    }

    fn tune(&mut self) {
        let overhead = self.overhead();
        if overhead > MAX_GC_OVERHEAD {
            self.relax_thresholds();
        } else if overhead < TARGET_GC_OVERHEAD / 2.0 {
            self.tighten_thresholds();
        }
    }

    fn relax_thresholds(&mut self) {
        let t = &mut self.thresholds;
        t.nursery_threshold = (t.nursery_threshold + OVERHEAD_ADJUSTMENT_STEP).min(MAX_THRESHOLD);
        t.old_threshold = (t.old_threshold + OVERHEAD_ADJUSTMENT_STEP).min(MAX_THRESHOLD);
        t.full_threshold = (t.full_threshold + OVERHEAD_ADJUSTMENT_STEP).min(MAX_THRESHOLD);
    }

    fn tighten_thresholds(&mut self) {
        let t = &mut self.thresholds;
        t.nursery_threshold = (t.nursery_threshold - OVERHEAD_ADJUSTMENT_STEP).max(MIN_THRESHOLD);
        t.old_threshold = (t.old_threshold - OVERHEAD_ADJUSTMENT_STEP).max(MIN_THRESHOLD);
        t.full_threshold = (t.full_threshold - OVERHEAD_ADJUSTMENT_STEP).max(MIN_THRESHOLD);
    }

    pub fn thresholds(&self) -> PolicyThresholds {
        self.thresholds
    }
}

impl Default for GcPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_pressure_wins_over_everything_else() {
        let mut engine = GcPolicyEngine::new();
        let usage = MemoryUsage { total_bytes: 100, total_capacity: 100, ..Default::default() };
        let decision = engine.decide(&usage).unwrap();
        assert_eq!(decision.reason, Reason::CriticalPressure);
        assert_eq!(decision.urgency, Urgency::Immediate);
    }

    #[test]
    fn three_promotion_failures_trigger_major() {
        let mut engine = GcPolicyEngine::new();
        engine.record_promotion_failure();
        engine.record_promotion_failure();
        engine.record_promotion_failure();
        let usage = MemoryUsage::default();
        let decision = engine.decide(&usage).unwrap();
        assert_eq!(decision.reason, Reason::PromotionFailures);
        assert_eq!(decision.kind, GcKind::Major);
    }

    #[test]
    fn nursery_ratio_triggers_minor() {
        let mut engine = GcPolicyEngine::new();
        let usage = MemoryUsage { nursery_bytes: 85, nursery_capacity: 100, ..Default::default() };
        let decision = engine.decide(&usage).unwrap();
        assert_eq!(decision.kind, GcKind::Minor);
        assert_eq!(decision.reason, Reason::NurseryFull);
    }

    #[test]
    fn allocation_rate_escalates_to_major_after_five_minors() {
        let mut engine = GcPolicyEngine::new();
        engine.record_allocation_rate(20.0 * 1024.0 * 1024.0);
        let usage = MemoryUsage::default();
        for _ in 0..5 {
            let d = engine.decide(&usage).unwrap();
            assert_eq!(d.kind, GcKind::Minor);
        }
        let d = engine.decide(&usage).unwrap();
        assert_eq!(d.kind, GcKind::Major);
    }

    #[test]
    fn no_pressure_means_no_decision() {
        let mut engine = GcPolicyEngine::new();
        let usage = MemoryUsage::default();
        assert!(engine.decide(&usage).is_none());
    }

    #[test]
    fn allocation_failure_sizes_to_the_failing_generation() {
        let engine = GcPolicyEngine::new();
        assert_eq!(engine.on_allocation_failure(AllocationSite::Old).kind, GcKind::Major);
        assert_eq!(engine.on_allocation_failure(AllocationSite::Nursery).kind, GcKind::Minor);
        assert_eq!(engine.on_allocation_failure(AllocationSite::Large).kind, GcKind::Full);
    }
}
