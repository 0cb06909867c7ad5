//! Generational garbage collector overlaid on the reference-counted heap
//! (spec §4.2 "Generational GC"). Reference counting reclaims everything
//! acyclic on its own; [`collector::GenerationalCollector`] exists only to
//! find and free the cycles that leaves behind, and [`policy::GcPolicyEngine`]
//! decides *when* it should run. [`roots::RootSet`] holds the extra roots
//! native code pins beyond the call stack and globals.

mod collector;
mod policy;
mod roots;

pub use collector::{GcStats, GenerationalCollector};
pub use policy::{AllocationSite, GcDecision, GcKind, GcPolicyEngine, MemoryUsage, PolicyThresholds, Reason, Urgency};
pub use roots::RootSet;
