//! Embedder-facing configuration: resource ceilings, GC thresholds, and
//! HTTP server settings, loadable from TOML (spec ambient stack: `serde` +
//! `toml`, per the teacher's workspace dependency table).

use std::time::Duration;

use ember_core::memory::MemoryLimits;
use ember_core::scheduler::SchedulerLimits;
use ember_core::vm::ResourceLimits;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeResult;

/// Flat, TOML-serializable mirror of the resource limits scattered across
/// `ember_core`'s `ResourceLimits`/`MemoryLimits`/`SchedulerLimits`. Kept as
/// its own type rather than deriving `Serialize`/`Deserialize` directly on
/// those (they live in the VM's hot path and gain nothing from a serde
/// dependency); [`RuntimeOptions::resource_limits`] etc. project this flat
/// form back onto them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Maximum call-frame depth before the evaluator reports a stack
    /// overflow (spec §7).
    pub max_call_depth: usize,
    /// Soft ceiling on live heap bytes before the GC policy engine starts
    /// escalating collection strategy (spec §4.2).
    pub max_memory_bytes: usize,
    /// Nursery (young generation) capacity, in objects, before a minor
    /// collection is considered.
    pub nursery_capacity: usize,
    /// Old-generation capacity, in objects, before a major collection is
    /// considered.
    pub old_capacity: usize,
    /// Upper bound on simultaneously live cooperative tasks.
    pub max_tasks: usize,
    /// OS threads available to the embedder's own task pool (not the
    /// scheduler, which gives every task its own thread); `0` means
    /// "use `num_cpus::get()`".
    pub threads: usize,
    /// Address the HTTP server binds, e.g. `"127.0.0.1:8080"`.
    pub http_bind: String,
    /// Per-request deadline, in milliseconds (spec §5 "Timeouts").
    pub request_timeout_ms: u64,
    /// Idle keep-alive deadline, in milliseconds (spec §5 "Timeouts").
    pub keep_alive_timeout_ms: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        let memory = MemoryLimits::default();
        let scheduler = SchedulerLimits::default();
        Self {
            max_call_depth: limits.max_call_depth,
            max_memory_bytes: limits.max_memory_bytes,
            nursery_capacity: memory.nursery_capacity,
            old_capacity: memory.old_capacity,
            max_tasks: scheduler.max_tasks,
            threads: 0,
            http_bind: "127.0.0.1:8080".to_string(),
            request_timeout_ms: 30_000,
            keep_alive_timeout_ms: 5_000,
        }
    }
}

impl RuntimeOptions {
    /// Parse options from TOML text, falling back to defaults for any
    /// field the source omits (`#[serde(default)]` on the struct).
    pub fn from_toml(text: &str) -> RuntimeResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse options from a TOML file on disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> RuntimeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// The resolved worker count: `threads` if set, otherwise the number of
    /// logical CPUs.
    pub fn thread_count(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Project onto `ember_core`'s evaluator resource ceilings.
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_call_depth: self.max_call_depth,
            max_memory_bytes: self.max_memory_bytes,
        }
    }

    /// Project onto `ember_core`'s memory-manager capacities.
    pub fn memory_limits(&self) -> MemoryLimits {
        MemoryLimits {
            nursery_capacity: self.nursery_capacity,
            old_capacity: self.old_capacity,
        }
    }

    /// Project onto `ember_core`'s scheduler limits.
    pub fn scheduler_limits(&self) -> SchedulerLimits {
        SchedulerLimits { max_tasks: self.max_tasks }
    }

    /// Per-connection HTTP timeouts, as `Duration`s.
    pub fn server_limits(&self) -> ember_http::ServerLimits {
        ember_http::ServerLimits {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            keep_alive_timeout: Duration::from_millis(self.keep_alive_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_ember_core_defaults() {
        let options = RuntimeOptions::default();
        assert_eq!(options.max_call_depth, ResourceLimits::default().max_call_depth);
        assert_eq!(options.http_bind, "127.0.0.1:8080");
    }

    #[test]
    fn partial_toml_fills_remaining_fields_from_default() {
        let options = RuntimeOptions::from_toml("max_call_depth = 128\n").unwrap();
        assert_eq!(options.max_call_depth, 128);
        assert_eq!(options.max_tasks, SchedulerLimits::default().max_tasks);
    }

    #[test]
    fn zero_threads_resolves_to_cpu_count() {
        let options = RuntimeOptions::default();
        assert_eq!(options.thread_count(), num_cpus::get());
    }
}
