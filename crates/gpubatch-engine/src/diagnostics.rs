//! Timestamp-based per-operation profiling.

use std::fmt::Write as _;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use gpubatch_core::QueryPoolConfig;

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{EngineError, Result};
use crate::utils::UVec3;

/// One profiled operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderDuration {
    pub label: String,
    pub global: UVec3,
    pub local: UVec3,
    pub start_query: u32,
    pub end_query: Option<u32>,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl ShaderDuration {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

struct QueryState {
    entries: Vec<ShaderDuration>,
    in_use: u32,
}

pub struct QueryPool {
    device: Arc<dyn Device>,
    pool: vk::QueryPool,
    config: QueryPoolConfig,
    state: Mutex<QueryState>,
}

impl QueryPool {
    pub fn new(device: Arc<dyn Device>, config: QueryPoolConfig) -> Result<Self> {
        let pool = device.create_query_pool(config.max_query_count)?;
        Ok(Self {
            device,
            pool,
            state: Mutex::new(QueryState {
                entries: Vec::with_capacity(config.initial_reserve_size as usize),
                in_use: 0,
            }),
            config,
        })
    }

    /// Record a reset of every query and forget collected entries.
    pub fn reset(&self, cmd: &mut CommandBuffer) {
        cmd.reset_query_pool(self.pool, self.config.max_query_count);
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_use = 0;
    }

    /// Open a bracket around an operation; returns the entry index to pass
    /// to [`shader_profile_end`](Self::shader_profile_end).
    pub fn shader_profile_begin(
        &self,
        cmd: &mut CommandBuffer,
        label: &str,
        global: UVec3,
        local: UVec3,
    ) -> Result<usize> {
        let mut state = self.state.lock();
        if state.in_use + 2 > self.config.max_query_count {
            return Err(EngineError::allocation(
                "timestamp query",
                vk::Result::ERROR_TOO_MANY_OBJECTS,
            ));
        }
        let query = state.in_use;
        cmd.write_timestamp(self.pool, query);
        state.in_use += 1;
        state.entries.push(ShaderDuration {
            label: label.to_string(),
            global,
            local,
            start_query: query,
            end_query: None,
            start_ns: 0,
            end_ns: 0,
        });
        Ok(state.entries.len() - 1)
    }

    pub fn shader_profile_end(&self, cmd: &mut CommandBuffer, log_idx: usize) {
        let mut state = self.state.lock();
        let query = state.in_use;
        let Some(entry) = state.entries.get_mut(log_idx) else {
            debug_assert!(false, "profile end for unknown entry {log_idx}");
            return;
        };
        debug_assert!(entry.end_query.is_none(), "profile bracket closed twice");
        entry.end_query = Some(query);
        cmd.write_timestamp(self.pool, query);
        state.in_use += 1;
    }

    /// Read back timestamps for every closed bracket. The submissions that
    /// wrote them must have completed.
    pub fn extract_results(&self) -> Result<Vec<ShaderDuration>> {
        let mut state = self.state.lock();
        if state.in_use == 0 {
            return Ok(Vec::new());
        }
        let mut ticks = vec![0u64; state.in_use as usize];
        self.device.query_timestamps(self.pool, 0, &mut ticks)?;
        let period = f64::from(self.device.timestamp_period());
        let to_ns = |tick: u64| (tick as f64 * period) as u64;

        for entry in state.entries.iter_mut() {
            if let Some(end) = entry.end_query {
                entry.start_ns = to_ns(ticks[entry.start_query as usize]);
                entry.end_ns = to_ns(ticks[end as usize]);
            }
        }
        Ok(state
            .entries
            .iter()
            .filter(|e| e.end_query.is_some())
            .cloned()
            .collect())
    }

    /// Human readable table of the last extracted results.
    pub fn generate_report(&self) -> Result<String> {
        let results = self.extract_results()?;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<40} {:>18} {:>14} {:>12}",
            "Kernel Name", "Global WG", "Local WG", "Duration(ns)"
        );
        let _ = writeln!(out, "{}", "=".repeat(87));
        for entry in &results {
            let _ = writeln!(
                out,
                "{:<40} {:>18} {:>14} {:>12}",
                entry.label,
                format!("{{{},{},{}}}", entry.global[0], entry.global[1], entry.global[2]),
                format!("{{{},{},{}}}", entry.local[0], entry.local[1], entry.local[2]),
                entry.duration_ns()
            );
        }
        Ok(out)
    }

    pub fn queries_in_use(&self) -> u32 {
        self.state.lock().in_use
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        self.device.destroy_query_pool(self.pool);
    }
}
