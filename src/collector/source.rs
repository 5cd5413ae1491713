use log::debug;
use sysinfo::{Pid, System};

/// Memory statistics of the agent's own runtime
///
/// Field names follow the gauge names reported upstream. Fields without a
/// native counterpart in the running process stay at zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeStats {
    pub alloc: u64,
    pub buck_hash_sys: u64,
    pub frees: u64,
    pub gc_cpu_fraction: f64,
    pub gc_sys: u64,
    pub heap_alloc: u64,
    pub heap_idle: u64,
    pub heap_inuse: u64,
    pub heap_objects: u64,
    pub heap_released: u64,
    pub heap_sys: u64,
    pub last_gc: u64,
    pub lookups: u64,
    pub mcache_inuse: u64,
    pub mcache_sys: u64,
    pub mspan_inuse: u64,
    pub mspan_sys: u64,
    pub mallocs: u64,
    pub next_gc: u64,
    pub num_forced_gc: u64,
    pub num_gc: u64,
    pub other_sys: u64,
    pub pause_total_ns: u64,
    pub stack_inuse: u64,
    pub stack_sys: u64,
    pub sys: u64,
    pub total_alloc: u64,
}

impl RuntimeStats {
    /// Gauge name and value for every field
    pub fn gauges(&self) -> [(&'static str, f64); 27] {
        [
            ("Alloc", self.alloc as f64),
            ("BuckHashSys", self.buck_hash_sys as f64),
            ("Frees", self.frees as f64),
            ("GCCPUFraction", self.gc_cpu_fraction),
            ("GCSys", self.gc_sys as f64),
            ("HeapAlloc", self.heap_alloc as f64),
            ("HeapIdle", self.heap_idle as f64),
            ("HeapInuse", self.heap_inuse as f64),
            ("HeapObjects", self.heap_objects as f64),
            ("HeapReleased", self.heap_released as f64),
            ("HeapSys", self.heap_sys as f64),
            ("LastGC", self.last_gc as f64),
            ("Lookups", self.lookups as f64),
            ("MCacheInuse", self.mcache_inuse as f64),
            ("MCacheSys", self.mcache_sys as f64),
            ("MSpanInuse", self.mspan_inuse as f64),
            ("MSpanSys", self.mspan_sys as f64),
            ("Mallocs", self.mallocs as f64),
            ("NextGC", self.next_gc as f64),
            ("NumForcedGC", self.num_forced_gc as f64),
            ("NumGC", self.num_gc as f64),
            ("OtherSys", self.other_sys as f64),
            ("PauseTotalNs", self.pause_total_ns as f64),
            ("StackInuse", self.stack_inuse as f64),
            ("StackSys", self.stack_sys as f64),
            ("Sys", self.sys as f64),
            ("TotalAlloc", self.total_alloc as f64),
        ]
    }
}

/// Host-wide memory totals and per-core CPU utilization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostStats {
    pub total_memory: u64,
    pub free_memory: u64,
    /// Percent busy per core, in core order
    pub cpu_utilization: Vec<f64>,
}

impl HostStats {
    pub fn gauges(&self) -> Vec<(String, f64)> {
        let mut gauges = Vec::with_capacity(self.cpu_utilization.len() + 2);
        gauges.push(("TotalMemory".to_string(), self.total_memory as f64));
        gauges.push(("FreeMemory".to_string(), self.free_memory as f64));
        for (i, percent) in self.cpu_utilization.iter().enumerate() {
            gauges.push((format!("CPUutilization{}", i + 1), *percent));
        }
        gauges
    }
}

/// Provider of the raw statistics the poller samples
pub trait StatsSource: Send + 'static {
    fn runtime_stats(&mut self) -> RuntimeStats;

    /// `None` when the host could not be sampled
    fn host_stats(&mut self) -> Option<HostStats>;
}

/// Stats source backed by `sysinfo`
pub struct SysinfoSource {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| debug!("Cannot determine own pid: {}", e))
            .ok();

        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for SysinfoSource {
    fn runtime_stats(&mut self) -> RuntimeStats {
        let mut stats = RuntimeStats::default();

        let Some(pid) = self.pid else {
            return stats;
        };
        if !self.system.refresh_process(pid) {
            return stats;
        }

        if let Some(process) = self.system.process(pid) {
            let resident = process.memory();
            let virtual_size = process.virtual_memory();
            let io = process.disk_usage();

            stats.alloc = resident;
            stats.heap_alloc = resident;
            stats.heap_inuse = resident;
            stats.sys = virtual_size;
            stats.heap_sys = virtual_size;
            stats.heap_idle = virtual_size.saturating_sub(resident);
            stats.total_alloc = io.total_written_bytes;
            stats.gc_cpu_fraction = f64::from(process.cpu_usage()) / 100.0;
        }

        stats
    }

    fn host_stats(&mut self) -> Option<HostStats> {
        self.system.refresh_memory();
        self.system.refresh_cpu();

        let total_memory = self.system.total_memory();
        if total_memory == 0 {
            return None;
        }

        Some(HostStats {
            total_memory,
            free_memory: self.system.free_memory(),
            cpu_utilization: self
                .system
                .cpus()
                .iter()
                .map(|cpu| f64::from(cpu.cpu_usage()))
                .collect(),
        })
    }
}
