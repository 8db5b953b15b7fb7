use rustc_hash::FxHashMap;

/// Tracks powered-on host intervals for the end-of-run report: the maximum
/// number of simultaneously powered-on hosts and the accumulated on-time.
#[derive(Debug, Default)]
pub struct PowerOnRecord {
    on_since: FxHashMap<u32, f64>,
    max_power_on_num: u32,
    closed_on_time: f64,
}

impl PowerOnRecord {
    pub fn host_on(&mut self, host_id: u32, now: f64) {
        self.on_since.insert(host_id, now);
        self.max_power_on_num = self.max_power_on_num.max(self.on_since.len() as u32);
    }

    pub fn host_off(&mut self, host_id: u32, now: f64) {
        if let Some(since) = self.on_since.remove(&host_id) {
            self.closed_on_time += now - since;
        }
    }

    pub fn max_power_on_num(&self) -> u32 {
        self.max_power_on_num
    }

    /// Total on-time including still-open intervals, up to `now`.
    pub fn total_on_time(&self, now: f64) -> f64 {
        self.closed_on_time + self.on_since.values().map(|since| now - since).sum::<f64>()
    }
}
