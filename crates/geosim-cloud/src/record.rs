//! Lifecycle recording sinks.

use std::fs::File;
use std::io;
use std::path::Path;

use log::warn;

use geosim_core::Id;

use crate::request::{AllocatedEdge, Instance, InstanceGroup, UserRequest};

/// Receives lifecycle milestones for persistence. All methods default to
/// no-ops so sinks override only what they store.
pub trait Recorder {
    fn user_request_submitted(&mut self, _request: &UserRequest) {}
    fn user_request_finished(&mut self, _request: &UserRequest) {}
    fn instance_group_finished(&mut self, _group: &InstanceGroup) {}
    fn instance_created(&mut self, _instance: &Instance, _dc: Id) {}
    fn instance_finished(&mut self, _instance: &Instance, _dc: Id) {}
    fn bw_allocated(&mut self, _edge: &AllocatedEdge, _time: f64) {}
    fn bw_released(&mut self, _edge: &AllocatedEdge, _time: f64) {}
    fn datacenter_summary(&mut self, _name: &str, _conflicts: u64, _max_hosts_on: u32, _on_time: f64) {}
    fn simulation_summary(&mut self, _finish_time: f64, _network_tco: f64) {}
    fn flush(&mut self) {}
}

////////////////////////////////////////////////////////////////////////////////

/// Discards everything.
pub struct NullRecorder;

impl Recorder for NullRecorder {}

////////////////////////////////////////////////////////////////////////////////

/// Appends one CSV row per milestone. Write errors are logged and swallowed;
/// recording must never stop a run.
pub struct CsvRecorder {
    writer: csv::Writer<File>,
    failed: bool,
}

impl CsvRecorder {
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(["kind", "time", "id", "state", "detail1", "detail2"])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Self { writer, failed: false })
    }

    fn write(&mut self, row: [String; 6]) {
        if self.failed {
            return;
        }
        if let Err(e) = self.writer.write_record(&row) {
            warn!("csv recorder write failed, recording disabled: {}", e);
            self.failed = true;
        }
    }
}

impl Recorder for CsvRecorder {
    fn user_request_submitted(&mut self, request: &UserRequest) {
        self.write([
            "user_request_submitted".into(),
            request.submit_time.to_string(),
            request.id.to_string(),
            format!("{:?}", request.state),
            request.area.clone(),
            request.group_ids.len().to_string(),
        ]);
    }

    fn user_request_finished(&mut self, request: &UserRequest) {
        self.write([
            "user_request_finished".into(),
            request.finish_time.unwrap_or(-1.).to_string(),
            request.id.to_string(),
            format!("{:?}", request.state),
            request.fail_reasons.join(";"),
            String::new(),
        ]);
    }

    fn instance_group_finished(&mut self, group: &InstanceGroup) {
        self.write([
            "instance_group_finished".into(),
            group.finish_time.unwrap_or(-1.).to_string(),
            group.id.to_string(),
            format!("{:?}", group.state),
            group.receive_datacenter.map_or(String::new(), |dc| dc.to_string()),
            group.retry_num.to_string(),
        ]);
    }

    fn instance_created(&mut self, instance: &Instance, dc: Id) {
        self.write([
            "instance_created".into(),
            instance.start_time.unwrap_or(-1.).to_string(),
            instance.id.to_string(),
            format!("{:?}", instance.state),
            dc.to_string(),
            instance.host_id.map_or(String::new(), |h| h.to_string()),
        ]);
    }

    fn instance_finished(&mut self, instance: &Instance, dc: Id) {
        self.write([
            "instance_finished".into(),
            instance.finish_time.unwrap_or(-1.).to_string(),
            instance.id.to_string(),
            format!("{:?}", instance.state),
            dc.to_string(),
            String::new(),
        ]);
    }

    fn bw_allocated(&mut self, edge: &AllocatedEdge, time: f64) {
        self.write([
            "bw_allocated".into(),
            time.to_string(),
            format!("{}-{}", edge.src_group, edge.dst_group),
            edge.bw.to_string(),
            edge.src_dc.to_string(),
            edge.dst_dc.to_string(),
        ]);
    }

    fn bw_released(&mut self, edge: &AllocatedEdge, time: f64) {
        self.write([
            "bw_released".into(),
            time.to_string(),
            format!("{}-{}", edge.src_group, edge.dst_group),
            edge.bw.to_string(),
            edge.src_dc.to_string(),
            edge.dst_dc.to_string(),
        ]);
    }

    fn datacenter_summary(&mut self, name: &str, conflicts: u64, max_hosts_on: u32, on_time: f64) {
        self.write([
            "datacenter_summary".into(),
            String::new(),
            name.into(),
            conflicts.to_string(),
            max_hosts_on.to_string(),
            on_time.to_string(),
        ]);
    }

    fn simulation_summary(&mut self, finish_time: f64, network_tco: f64) {
        self.write([
            "simulation_summary".into(),
            finish_time.to_string(),
            String::new(),
            String::new(),
            network_tco.to_string(),
            String::new(),
        ]);
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("csv recorder flush failed: {}", e);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Keeps milestone kinds in memory, for assertions in tests.
#[derive(Default)]
pub struct MemoryRecorder {
    pub events: Vec<(String, f64)>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|(k, _)| k == kind).count()
    }
}

impl Recorder for MemoryRecorder {
    fn user_request_submitted(&mut self, request: &UserRequest) {
        self.events.push(("user_request_submitted".into(), request.submit_time));
    }

    fn user_request_finished(&mut self, request: &UserRequest) {
        self.events
            .push(("user_request_finished".into(), request.finish_time.unwrap_or(-1.)));
    }

    fn instance_group_finished(&mut self, group: &InstanceGroup) {
        self.events
            .push(("instance_group_finished".into(), group.finish_time.unwrap_or(-1.)));
    }

    fn instance_created(&mut self, instance: &Instance, _dc: Id) {
        self.events.push(("instance_created".into(), instance.start_time.unwrap_or(-1.)));
    }

    fn instance_finished(&mut self, instance: &Instance, _dc: Id) {
        self.events
            .push(("instance_finished".into(), instance.finish_time.unwrap_or(-1.)));
    }

    fn bw_allocated(&mut self, _edge: &AllocatedEdge, time: f64) {
        self.events.push(("bw_allocated".into(), time));
    }

    fn bw_released(&mut self, _edge: &AllocatedEdge, time: f64) {
        self.events.push(("bw_released".into(), time));
    }

    fn simulation_summary(&mut self, _finish_time: f64, network_tco: f64) {
        self.events.push(("simulation_summary".into(), network_tco));
    }
}
