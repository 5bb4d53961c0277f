//! # Ground-Truth Broadcast
//!
//! During a replay, each `signal` and `energy` report of the prepared ground
//! truth is published as one JSON message when its `time_start` (POSIX
//! seconds) arrives, so a live listener sees the truth at the moment the
//! matching burst goes on air.
//!
//! ```text
//!  ground truth ─► broadcast_schedule ─► [(at, report), ...]
//!                                             │ sleep until at
//!                                             ▼
//!                                      ReportSink::publish ─► PUB tcp://127.0.0.1:62002
//! ```
//!
//! Reports are sent in file order. A report whose time has already passed
//! goes out immediately; a report that cannot be published is logged and
//! the rest still go out.

use rfsynth_core::WallClock;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

use crate::error::{TestbedError, TestbedResult};

/// Endpoint the live listeners subscribe to.
pub const DEFAULT_BROADCAST_ENDPOINT: &str = "tcp://127.0.0.1:62002";

const BROADCAST_REPORT_TYPES: [&str; 2] = ["signal", "energy"];

/// Destination of published reports.
pub trait ReportSink {
    fn publish(&mut self, report: &Value) -> TestbedResult<()>;
}

/// A report and the instant it is due.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledReport {
    pub at: WallClock,
    pub report: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastSummary {
    pub published: usize,
    pub failed: usize,
}

/// Broadcastable reports of a ground-truth document, in file order.
///
/// Reports of other types are left out. Reports without a numeric
/// `time_start` are logged and left out.
pub fn broadcast_schedule(doc: &Value) -> TestbedResult<Vec<ScheduledReport>> {
    let reports = doc.get("reports").and_then(Value::as_array).ok_or_else(|| {
        TestbedError::config("Report document has no \"reports\" array".to_string())
    })?;

    let mut schedule = Vec::with_capacity(reports.len());
    for (index, report) in reports.iter().enumerate() {
        let kind = report.get("report_type").and_then(Value::as_str);
        if !kind.is_some_and(|k| BROADCAST_REPORT_TYPES.contains(&k)) {
            continue;
        }
        let Some(time_start) = report.get("time_start").and_then(Value::as_f64) else {
            warn!(report = index, "Report has no numeric time_start, not broadcast");
            continue;
        };
        schedule.push(ScheduledReport {
            at: WallClock::from_secs_f64(time_start),
            report: report.clone(),
        });
    }
    Ok(schedule)
}

/// Publish every report at its time. Blocks until the last one is sent.
pub fn broadcast_reports(
    schedule: &[ScheduledReport],
    sink: &mut dyn ReportSink,
) -> BroadcastSummary {
    let mut summary = BroadcastSummary::default();
    for (index, item) in schedule.iter().enumerate() {
        item.at.sleep_until();
        match sink.publish(&item.report) {
            Ok(()) => {
                debug!(report = index, at_s = item.at.as_secs_f64(), "Report published");
                summary.published += 1;
            }
            Err(e) => {
                error!(report = index, error = %e, "Could not publish report");
                summary.failed += 1;
            }
        }
    }
    info!(
        published = summary.published,
        failed = summary.failed,
        "Ground-truth broadcast finished"
    );
    summary
}

/// ZeroMQ PUB socket sending each report as a JSON text frame.
pub struct ZmqPublisher {
    // Dropped before the runtime it was bound on
    socket: PubSocket,
    runtime: Runtime,
    endpoint: String,
}

impl ZmqPublisher {
    /// Bind a publisher. The socket accepts subscribers from a background
    /// worker, so listeners can join between reports.
    pub fn bind(endpoint: &str) -> TestbedResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rfsynth-broadcast")
            .enable_all()
            .build()
            .map_err(|e| TestbedError::Broadcast(format!("cannot start runtime: {}", e)))?;

        let bound = runtime.block_on(async {
            let mut socket = PubSocket::new();
            let result = socket.bind(endpoint).await;
            result.map(|_| socket)
        });
        let socket = bound
            .map_err(|e| TestbedError::Broadcast(format!("cannot bind {}: {}", endpoint, e)))?;

        info!(endpoint, "Ground-truth publisher bound");
        Ok(Self {
            socket,
            runtime,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReportSink for ZmqPublisher {
    fn publish(&mut self, report: &Value) -> TestbedResult<()> {
        let message = ZmqMessage::from(report.to_string());
        self.runtime
            .block_on(self.socket.send(message))
            .map_err(|e| TestbedError::Broadcast(format!("send on {}: {}", self.endpoint, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Collector {
        sent: Vec<(Value, WallClock)>,
        reject: Option<&'static str>,
    }

    impl ReportSink for Collector {
        fn publish(&mut self, report: &Value) -> TestbedResult<()> {
            if self.reject.is_some_and(|name| report["instance_name"] == name) {
                return Err(TestbedError::Broadcast("rejected".to_string()));
            }
            self.sent.push((report.clone(), WallClock::now()));
            Ok(())
        }
    }

    #[test]
    fn test_schedule_keeps_signal_and_energy_in_order() {
        let doc = json!({"reports": [
            {"report_type": "energy", "instance_name": "a", "time_start": 20.0},
            {"report_type": "detection", "instance_name": "b", "time_start": 5.0},
            {"report_type": "signal", "instance_name": "c", "time_start": 10.0},
            {"report_type": "signal", "instance_name": "d"}
        ]});
        let schedule = broadcast_schedule(&doc).unwrap();

        let names: Vec<_> = schedule.iter().map(|s| s.report["instance_name"].clone()).collect();
        assert_eq!(names, vec![json!("a"), json!("c")]);
        assert_eq!(schedule[0].at, WallClock::from_secs_f64(20.0));
        assert!(broadcast_schedule(&json!({})).is_err());
    }

    #[test]
    fn test_reports_wait_for_their_start() {
        let now = WallClock::now().as_secs_f64();
        let doc = json!({"reports": [
            {"report_type": "energy", "instance_name": "late", "time_start": now - 5.0},
            {"report_type": "energy", "instance_name": "soon", "time_start": now + 0.05}
        ]});
        let schedule = broadcast_schedule(&doc).unwrap();

        let mut sink = Collector::default();
        let summary = broadcast_reports(&schedule, &mut sink);
        assert_eq!(summary, BroadcastSummary { published: 2, failed: 0 });
        // Not sent before its time_start
        assert!(sink.sent[1].1 >= schedule[1].at);
    }

    #[test]
    fn test_failed_publish_does_not_stop_broadcast() {
        let doc = json!({"reports": [
            {"report_type": "signal", "instance_name": "x", "time_start": 0.0},
            {"report_type": "signal", "instance_name": "y", "time_start": 0.0}
        ]});
        let mut sink = Collector {
            reject: Some("x"),
            ..Default::default()
        };
        let summary = broadcast_reports(&broadcast_schedule(&doc).unwrap(), &mut sink);
        assert_eq!(summary, BroadcastSummary { published: 1, failed: 1 });
        assert_eq!(sink.sent[0].0["instance_name"], "y");
    }

    #[test]
    fn test_publisher_rejects_bad_endpoint() {
        assert!(matches!(
            ZmqPublisher::bind("not-an-endpoint"),
            Err(TestbedError::Broadcast(_))
        ));
    }
}
