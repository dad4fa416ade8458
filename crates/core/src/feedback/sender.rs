//! Periodic loss reporting from the receiving endpoint.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::rtp::ReceiverStats;
use crate::runtime::TaskHandle;
use crate::wire::rtcp::FeedbackPacket;

/// Counters as of the previous report, for interval deltas.
#[derive(Debug, Default, Clone, Copy)]
struct ReportBaseline {
    highest: u32,
    cumulative: u32,
}

/// Builds one report: running totals on the wire, loss fraction scoped to
/// the interval since the previous report. An interval with no expected
/// packets reports zero loss.
fn build_report(highest: u32, cumulative: u32, baseline: &mut ReportBaseline) -> FeedbackPacket {
    let expected = highest.wrapping_sub(baseline.highest);
    let lost = cumulative.wrapping_sub(baseline.cumulative);
    baseline.highest = highest;
    baseline.cumulative = cumulative;

    let fraction = if expected != 0 {
        f64::from(lost) / f64::from(expected)
    } else {
        0.0
    };
    FeedbackPacket::new(fraction, cumulative, highest)
}

/// Reports this endpoint's receive statistics to its peer on a fixed
/// interval.
///
/// The baseline for interval deltas lives on the struct, so a report
/// cycle paused and resumed continues from where it stopped instead of
/// re-reporting old loss.
pub struct FeedbackSender {
    socket: Arc<UdpSocket>,
    stats: Arc<ReceiverStats>,
    interval: Duration,
    baseline: Arc<Mutex<ReportBaseline>>,
    task: Option<TaskHandle>,
}

impl FeedbackSender {
    /// Connects the feedback socket to the peer's advertised port.
    pub fn connect(peer: SocketAddr, stats: Arc<ReceiverStats>, interval: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(peer)?;
        tracing::debug!(%peer, "feedback sender connected");
        Ok(Self {
            socket: Arc::new(socket),
            stats,
            interval,
            baseline: Arc::new(Mutex::new(ReportBaseline::default())),
            task: None,
        })
    }

    /// Starts the report cycle. Idempotent; restartable after `stop`.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let socket = self.socket.clone();
        let stats = self.stats.clone();
        let baseline = self.baseline.clone();

        self.task = Some(TaskHandle::spawn_periodic(
            "feedback-sender",
            self.interval,
            move || {
                let packet = build_report(
                    stats.highest_seq(),
                    stats.cumulative_lost(),
                    &mut baseline.lock(),
                );
                match socket.send(&packet.encode()) {
                    Ok(_) => tracing::debug!(
                        fraction_lost = packet.fraction_lost,
                        cumulative_lost = packet.cumulative_lost,
                        highest_seq = packet.highest_seq,
                        "feedback sent"
                    ),
                    Err(error) => tracing::warn!(%error, "feedback send failed"),
                }
                true
            },
        ));
    }

    /// Stops the report cycle. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_report_covers_everything_seen() {
        let mut baseline = ReportBaseline::default();
        let report = build_report(10, 2, &mut baseline);
        assert!((report.fraction_lost - 0.2).abs() < 1e-9);
        assert_eq!(report.cumulative_lost, 2);
        assert_eq!(report.highest_seq, 10);
    }

    #[test]
    fn fraction_is_scoped_to_the_interval() {
        let mut baseline = ReportBaseline::default();
        build_report(10, 0, &mut baseline);
        // Five more expected, four of them lost.
        let report = build_report(15, 4, &mut baseline);
        assert!((report.fraction_lost - 0.8).abs() < 1e-9);
        assert_eq!(report.cumulative_lost, 4);
        assert_eq!(report.highest_seq, 15);
    }

    #[test]
    fn idle_interval_reports_zero() {
        let mut baseline = ReportBaseline::default();
        build_report(10, 1, &mut baseline);
        let report = build_report(10, 1, &mut baseline);
        assert_eq!(report.fraction_lost, 0.0);
    }
}
