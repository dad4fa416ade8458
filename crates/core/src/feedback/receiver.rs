//! Feedback intake on the sending endpoint.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use crate::congestion::CongestionMonitor;
use crate::error::Result;
use crate::runtime::TaskHandle;
use crate::wire::rtcp::{FeedbackPacket, RTCP_PACKET_LEN};

/// Polls the feedback socket and keeps the congestion monitor current.
///
/// Each poll tick attempts one bounded read; reports queued between ticks
/// drain on the following ticks. Malformed datagrams are logged and
/// dropped.
pub struct FeedbackReceiver {
    socket: Arc<UdpSocket>,
    monitor: Arc<CongestionMonitor>,
    poll: Duration,
    task: Option<TaskHandle>,
}

impl FeedbackReceiver {
    /// Binds an ephemeral feedback socket; its port is advertised to the
    /// peer in the setup exchange.
    pub fn bind(monitor: Arc<CongestionMonitor>, poll: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(poll))?;
        Ok(Self {
            socket: Arc::new(socket),
            monitor,
            poll,
            task: None,
        })
    }

    /// Port the peer should address feedback reports to.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Starts polling. Idempotent; restartable after `stop`.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let socket = self.socket.clone();
        let monitor = self.monitor.clone();
        let mut buf = [0u8; RTCP_PACKET_LEN];

        self.task = Some(TaskHandle::spawn_periodic(
            "feedback-receiver",
            self.poll,
            move || {
                match socket.recv(&mut buf) {
                    Ok(n) => match FeedbackPacket::decode(&buf[..n]) {
                        Ok(packet) => {
                            tracing::debug!(
                                fraction_lost = packet.fraction_lost,
                                cumulative_lost = packet.cumulative_lost,
                                highest_seq = packet.highest_seq,
                                "feedback received"
                            );
                            monitor.observe(packet.fraction_lost);
                        }
                        Err(error) => tracing::warn!(%error, "dropped malformed feedback"),
                    },
                    Err(error)
                        if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                    Err(error) => tracing::warn!(%error, "feedback receive failed"),
                }
                true
            },
        ));
    }

    /// Stops polling. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::CongestionLevel;
    use crate::rtp::ReceiverStats;
    use std::thread;

    #[test]
    fn reported_loss_reaches_the_monitor() {
        let monitor = Arc::new(CongestionMonitor::new());
        let mut receiver =
            FeedbackReceiver::bind(monitor.clone(), Duration::from_millis(20)).unwrap();
        let port = receiver.local_port().unwrap();
        receiver.start();

        // One of three packets lost since the last report.
        let stats = Arc::new(ReceiverStats::new());
        stats.record(1, 10);
        stats.record(3, 10);
        let mut sender = crate::feedback::FeedbackSender::connect(
            format!("127.0.0.1:{port}").parse().unwrap(),
            stats,
            Duration::from_millis(20),
        )
        .unwrap();
        sender.start();

        let mut level = CongestionLevel::None;
        for _ in 0..100 {
            level = monitor.level();
            if level != CongestionLevel::None {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        sender.stop();
        receiver.stop();
        assert_eq!(level, CongestionLevel::Medium);
    }
}
