//! Downlink packet buffering for idle bearers
//!
//! While the UE is idle a bearer has no eNB S1-U tunnel, so downlink packets
//! arriving on S5-U are held here until paging completes. The first packet of
//! an idle period asks the caller to send one Downlink Data Notification;
//! later packets of the same period never do.
//!
//! State transitions:
//!
//! ```text
//!   Connected --enter_idle--> Idle --push (first)--> NotificationPending
//!       ^                      ^                           |
//!       |                      |                  notification_sent
//!       |                   discard                        v
//!       +-------flush-------- (any buffering state) <-- NotificationSent
//! ```

use std::collections::VecDeque;

use bytes::Bytes;

/// Maximum number of packets buffered per bearer
pub const MAX_NUM_BUFFER_PKT: usize = 512;

/// Downlink notification state of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DlState {
    /// eNB tunnel present, packets are forwarded
    #[default]
    Connected,
    /// UE idle, nothing buffered yet in this idle period
    Idle,
    /// First packet buffered, notification not yet confirmed sent
    NotificationPending,
    /// Notification sent for this idle period
    NotificationSent,
}

impl DlState {
    pub fn name(&self) -> &'static str {
        match self {
            DlState::Connected => "CONNECTED",
            DlState::Idle => "IDLE",
            DlState::NotificationPending => "DL_NOTI_PENDING",
            DlState::NotificationSent => "DL_NOTI_SENT",
        }
    }
}

/// Result of offering a downlink packet to the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Packet queued. `notify` is true only for the first packet of an idle period.
    Buffered { notify: bool },
    /// Buffer full, the arriving packet was discarded
    Dropped,
    /// Bearer is connected; the packet is handed back for forwarding
    Forward(Bytes),
}

/// Bounded FIFO of downlink packets plus the one-shot notification state
#[derive(Debug, Clone, Default)]
pub struct DownlinkBuffer {
    state: DlState,
    pkts: VecDeque<Bytes>,
    num_dropped: u64,
}

impl DownlinkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DlState {
        self.state
    }

    /// True while packets are held instead of forwarded
    pub fn is_buffering(&self) -> bool {
        self.state != DlState::Connected
    }

    /// True once a notification was requested for the current idle period
    pub fn is_notified(&self) -> bool {
        matches!(
            self.state,
            DlState::NotificationPending | DlState::NotificationSent
        )
    }

    pub fn len(&self) -> usize {
        self.pkts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pkts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pkts.len() >= MAX_NUM_BUFFER_PKT
    }

    /// Packets rejected because the buffer was full
    pub fn num_dropped(&self) -> u64 {
        self.num_dropped
    }

    /// UE went idle: start holding packets. No-op if already buffering.
    pub fn enter_idle(&mut self) {
        if self.state == DlState::Connected {
            self.state = DlState::Idle;
        }
    }

    /// Offer a downlink packet.
    ///
    /// At capacity the newest arrival is rejected; packets already held are
    /// never evicted.
    pub fn push(&mut self, pkt: Bytes) -> PushOutcome {
        if self.state == DlState::Connected {
            return PushOutcome::Forward(pkt);
        }

        if self.is_full() {
            self.num_dropped += 1;
            log::warn!(
                "Downlink buffer full [{}], packet dropped (total dropped {})",
                MAX_NUM_BUFFER_PKT,
                self.num_dropped
            );
            return PushOutcome::Dropped;
        }

        self.pkts.push_back(pkt);

        let notify = self.state == DlState::Idle;
        if notify {
            self.state = DlState::NotificationPending;
        }
        PushOutcome::Buffered { notify }
    }

    /// Record that the Downlink Data Notification went out.
    /// Returns false if no notification was pending.
    pub fn notification_sent(&mut self) -> bool {
        if self.state == DlState::NotificationPending {
            self.state = DlState::NotificationSent;
            true
        } else {
            false
        }
    }

    /// Paging finished: hand back every held packet in arrival order and
    /// return to the connected state, which re-arms the notification.
    pub fn flush(&mut self) -> Vec<Bytes> {
        self.state = DlState::Connected;
        self.pkts.drain(..).collect()
    }

    /// Paging failed: drop held packets and stay idle with the notification
    /// re-armed. Returns the number of packets discarded.
    pub fn discard(&mut self) -> usize {
        let n = self.pkts.len();
        self.pkts.clear();
        if self.is_buffering() {
            self.state = DlState::Idle;
        }
        n
    }
}
