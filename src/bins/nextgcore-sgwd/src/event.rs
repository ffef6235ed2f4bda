//! SGW Event Definitions and command queue
//!
//! Everything that touches the session tables arrives as an `SgwEvent` on a
//! single bounded queue drained by one worker.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use bytes::Bytes;

use crate::message::{S11Message, S5cMessage};
use crate::timer::SgwTimerId;

/// Event types for SGW
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgwEventId {
    S11Message,
    S5cMessage,
    DownlinkData,
    UplinkData,
    Timer,
}

impl SgwEventId {
    pub fn name(&self) -> &'static str {
        match self {
            SgwEventId::S11Message => "SGW_EVT_S11_MESSAGE",
            SgwEventId::S5cMessage => "SGW_EVT_S5C_MESSAGE",
            SgwEventId::DownlinkData => "SGW_EVT_DOWNLINK_DATA",
            SgwEventId::UplinkData => "SGW_EVT_UPLINK_DATA",
            SgwEventId::Timer => "SGW_EVT_TIMER",
        }
    }
}

/// SGW Event
#[derive(Debug, Clone)]
pub enum SgwEvent {
    /// Decoded GTPv2-C message from the MME
    S11Message(S11Message),
    /// Decoded GTPv2-C message from the PGW
    S5cMessage(S5cMessage),
    /// G-PDU received on S5-U
    DownlinkData { teid: u32, pkt: Bytes },
    /// G-PDU received on S1-U
    UplinkData { teid: u32, pkt: Bytes },
    /// Expired bearer timer
    Timer {
        timer_id: SgwTimerId,
        bearer_index: u32,
    },
}

impl SgwEvent {
    pub fn id(&self) -> SgwEventId {
        match self {
            SgwEvent::S11Message(_) => SgwEventId::S11Message,
            SgwEvent::S5cMessage(_) => SgwEventId::S5cMessage,
            SgwEvent::DownlinkData { .. } => SgwEventId::DownlinkData,
            SgwEvent::UplinkData { .. } => SgwEventId::UplinkData,
            SgwEvent::Timer { .. } => SgwEventId::Timer,
        }
    }

    pub fn name(&self) -> &'static str {
        self.id().name()
    }
}

// ============================================================================
// Command queue
// ============================================================================

/// Producer side of the SGW command queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: SyncSender<SgwEvent>,
}

impl EventSender {
    /// Enqueue without blocking. The event is handed back if the queue is
    /// full or the worker is gone.
    pub fn try_push(&self, event: SgwEvent) -> Result<(), SgwEvent> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                log::warn!("SGW queue full, {} dropped", event.name());
                event
            }
            TrySendError::Disconnected(event) => {
                log::error!("SGW queue closed, {} dropped", event.name());
                event
            }
        })
    }
}

/// Consumer side of the SGW command queue, owned by the worker
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<SgwEvent>,
}

impl EventReceiver {
    /// Wait up to `timeout` for the next event. `None` on timeout or when
    /// every sender has been dropped.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<SgwEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<SgwEvent> {
        self.rx.try_recv().ok()
    }
}

/// Bounded command queue
pub struct EventQueue;

impl EventQueue {
    pub fn create(capacity: usize) -> (EventSender, EventReceiver) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (EventSender { tx }, EventReceiver { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_event(bearer_index: u32) -> SgwEvent {
        SgwEvent::Timer {
            timer_id: SgwTimerId::BufferExpiry,
            bearer_index,
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(timer_event(1).name(), "SGW_EVT_TIMER");
        let ev = SgwEvent::DownlinkData {
            teid: 1,
            pkt: Bytes::from_static(b"x"),
        };
        assert_eq!(ev.id(), SgwEventId::DownlinkData);
    }

    #[test]
    fn test_queue_fifo() {
        let (tx, rx) = EventQueue::create(4);
        tx.try_push(timer_event(1)).unwrap();
        tx.try_push(timer_event(2)).unwrap();

        match rx.try_pop() {
            Some(SgwEvent::Timer { bearer_index, .. }) => assert_eq!(bearer_index, 1),
            other => panic!("unexpected {other:?}"),
        }
        match rx.pop_timeout(Duration::from_millis(10)) {
            Some(SgwEvent::Timer { bearer_index, .. }) => assert_eq!(bearer_index, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.pop_timeout(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_queue_full_hands_event_back() {
        let (tx, _rx) = EventQueue::create(1);
        tx.try_push(timer_event(1)).unwrap();
        let rejected = tx.try_push(timer_event(2)).unwrap_err();
        assert!(matches!(rejected, SgwEvent::Timer { bearer_index: 2, .. }));
    }
}
