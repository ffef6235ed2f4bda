//! SGW State Machine
//!
//! Main SGW state machine. Runs every queued event to completion against the
//! context and returns what has to go out on the wire.

use crate::context::SgwContext;
use crate::error::SgwError;
use crate::event::SgwEvent;
use crate::gtp_path;
use crate::message::{gtp_type, GtpMessage, Interface, S11Message, S5cMessage, SgwOutput};
use crate::s11_handler;
use crate::s5c_handler;
use crate::timer::SgwTimerId;

/// FSM state type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgwState {
    Initial,
    Operational,
    Final,
}

/// SGW FSM context
#[derive(Debug)]
pub struct SgwFsm {
    pub state: SgwState,
}

impl Default for SgwFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl SgwFsm {
    pub fn new() -> Self {
        Self {
            state: SgwState::Initial,
        }
    }

    /// FSM entry
    pub fn entry(&mut self) {
        if self.state == SgwState::Initial {
            self.state = SgwState::Operational;
            log::info!("SGW state machine: Initial -> Operational");
        }
    }

    /// FSM exit
    pub fn exit(&mut self) {
        if self.state != SgwState::Final {
            log::info!("SGW state machine: {:?} -> Final", self.state);
            self.state = SgwState::Final;
        }
    }

    /// Dispatch event to state machine
    pub fn dispatch(&mut self, ctx: &mut SgwContext, event: SgwEvent) -> Vec<SgwOutput> {
        sgw_sm_debug(&event);

        match self.state {
            SgwState::Operational => self.state_operational(ctx, event),
            SgwState::Initial | SgwState::Final => {
                log::warn!("{} ignored in {:?} state", event.name(), self.state);
                Vec::new()
            }
        }
    }

    /// Operational state handler
    fn state_operational(&mut self, ctx: &mut SgwContext, event: SgwEvent) -> Vec<SgwOutput> {
        match event {
            SgwEvent::S11Message(msg) => self.handle_s11_message(ctx, &msg),
            SgwEvent::S5cMessage(msg) => self.handle_s5c_message(ctx, &msg),
            SgwEvent::DownlinkData { teid, pkt } => {
                gtp_path::handle_downlink_packet(ctx, teid, pkt).into_outputs()
            }
            SgwEvent::UplinkData { teid, pkt } => {
                gtp_path::handle_uplink_packet(ctx, teid, pkt).into_iter().collect()
            }
            SgwEvent::Timer {
                timer_id,
                bearer_index,
            } => {
                self.handle_timer(ctx, timer_id, bearer_index);
                Vec::new()
            }
        }
    }

    /// Handle S11 message (from MME)
    fn handle_s11_message(&self, ctx: &mut SgwContext, msg: &S11Message) -> Vec<SgwOutput> {
        let result = match msg {
            S11Message::CreateSessionRequest(req) => {
                s11_handler::handle_create_session_request(ctx, req)
            }
            S11Message::ModifyBearerRequest(req) => {
                s11_handler::handle_modify_bearer_request(ctx, req)
            }
            S11Message::DeleteSessionRequest(req) => {
                s11_handler::handle_delete_session_request(ctx, req)
            }
            S11Message::ReleaseAccessBearersRequest(req) => {
                s11_handler::handle_release_access_bearers_request(ctx, req)
            }
            S11Message::DownlinkDataNotificationAck(ack) => {
                s11_handler::handle_downlink_data_notification_ack(ctx, ack)
            }
            S11Message::CreateBearerResponse(rsp) => {
                s11_handler::handle_create_bearer_response(ctx, rsp)
            }
            S11Message::DeleteBearerResponse(rsp) => {
                s11_handler::handle_delete_bearer_response(ctx, rsp)
            }
        };

        result.unwrap_or_else(|e| {
            log::error!("[S11] {} failed: {}", msg.name(), e);
            s11_reject(ctx, msg, &e).into_iter().collect()
        })
    }

    /// Handle S5-C message (from PGW)
    fn handle_s5c_message(&self, ctx: &mut SgwContext, msg: &S5cMessage) -> Vec<SgwOutput> {
        let result = match msg {
            S5cMessage::CreateSessionResponse(rsp) => {
                s5c_handler::handle_create_session_response(ctx, rsp)
            }
            S5cMessage::DeleteSessionResponse(rsp) => {
                s5c_handler::handle_delete_session_response(ctx, rsp)
            }
            S5cMessage::CreateBearerRequest(req) => {
                s5c_handler::handle_create_bearer_request(ctx, req)
            }
            S5cMessage::DeleteBearerRequest(req) => {
                s5c_handler::handle_delete_bearer_request(ctx, req)
            }
        };

        result.unwrap_or_else(|e| {
            log::error!("[S5-C] {} failed: {}", msg.name(), e);
            s5c_reject(ctx, msg, &e).into_iter().collect()
        })
    }

    fn handle_timer(&self, ctx: &mut SgwContext, timer_id: SgwTimerId, bearer_index: u32) {
        match timer_id {
            SgwTimerId::BufferExpiry => {
                if !ctx.timer_mgr.take_fired(timer_id, bearer_index) {
                    log::debug!("Stale {} for bearer {}", timer_id.name(), bearer_index);
                    return;
                }
                let discarded = gtp_path::discard_downlink_buffer(ctx, bearer_index);
                log::info!(
                    "{} bearer {} ({} packets discarded)",
                    timer_id.name(),
                    bearer_index,
                    discarded
                );
            }
        }
    }
}

/// Failure answer for an S11 message that could not be handled. Requests are
/// answered toward the MME; failed responses are relayed to the PGW.
fn s11_reject(ctx: &SgwContext, msg: &S11Message, err: &SgwError) -> Option<SgwOutput> {
    let (interface, msg_type, teid) = match msg {
        S11Message::CreateSessionRequest(req) => (
            Interface::S11,
            gtp_type::CREATE_SESSION_RESPONSE,
            req.sender_f_teid.map_or(0, |f_teid| f_teid.teid),
        ),
        S11Message::ModifyBearerRequest(req) => (
            Interface::S11,
            gtp_type::MODIFY_BEARER_RESPONSE,
            s11_handler::mme_s11_teid(ctx, req.sgw_s11_teid),
        ),
        S11Message::DeleteSessionRequest(req) => (
            Interface::S11,
            gtp_type::DELETE_SESSION_RESPONSE,
            s11_handler::mme_s11_teid(ctx, req.sgw_s11_teid),
        ),
        S11Message::ReleaseAccessBearersRequest(req) => (
            Interface::S11,
            gtp_type::RELEASE_ACCESS_BEARERS_RESPONSE,
            s11_handler::mme_s11_teid(ctx, req.sgw_s11_teid),
        ),
        S11Message::CreateBearerResponse(rsp) => (
            Interface::S5c,
            gtp_type::CREATE_BEARER_RESPONSE,
            s5c_handler::pgw_s5c_teid(ctx, rsp.sgw_s11_teid),
        ),
        S11Message::DeleteBearerResponse(rsp) => (
            Interface::S5c,
            gtp_type::DELETE_BEARER_RESPONSE,
            s5c_handler::pgw_s5c_teid(ctx, rsp.sgw_s11_teid),
        ),
        S11Message::DownlinkDataNotificationAck(_) => return None,
    };

    Some(SgwOutput::Gtp(
        GtpMessage::new(interface, msg_type, teid).with_cause(err.cause()),
    ))
}

/// Failure answer for an S5-C message. Only PGW requests are answered.
fn s5c_reject(ctx: &SgwContext, msg: &S5cMessage, err: &SgwError) -> Option<SgwOutput> {
    let (msg_type, sgw_s5c_teid) = match msg {
        S5cMessage::CreateBearerRequest(req) => {
            (gtp_type::CREATE_BEARER_RESPONSE, req.sgw_s5c_teid)
        }
        S5cMessage::DeleteBearerRequest(req) => {
            (gtp_type::DELETE_BEARER_RESPONSE, req.sgw_s5c_teid)
        }
        S5cMessage::CreateSessionResponse(_) | S5cMessage::DeleteSessionResponse(_) => {
            return None
        }
    };

    let teid = s5c_handler::pgw_s5c_teid(ctx, sgw_s5c_teid);
    Some(SgwOutput::Gtp(
        GtpMessage::new(Interface::S5c, msg_type, teid).with_cause(err.cause()),
    ))
}

/// Debug helper for state machine
pub fn sgw_sm_debug(event: &SgwEvent) {
    match event {
        SgwEvent::S11Message(msg) => log::trace!("{}: {}", event.name(), msg.name()),
        SgwEvent::S5cMessage(msg) => log::trace!("{}: {}", event.name(), msg.name()),
        _ => log::trace!("{}", event.name()),
    }
}

// ============================================================================
// Tests
// ============================================================================
