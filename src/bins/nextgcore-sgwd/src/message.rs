//! Decoded GTPv2-C messages exchanged with the MME (S11) and PGW (S5-C)
//!
//! Encoding and decoding happen outside this crate; handlers consume and
//! produce these structures.

use std::net::Ipv4Addr;

use bytes::Bytes;

// ============================================================================
// GTP Cause Values (TS 29.274 8.4)
// ============================================================================

pub mod gtp_cause {
    pub const REQUEST_ACCEPTED: u8 = 16;
    pub const REQUEST_ACCEPTED_PARTIALLY: u8 = 17;
    pub const NEW_PDN_TYPE_DUE_TO_NETWORK_PREFERENCE: u8 = 18;
    pub const NEW_PDN_TYPE_DUE_TO_SINGLE_ADDRESS_BEARER_ONLY: u8 = 19;
    pub const CONTEXT_NOT_FOUND: u8 = 64;
    pub const INVALID_MESSAGE_FORMAT: u8 = 65;
    pub const MANDATORY_IE_INCORRECT: u8 = 69;
    pub const MANDATORY_IE_MISSING: u8 = 70;
    pub const SYSTEM_FAILURE: u8 = 72;
    pub const NO_RESOURCES_AVAILABLE: u8 = 73;
    pub const UE_NOT_RESPONDING: u8 = 87;
    pub const UNABLE_TO_PAGE_UE: u8 = 90;
    pub const TEMPORARILY_REJECTED_DUE_TO_HANDOVER_IN_PROGRESS: u8 = 110;

    /// Causes 16..=19 are the "accepted" family
    pub fn is_accepted(cause: u8) -> bool {
        (REQUEST_ACCEPTED..=NEW_PDN_TYPE_DUE_TO_SINGLE_ADDRESS_BEARER_ONLY).contains(&cause)
    }
}

// ============================================================================
// GTP Message Types
// ============================================================================

pub mod gtp_type {
    pub const CREATE_SESSION_REQUEST: u8 = 32;
    pub const CREATE_SESSION_RESPONSE: u8 = 33;
    pub const MODIFY_BEARER_REQUEST: u8 = 34;
    pub const MODIFY_BEARER_RESPONSE: u8 = 35;
    pub const DELETE_SESSION_REQUEST: u8 = 36;
    pub const DELETE_SESSION_RESPONSE: u8 = 37;
    pub const CREATE_BEARER_REQUEST: u8 = 95;
    pub const CREATE_BEARER_RESPONSE: u8 = 96;
    pub const DELETE_BEARER_REQUEST: u8 = 99;
    pub const DELETE_BEARER_RESPONSE: u8 = 100;
    pub const RELEASE_ACCESS_BEARERS_REQUEST: u8 = 170;
    pub const RELEASE_ACCESS_BEARERS_RESPONSE: u8 = 171;
    pub const DOWNLINK_DATA_NOTIFICATION: u8 = 176;
    pub const DOWNLINK_DATA_NOTIFICATION_ACK: u8 = 177;
}

// ============================================================================
// GTP F-TEID Interface Types
// ============================================================================

pub mod f_teid_interface {
    pub const S1_U_ENODEB_GTP_U: u8 = 0;
    pub const S1_U_SGW_GTP_U: u8 = 1;
    pub const S5_S8_SGW_GTP_U: u8 = 4;
    pub const S5_S8_PGW_GTP_U: u8 = 5;
    pub const S5_S8_SGW_GTP_C: u8 = 6;
    pub const S11_S4_SGW_GTP_C: u8 = 11;
    pub const S11_MME_GTP_C: u8 = 10;
    pub const S5_S8_PGW_GTP_C: u8 = 7;
}

/// SGW interface a message or packet travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    S11,
    S5c,
    S1u,
    S5u,
}

/// Fully qualified TEID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FTeid {
    pub interface_type: u8,
    pub teid: u32,
    pub addr: Ipv4Addr,
}

impl FTeid {
    pub fn new(interface_type: u8, teid: u32, addr: Ipv4Addr) -> Self {
        Self {
            interface_type,
            teid,
            addr,
        }
    }
}

/// PDN Address Allocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paa {
    pub pdn_type: u8,
    pub ipv4_addr: Option<Ipv4Addr>,
}

/// Aggregate Maximum Bit Rate (bps)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ambr {
    pub uplink: u64,
    pub downlink: u64,
}

/// Bearer Context IE (grouped)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerContext {
    pub ebi: u8,
    pub cause: Option<u8>,
    pub s1u_enb: Option<FTeid>,
    pub s1u_sgw: Option<FTeid>,
    pub s5u_sgw: Option<FTeid>,
    pub s5u_pgw: Option<FTeid>,
}

impl BearerContext {
    pub fn with_ebi(ebi: u8) -> Self {
        Self {
            ebi,
            ..Default::default()
        }
    }
}

// ============================================================================
// S11 (from MME)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// IMSI in TBCD encoding
    pub imsi: Vec<u8>,
    pub apn: String,
    pub pdn_type: u8,
    pub paa: Paa,
    pub ambr: Ambr,
    /// MME S11 F-TEID
    pub sender_f_teid: Option<FTeid>,
    pub bearer_contexts: Vec<BearerContext>,
}

#[derive(Debug, Clone, Default)]
pub struct ModifyBearerRequest {
    pub sgw_s11_teid: u32,
    pub bearer_contexts: Vec<BearerContext>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteSessionRequest {
    pub sgw_s11_teid: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseAccessBearersRequest {
    pub sgw_s11_teid: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DownlinkDataNotificationAck {
    pub sgw_s11_teid: u32,
    pub cause: u8,
}

#[derive(Debug, Clone, Default)]
pub struct CreateBearerResponse {
    pub sgw_s11_teid: u32,
    pub cause: u8,
    pub bearer_contexts: Vec<BearerContext>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteBearerResponse {
    pub sgw_s11_teid: u32,
    pub cause: u8,
    /// Set when the whole PDN connection is being released
    pub linked_ebi: Option<u8>,
    pub bearer_contexts: Vec<BearerContext>,
}

/// Message received on S11
#[derive(Debug, Clone)]
pub enum S11Message {
    CreateSessionRequest(CreateSessionRequest),
    ModifyBearerRequest(ModifyBearerRequest),
    DeleteSessionRequest(DeleteSessionRequest),
    ReleaseAccessBearersRequest(ReleaseAccessBearersRequest),
    DownlinkDataNotificationAck(DownlinkDataNotificationAck),
    CreateBearerResponse(CreateBearerResponse),
    DeleteBearerResponse(DeleteBearerResponse),
}

impl S11Message {
    pub fn name(&self) -> &'static str {
        match self {
            S11Message::CreateSessionRequest(_) => "Create Session Request",
            S11Message::ModifyBearerRequest(_) => "Modify Bearer Request",
            S11Message::DeleteSessionRequest(_) => "Delete Session Request",
            S11Message::ReleaseAccessBearersRequest(_) => "Release Access Bearers Request",
            S11Message::DownlinkDataNotificationAck(_) => "Downlink Data Notification Ack",
            S11Message::CreateBearerResponse(_) => "Create Bearer Response",
            S11Message::DeleteBearerResponse(_) => "Delete Bearer Response",
        }
    }
}

// ============================================================================
// S5-C (from PGW)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CreateSessionResponse {
    pub sgw_s5c_teid: u32,
    pub cause: u8,
    /// PGW S5-C F-TEID
    pub sender_f_teid: Option<FTeid>,
    pub paa: Option<Paa>,
    pub bearer_contexts: Vec<BearerContext>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteSessionResponse {
    pub sgw_s5c_teid: u32,
    pub cause: u8,
}

#[derive(Debug, Clone, Default)]
pub struct CreateBearerRequest {
    pub sgw_s5c_teid: u32,
    pub linked_ebi: u8,
    pub bearer_contexts: Vec<BearerContext>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteBearerRequest {
    pub sgw_s5c_teid: u32,
    /// Default bearer EBI: the whole PDN connection goes away
    pub linked_ebi: Option<u8>,
    pub ebis: Vec<u8>,
}

/// Message received on S5-C
#[derive(Debug, Clone)]
pub enum S5cMessage {
    CreateSessionResponse(CreateSessionResponse),
    DeleteSessionResponse(DeleteSessionResponse),
    CreateBearerRequest(CreateBearerRequest),
    DeleteBearerRequest(DeleteBearerRequest),
}

impl S5cMessage {
    pub fn name(&self) -> &'static str {
        match self {
            S5cMessage::CreateSessionResponse(_) => "Create Session Response",
            S5cMessage::DeleteSessionResponse(_) => "Delete Session Response",
            S5cMessage::CreateBearerRequest(_) => "Create Bearer Request",
            S5cMessage::DeleteBearerRequest(_) => "Delete Bearer Request",
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// GTPv2-C message to be encoded and sent by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpMessage {
    pub interface: Interface,
    pub msg_type: u8,
    /// Peer TEID placed in the GTPv2-C header
    pub teid: u32,
    /// Sequence number for SGW-initiated requests
    pub sqn: Option<u32>,
    pub cause: Option<u8>,
    pub sender_f_teid: Option<FTeid>,
    pub linked_ebi: Option<u8>,
    pub bearer_contexts: Vec<BearerContext>,
}

impl GtpMessage {
    pub fn new(interface: Interface, msg_type: u8, teid: u32) -> Self {
        Self {
            interface,
            msg_type,
            teid,
            sqn: None,
            cause: None,
            sender_f_teid: None,
            linked_ebi: None,
            bearer_contexts: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: u8) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// Anything the worker hands to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SgwOutput {
    Gtp(GtpMessage),
    /// G-PDU to forward on a user-plane interface
    UserPlane {
        interface: Interface,
        teid: u32,
        addr: Ipv4Addr,
        pkt: Bytes,
    },
}
