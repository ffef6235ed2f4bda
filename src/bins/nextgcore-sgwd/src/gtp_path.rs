//! SGW GTP Path Management
//!
//! Local interface sockets, remote GTP-C nodes, the G-PDU framing used on
//! S1-U/S5-U, the uplink relay toward the PGW, and the downlink data path that
//! decides between forwarding and buffering.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::buffer::PushOutcome;
use crate::config::{EndpointConf, GTPV1_U_UDP_PORT};
use crate::context::SgwContext;
use crate::message::{gtp_type, BearerContext, GtpMessage, Interface, SgwOutput};
use crate::timer::SgwTimerId;

// ============================================================================
// Interfaces and nodes
// ============================================================================

/// Local endpoint of one SGW interface
#[derive(Debug)]
pub struct GtpInterface {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub sock: Option<UdpSocket>,
}

impl GtpInterface {
    pub fn new(conf: EndpointConf) -> Self {
        Self {
            addr: conf.addr,
            port: conf.port,
            sock: None,
        }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }

    pub fn is_open(&self) -> bool {
        self.sock.is_some()
    }
}

/// Remote GTP-C peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtpNode {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl GtpNode {
    pub fn new(conf: EndpointConf) -> Self {
        Self {
            addr: conf.addr,
            port: conf.port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }
}

/// GTPv2-C sequence numbers are 24 bits wide
const GTP_SQN_MASK: u32 = 0x00ff_ffff;

/// GTP transaction context: sequence numbers for SGW-initiated requests
#[derive(Debug, Default)]
pub struct GtpXactCtx {
    next_sqn: u32,
}

impl GtpXactCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sqn(&mut self) -> u32 {
        let sqn = self.next_sqn;
        self.next_sqn = (self.next_sqn + 1) & GTP_SQN_MASK;
        sqn
    }
}

// ============================================================================
// Open / Close
// ============================================================================

fn bind(iface: &mut GtpInterface, name: &str) -> io::Result<()> {
    let sock = UdpSocket::bind(iface.socket_addr())?;
    sock.set_nonblocking(true)?;
    log::info!("{} server() [{}]", name, iface.socket_addr());
    iface.sock = Some(sock);
    Ok(())
}

/// Bind the S11, S5-C, S1-U and S5-U sockets
pub fn gtp_open(ctx: &mut SgwContext) -> io::Result<()> {
    bind(&mut ctx.s11, "gtp_server() S11")?;
    bind(&mut ctx.s5c, "gtp_server() S5-C")?;
    bind(&mut ctx.s1u, "gtp_server() S1-U")?;
    bind(&mut ctx.s5u, "gtp_server() S5-U")?;
    Ok(())
}

/// Drop every interface socket
pub fn gtp_close(ctx: &mut SgwContext) {
    for iface in [&mut ctx.s11, &mut ctx.s5c, &mut ctx.s1u, &mut ctx.s5u] {
        if iface.sock.take().is_some() {
            log::debug!("Closed [{}]", iface.socket_addr());
        }
    }
}

// ============================================================================
// G-PDU framing
// ============================================================================

const GTPV1U_HEADER_LEN: usize = 8;
const GTP1U_FLAGS_V1_PT: u8 = 0x30;
const GTP1U_FLAGS_E: u8 = 0x04;
const GTP1U_FLAGS_S: u8 = 0x02;
const GTP1U_FLAGS_PN: u8 = 0x01;
const GTP1U_MSGTYPE_GPDU: u8 = 0xff;

/// Frame a user packet as a G-PDU for `teid`
pub fn encode_gpdu(teid: u32, pkt: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(GTPV1U_HEADER_LEN + pkt.len());
    buf.put_u8(GTP1U_FLAGS_V1_PT);
    buf.put_u8(GTP1U_MSGTYPE_GPDU);
    buf.put_u16(pkt.len() as u16);
    buf.put_u32(teid);
    buf.put_slice(pkt);
    buf.freeze()
}

/// TEID and payload of a G-PDU. Anything else (echo, error indication,
/// malformed frames) yields `None`.
pub fn decode_gpdu(mut buf: Bytes) -> Option<(u32, Bytes)> {
    if buf.remaining() < GTPV1U_HEADER_LEN {
        return None;
    }

    let flags = buf.get_u8();
    let msg_type = buf.get_u8();
    let length = buf.get_u16() as usize;
    let teid = buf.get_u32();

    if flags >> 5 != 1 || msg_type != GTP1U_MSGTYPE_GPDU || buf.remaining() < length {
        return None;
    }
    buf.truncate(length);

    if flags & (GTP1U_FLAGS_E | GTP1U_FLAGS_S | GTP1U_FLAGS_PN) != 0 {
        if buf.remaining() < 4 {
            return None;
        }
        buf.advance(3);
        let mut next_type = buf.get_u8();

        // Extension headers: length in 4-octet units, next type last
        while flags & GTP1U_FLAGS_E != 0 && next_type != 0 {
            if buf.remaining() < 1 {
                return None;
            }
            let ext_len = buf[0] as usize * 4;
            if ext_len == 0 || buf.remaining() < ext_len {
                return None;
            }
            next_type = buf[ext_len - 1];
            buf.advance(ext_len);
        }
    }

    Some((teid, buf))
}

/// Pull one G-PDU off a user-plane socket. `Ok(None)` when nothing is
/// pending or the datagram is not a G-PDU.
pub fn gtpu_recv(iface: &GtpInterface) -> io::Result<Option<(u32, Bytes)>> {
    let Some(sock) = iface.sock.as_ref() else {
        return Ok(None);
    };

    let mut buf = vec![0u8; 65535];
    match sock.recv_from(&mut buf) {
        Ok((len, from)) => {
            buf.truncate(len);
            let decoded = decode_gpdu(Bytes::from(buf));
            if decoded.is_none() {
                log::debug!("Ignoring non G-PDU datagram from {}", from);
            }
            Ok(decoded)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

/// Send user-plane output on its interface. GTP-C messages go to the
/// external encoder and are only logged here.
pub fn gtp_send(ctx: &SgwContext, output: &SgwOutput) -> io::Result<()> {
    match output {
        SgwOutput::Gtp(msg) => {
            log::debug!(
                "[{:?}] GTP-C type={} teid={:#x} cause={:?}",
                msg.interface,
                msg.msg_type,
                msg.teid,
                msg.cause
            );
            Ok(())
        }
        SgwOutput::UserPlane {
            interface,
            teid,
            addr,
            pkt,
        } => {
            let iface = match interface {
                Interface::S1u => &ctx.s1u,
                Interface::S5u => &ctx.s5u,
                other => {
                    log::error!("User-plane packet on control interface {:?}", other);
                    return Ok(());
                }
            };
            let Some(sock) = iface.sock.as_ref() else {
                log::warn!("{:?} socket not open, packet dropped", interface);
                return Ok(());
            };
            let frame = encode_gpdu(*teid, pkt);
            let peer = SocketAddr::V4(SocketAddrV4::new(*addr, GTPV1_U_UDP_PORT));
            sock.send_to(&frame, peer).map(|_| ())
        }
    }
}

// ============================================================================
// Downlink data path
// ============================================================================

/// What happened to a packet arriving from the PGW
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownlinkAction {
    /// No bearer owns the S5-U TEID
    UnknownTeid,
    /// UE connected: send toward the eNB
    Forward(SgwOutput),
    /// UE idle: packet held. The first packet of an idle period also
    /// produces a Downlink Data Notification for the MME.
    Buffered { notification: Option<SgwOutput> },
    /// Buffer full, newest packet rejected
    Dropped,
}

impl DownlinkAction {
    pub fn into_outputs(self) -> Vec<SgwOutput> {
        match self {
            DownlinkAction::Forward(output) => vec![output],
            DownlinkAction::Buffered {
                notification: Some(output),
            } => vec![output],
            _ => Vec::new(),
        }
    }
}

/// Route a downlink packet received on S5-U
pub fn handle_downlink_packet(ctx: &mut SgwContext, sgw_s5u_teid: u32, pkt: Bytes) -> DownlinkAction {
    let Some(bearer) = ctx.bearer_find_by_sgw_s5u_teid_mut(sgw_s5u_teid) else {
        log::warn!("Unknown SGW-S5U-TEID[{:#x}], packet discarded", sgw_s5u_teid);
        return DownlinkAction::UnknownTeid;
    };
    let bearer_index = bearer.index();

    // No eNB tunnel means the UE has to be paged first
    if bearer.enb_s1u().is_none() {
        bearer.buffer.enter_idle();
    }

    match bearer.buffer.push(pkt) {
        PushOutcome::Forward(pkt) => match bearer.enb_s1u() {
            Some((teid, addr)) => DownlinkAction::Forward(SgwOutput::UserPlane {
                interface: Interface::S1u,
                teid,
                addr,
                pkt,
            }),
            None => DownlinkAction::Dropped,
        },
        PushOutcome::Buffered { notify: true } => DownlinkAction::Buffered {
            notification: send_downlink_data_notification(ctx, bearer_index),
        },
        PushOutcome::Buffered { notify: false } => DownlinkAction::Buffered { notification: None },
        PushOutcome::Dropped => DownlinkAction::Dropped,
    }
}

/// Build the Downlink Data Notification for a bearer, mark it sent and arm
/// the buffer expiry timer.
pub fn send_downlink_data_notification(
    ctx: &mut SgwContext,
    bearer_index: u32,
) -> Option<SgwOutput> {
    let bearer = ctx.bearer_find(bearer_index)?;
    let (ebi, sess_index) = (bearer.id, bearer.sess_index());
    let mme_s11_teid = ctx.sess_find(sess_index)?.mme_s11_teid;

    let mut msg = GtpMessage::new(
        Interface::S11,
        gtp_type::DOWNLINK_DATA_NOTIFICATION,
        mme_s11_teid,
    );
    msg.sqn = Some(ctx.xact_ctx.next_sqn());
    msg.bearer_contexts.push(BearerContext::with_ebi(ebi));

    if let Some(bearer) = ctx.bearer_find_mut(bearer_index) {
        bearer.buffer.notification_sent();
    }
    let expiry = ctx.buffer_expiry();
    ctx.timer_mgr
        .start(SgwTimerId::BufferExpiry, bearer_index, expiry);

    log::info!(
        "Downlink Data Notification MME_S11_TEID[{}] EBI[{}]",
        mme_s11_teid,
        ebi
    );
    Some(SgwOutput::Gtp(msg))
}

/// Paging done: release held packets toward the eNB in arrival order
pub fn flush_downlink_buffer(ctx: &mut SgwContext, bearer_index: u32) -> Vec<SgwOutput> {
    ctx.timer_mgr.stop(SgwTimerId::BufferExpiry, bearer_index);

    let Some(bearer) = ctx.bearer_find_mut(bearer_index) else {
        return Vec::new();
    };
    let Some((teid, addr)) = bearer.enb_s1u() else {
        return Vec::new();
    };

    let pkts = bearer.buffer.flush();
    if !pkts.is_empty() {
        log::info!("Flushing {} buffered packets for bearer {}", pkts.len(), bearer_index);
    }
    pkts.into_iter()
        .map(|pkt| SgwOutput::UserPlane {
            interface: Interface::S1u,
            teid,
            addr,
            pkt,
        })
        .collect()
}

/// Paging failed or timed out: drop held packets and re-arm the
/// notification. Returns the number of packets discarded.
pub fn discard_downlink_buffer(ctx: &mut SgwContext, bearer_index: u32) -> usize {
    ctx.timer_mgr.stop(SgwTimerId::BufferExpiry, bearer_index);

    let Some(bearer) = ctx.bearer_find_mut(bearer_index) else {
        return 0;
    };
    let discarded = bearer.buffer.discard();
    if discarded > 0 {
        log::warn!("Discarded {} buffered packets for bearer {}", discarded, bearer_index);
    }
    discarded
}

// ============================================================================
// Uplink data path
// ============================================================================

/// Relay an uplink packet received on S1-U to the PGW. `None` when no bearer
/// owns the TEID or its S5-U tunnel is not set up yet.
pub fn handle_uplink_packet(ctx: &SgwContext, sgw_s1u_teid: u32, pkt: Bytes) -> Option<SgwOutput> {
    let Some(bearer) = ctx.bearer_find_by_sgw_s1u_teid(sgw_s1u_teid) else {
        log::warn!("Unknown SGW-S1U-TEID[{:#x}], packet discarded", sgw_s1u_teid);
        return None;
    };
    let Some((teid, addr)) = bearer.pgw_s5u() else {
        log::warn!(
            "No PGW-S5U tunnel for bearer {}, packet discarded",
            bearer.index()
        );
        return None;
    };

    Some(SgwOutput::UserPlane {
        interface: Interface::S5u,
        teid,
        addr,
        pkt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DlState, MAX_NUM_BUFFER_PKT};
    use crate::context::bcd_to_buffer;
    use crate::context::tests::test_context;

    fn connected_bearer(ctx: &mut SgwContext) -> u32 {
        let sess = ctx
            .sess_add(&bcd_to_buffer("001010123456789"), "internet", 5)
            .unwrap();
        sess.mme_s11_teid = 0x77;
        let sess_index = sess.index();
        let bearer = ctx.bearer_find_by_id_mut(sess_index, 5).unwrap();
        bearer.enb_s1u_teid = 0x1000;
        bearer.enb_s1u_addr = Some(Ipv4Addr::new(10, 0, 0, 9));
        bearer.index()
    }

    #[test]
    fn test_gpdu_framing() {
        let frame = encode_gpdu(0x1234, b"hello");
        assert_eq!(frame.len(), GTPV1U_HEADER_LEN + 5);
        assert_eq!(frame[0], 0x30);
        assert_eq!(frame[1], 0xff);

        let (teid, payload) = decode_gpdu(frame).unwrap();
        assert_eq!(teid, 0x1234);
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn test_decode_gpdu_with_extension_header() {
        // S flag and one PDU session container (type 0x85), 4 octets
        let raw: &[u8] = &[
            0x36, 0xff, 0x00, 0x0b, 0x00, 0x00, 0x00, 0x05, // header, length 11
            0x00, 0x00, 0x00, 0x85, // sqn, npdu, next ext
            0x01, 0x00, 0x01, 0x00, // ext header, no next
            b'a', b'b', b'c',
        ];
        let (teid, payload) = decode_gpdu(Bytes::from_static(raw)).unwrap();
        assert_eq!(teid, 5);
        assert_eq!(&payload[..], b"abc");
    }

    #[test]
    fn test_decode_rejects_non_gpdu() {
        // Echo Request
        let raw: &[u8] = &[0x32, 0x01, 0x00, 0x04, 0, 0, 0, 0, 0, 1, 0, 0];
        assert!(decode_gpdu(Bytes::from_static(raw)).is_none());
        assert!(decode_gpdu(Bytes::from_static(&[0x30, 0xff])).is_none());
    }

    #[test]
    fn test_xact_sqn_wraps() {
        let mut xact = GtpXactCtx { next_sqn: GTP_SQN_MASK };
        assert_eq!(xact.next_sqn(), GTP_SQN_MASK);
        assert_eq!(xact.next_sqn(), 0);
    }

    #[test]
    fn test_downlink_unknown_teid() {
        let (mut ctx, _rx) = test_context(4, 16);
        let action = handle_downlink_packet(&mut ctx, 42, Bytes::from_static(b"x"));
        assert_eq!(action, DownlinkAction::UnknownTeid);
    }

    #[test]
    fn test_downlink_forward_when_connected() {
        let (mut ctx, _rx) = test_context(4, 16);
        let bearer_index = connected_bearer(&mut ctx);

        let action = handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"x"));
        match action {
            DownlinkAction::Forward(SgwOutput::UserPlane { interface, teid, .. }) => {
                assert_eq!(interface, Interface::S1u);
                assert_eq!(teid, 0x1000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_downlink_idle_notifies_once() {
        let (mut ctx, _rx) = test_context(4, 16);
        let bearer_index = connected_bearer(&mut ctx);
        ctx.bearer_find_mut(bearer_index).unwrap().release_access();

        let first = handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"1"));
        let DownlinkAction::Buffered {
            notification: Some(SgwOutput::Gtp(ddn)),
        } = first
        else {
            panic!("expected notification, got {first:?}");
        };
        assert_eq!(ddn.msg_type, gtp_type::DOWNLINK_DATA_NOTIFICATION);
        assert_eq!(ddn.teid, 0x77);
        assert_eq!(ddn.bearer_contexts[0].ebi, 5);
        assert!(ctx
            .timer_mgr
            .is_running(SgwTimerId::BufferExpiry, bearer_index));

        let second = handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"2"));
        assert_eq!(second, DownlinkAction::Buffered { notification: None });

        let bearer = ctx.bearer_find(bearer_index).unwrap();
        assert_eq!(bearer.buffer.state(), DlState::NotificationSent);
        assert_eq!(bearer.buffer.len(), 2);
    }

    #[test]
    fn test_downlink_buffer_overflow_drops_newest() {
        let (mut ctx, _rx) = test_context(4, 16);
        let bearer_index = connected_bearer(&mut ctx);
        ctx.bearer_find_mut(bearer_index).unwrap().release_access();

        for _ in 0..MAX_NUM_BUFFER_PKT {
            handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"p"));
        }
        let action = handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"late"));
        assert_eq!(action, DownlinkAction::Dropped);

        let bearer = ctx.bearer_find(bearer_index).unwrap();
        assert_eq!(bearer.buffer.len(), MAX_NUM_BUFFER_PKT);
        assert_eq!(bearer.buffer.num_dropped(), 1);
    }

    #[test]
    fn test_flush_after_paging() {
        let (mut ctx, _rx) = test_context(4, 16);
        let bearer_index = connected_bearer(&mut ctx);
        ctx.bearer_find_mut(bearer_index).unwrap().release_access();
        handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"1"));
        handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"2"));

        // eNB tunnel restored
        let bearer = ctx.bearer_find_mut(bearer_index).unwrap();
        bearer.enb_s1u_teid = 0x2000;
        bearer.enb_s1u_addr = Some(Ipv4Addr::new(10, 0, 0, 10));

        let out = flush_downlink_buffer(&mut ctx, bearer_index);
        let payloads: Vec<Bytes> = out
            .into_iter()
            .map(|o| match o {
                SgwOutput::UserPlane { teid, pkt, .. } => {
                    assert_eq!(teid, 0x2000);
                    pkt
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(payloads, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
        assert!(!ctx.timer_mgr.is_running(SgwTimerId::BufferExpiry, bearer_index));
        assert_eq!(
            ctx.bearer_find(bearer_index).unwrap().buffer.state(),
            DlState::Connected
        );
    }

    #[test]
    fn test_discard_rearms_notification() {
        let (mut ctx, _rx) = test_context(4, 16);
        let bearer_index = connected_bearer(&mut ctx);
        ctx.bearer_find_mut(bearer_index).unwrap().release_access();
        handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"1"));

        assert_eq!(discard_downlink_buffer(&mut ctx, bearer_index), 1);
        assert!(!ctx.timer_mgr.is_running(SgwTimerId::BufferExpiry, bearer_index));

        let again = handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"2"));
        assert!(matches!(
            again,
            DownlinkAction::Buffered { notification: Some(_) }
        ));
    }

    #[test]
    fn test_uplink_unknown_teid() {
        let (ctx, _rx) = test_context(4, 16);
        assert!(handle_uplink_packet(&ctx, 42, Bytes::from_static(b"x")).is_none());
    }

    #[test]
    fn test_uplink_forward_to_pgw() {
        let (mut ctx, _rx) = test_context(4, 16);
        let bearer_index = connected_bearer(&mut ctx);

        // PGW tunnel not known yet
        assert!(handle_uplink_packet(&ctx, bearer_index, Bytes::from_static(b"x")).is_none());

        let bearer = ctx.bearer_find_mut(bearer_index).unwrap();
        bearer.pgw_s5u_teid = 0x5000;
        bearer.pgw_s5u_addr = Some(Ipv4Addr::new(127, 0, 0, 3));

        let out = handle_uplink_packet(&ctx, bearer_index, Bytes::from_static(b"up"));
        assert_eq!(
            out,
            Some(SgwOutput::UserPlane {
                interface: Interface::S5u,
                teid: 0x5000,
                addr: Ipv4Addr::new(127, 0, 0, 3),
                pkt: Bytes::from_static(b"up"),
            })
        );

        // Uplink does not depend on the UE being connected
        ctx.bearer_find_mut(bearer_index).unwrap().release_access();
        assert!(handle_uplink_packet(&ctx, bearer_index, Bytes::from_static(b"up")).is_some());
    }

    #[test]
    fn test_gtp_open_close() {
        let mut conf = crate::config::SgwConfig::default();
        let lo = Ipv4Addr::LOCALHOST;
        conf.sgw.gtpc.s11 = EndpointConf::new(lo, 0);
        conf.sgw.gtpc.s5c = EndpointConf::new(lo, 0);
        conf.sgw.gtpu.s1u = EndpointConf::new(lo, 0);
        conf.sgw.gtpu.s5u = EndpointConf::new(lo, 0);
        let (tx, _rx) = crate::event::EventQueue::create(4);
        let mut ctx = SgwContext::new(&conf, tx);

        gtp_open(&mut ctx).unwrap();
        assert!(ctx.s11.is_open() && ctx.s5u.is_open());
        assert!(gtpu_recv(&ctx.s5u).unwrap().is_none());

        gtp_close(&mut ctx);
        assert!(!ctx.s1u.is_open());
    }
}
