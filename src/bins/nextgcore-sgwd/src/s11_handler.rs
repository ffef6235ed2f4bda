//! SGW S11 Handler
//!
//! Handles GTPv2-C messages from the MME on the S11 interface.

use crate::context::SgwContext;
use crate::error::{SgwError, SgwResult};
use crate::gtp_path;
use crate::message::{
    gtp_cause, gtp_type, BearerContext, CreateBearerResponse, CreateSessionRequest,
    DeleteBearerResponse, DeleteSessionRequest, DownlinkDataNotificationAck, FTeid, GtpMessage,
    Interface, ModifyBearerRequest, ReleaseAccessBearersRequest, SgwOutput,
};

/// Session index and MME S11 TEID for an S11 TEID
fn sess_by_s11_teid(ctx: &SgwContext, sgw_s11_teid: u32) -> SgwResult<(u32, u32)> {
    let sess = ctx
        .sess_find_by_teid(sgw_s11_teid)
        .ok_or(SgwError::SessionNotFound(sgw_s11_teid))?;
    Ok((sess.index(), sess.mme_s11_teid))
}

/// Peer TEID to answer an S11 request on, when the session is known
pub fn mme_s11_teid(ctx: &SgwContext, sgw_s11_teid: u32) -> u32 {
    ctx.sess_find_by_teid(sgw_s11_teid)
        .map_or(0, |sess| sess.mme_s11_teid)
}

/// Handle Create Session Request from MME
///
/// Creates (or reuses) the IMSI+APN session and relays the request to the
/// PGW with the SGW S5-C and S5-U F-TEIDs.
pub fn handle_create_session_request(
    ctx: &mut SgwContext,
    req: &CreateSessionRequest,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Create Session Request");

    let mme_f_teid = req
        .sender_f_teid
        .ok_or(SgwError::MandatoryIeMissing("Sender F-TEID for Control Plane"))?;

    let sess = ctx.sess_find_or_add_by_message(req)?;
    sess.mme_s11_teid = mme_f_teid.teid;
    sess.mme_s11_addr = Some(mme_f_teid.addr);
    sess.pdn.pdn_type = req.pdn_type;
    sess.pdn.paa = req.paa.clone();
    sess.pdn.ambr = req.ambr;

    log::info!("    IMSI[{}] APN[{}]", sess.imsi_bcd(), sess.apn());
    log::info!(
        "    MME_S11_TEID[{}] SGW_S11_TEID[{}]",
        sess.mme_s11_teid,
        sess.sgw_s11_teid()
    );

    let sess_index = sess.index();
    let mut msg = GtpMessage::new(Interface::S5c, gtp_type::CREATE_SESSION_REQUEST, 0);
    msg.sender_f_teid = Some(sess.sgw_s5c_f_teid());
    msg.bearer_contexts = ctx
        .bearers_in_sess(sess_index)
        .map(|bearer| BearerContext {
            ebi: bearer.id,
            s5u_sgw: Some(bearer.sgw_s5u_f_teid()),
            ..Default::default()
        })
        .collect();

    Ok(vec![SgwOutput::Gtp(msg)])
}

/// Handle Modify Bearer Request from MME
///
/// Installs the eNB S1-U tunnel on each listed bearer. Bearers that were
/// buffering release their packets toward the eNB.
pub fn handle_modify_bearer_request(
    ctx: &mut SgwContext,
    req: &ModifyBearerRequest,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Modify Bearer Request");

    let (sess_index, mme_s11_teid) = sess_by_s11_teid(ctx, req.sgw_s11_teid)?;
    if req.bearer_contexts.is_empty() {
        return Err(SgwError::MandatoryIeMissing("Bearer Context"));
    }

    // Validate everything before touching any bearer
    let mut updates = Vec::with_capacity(req.bearer_contexts.len());
    for bc in &req.bearer_contexts {
        let enb = bc
            .s1u_enb
            .ok_or(SgwError::MandatoryIeMissing("S1-U eNodeB F-TEID"))?;
        let bearer = ctx
            .bearer_find_by_id(sess_index, bc.ebi)
            .ok_or(SgwError::EbiNotFound {
                sess_index,
                ebi: bc.ebi,
            })?;
        updates.push((bearer.index(), enb));
    }

    let mut rsp = GtpMessage::new(Interface::S11, gtp_type::MODIFY_BEARER_RESPONSE, mme_s11_teid)
        .with_cause(gtp_cause::REQUEST_ACCEPTED);
    let mut pkts = Vec::new();

    for (bearer_index, enb) in updates {
        let Some(bearer) = ctx.bearer_find_mut(bearer_index) else {
            continue;
        };
        bearer.enb_s1u_teid = enb.teid;
        bearer.enb_s1u_addr = Some(enb.addr);
        log::info!(
            "    ENB_S1U_TEID[{}] SGW_S1U_TEID[{}]",
            bearer.enb_s1u_teid,
            bearer.sgw_s1u_teid()
        );

        rsp.bearer_contexts.push(BearerContext {
            ebi: bearer.id,
            cause: Some(gtp_cause::REQUEST_ACCEPTED),
            s1u_sgw: Some(bearer.sgw_s1u_f_teid()),
            ..Default::default()
        });

        if bearer.buffer.is_buffering() {
            pkts.extend(gtp_path::flush_downlink_buffer(ctx, bearer_index));
        }
    }

    let mut out = vec![SgwOutput::Gtp(rsp)];
    out.extend(pkts);
    Ok(out)
}

/// Handle Delete Session Request from MME
///
/// The session stays until the PGW confirms.
pub fn handle_delete_session_request(
    ctx: &mut SgwContext,
    req: &DeleteSessionRequest,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Delete Session Request");

    let sess = ctx
        .sess_find_by_teid(req.sgw_s11_teid)
        .ok_or(SgwError::SessionNotFound(req.sgw_s11_teid))?;
    log::info!(
        "    MME_S11_TEID[{}] SGW_S11_TEID[{}]",
        sess.mme_s11_teid,
        sess.sgw_s11_teid()
    );
    log::info!(
        "    SGW_S5C_TEID[{:#x}] PGW_S5C_TEID[{:#x}]",
        sess.sgw_s5c_teid(),
        sess.pgw_s5c_teid
    );

    let mut msg = GtpMessage::new(
        Interface::S5c,
        gtp_type::DELETE_SESSION_REQUEST,
        sess.pgw_s5c_teid,
    );
    msg.linked_ebi = ctx.default_bearer_in_sess(sess.index()).map(|b| b.id);

    Ok(vec![SgwOutput::Gtp(msg)])
}

/// Handle Release Access Bearers Request from MME
///
/// The UE went idle: every bearer loses its eNB tunnel and starts buffering.
pub fn handle_release_access_bearers_request(
    ctx: &mut SgwContext,
    req: &ReleaseAccessBearersRequest,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Release Access Bearers Request");

    let (sess_index, mme_s11_teid) = sess_by_s11_teid(ctx, req.sgw_s11_teid)?;
    let bearer_ids: Vec<u32> = ctx.bearers_in_sess(sess_index).map(|b| b.index()).collect();
    for bearer_index in bearer_ids {
        if let Some(bearer) = ctx.bearer_find_mut(bearer_index) {
            bearer.release_access();
        }
    }

    let rsp = GtpMessage::new(
        Interface::S11,
        gtp_type::RELEASE_ACCESS_BEARERS_RESPONSE,
        mme_s11_teid,
    )
    .with_cause(gtp_cause::REQUEST_ACCEPTED);

    Ok(vec![SgwOutput::Gtp(rsp)])
}

/// Handle Downlink Data Notification Acknowledge from MME
///
/// A rejected acknowledgement means the UE will not be paged; whatever the
/// session buffered is dropped.
pub fn handle_downlink_data_notification_ack(
    ctx: &mut SgwContext,
    ack: &DownlinkDataNotificationAck,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Downlink Data Notification Acknowledge");

    let (sess_index, _) = sess_by_s11_teid(ctx, ack.sgw_s11_teid)?;
    if gtp_cause::is_accepted(ack.cause) {
        return Ok(Vec::new());
    }

    log::warn!("    Paging rejected [cause={}]", ack.cause);
    let bearer_ids: Vec<u32> = ctx.bearers_in_sess(sess_index).map(|b| b.index()).collect();
    for bearer_index in bearer_ids {
        gtp_path::discard_downlink_buffer(ctx, bearer_index);
    }

    Ok(Vec::new())
}

/// Outcome of one bearer context in a Create Bearer Response
enum BearerActivation {
    Accept { bearer_index: u32, ebi: u8, enb: FTeid },
    Reject { bearer_index: u32, ebi: u8, cause: u8 },
}

/// Check every bearer context of a Create Bearer Response against the
/// session before anything is applied
fn plan_create_bearer_response(
    ctx: &SgwContext,
    sess_index: u32,
    rsp: &CreateBearerResponse,
) -> SgwResult<Vec<BearerActivation>> {
    let mut plan = Vec::with_capacity(rsp.bearer_contexts.len());
    for bc in &rsp.bearer_contexts {
        let s1u_sgw = bc
            .s1u_sgw
            .ok_or(SgwError::MandatoryIeMissing("S1-U SGW F-TEID"))?;
        let bearer_index = ctx
            .bearer_find_by_sgw_s1u_teid(s1u_sgw.teid)
            .filter(|bearer| bearer.sess_index() == sess_index)
            .map(|bearer| bearer.index())
            .ok_or(SgwError::BearerNotFound(s1u_sgw.teid))?;

        let cause = bc.cause.unwrap_or(rsp.cause);
        if gtp_cause::is_accepted(rsp.cause) && gtp_cause::is_accepted(cause) {
            let enb = bc
                .s1u_enb
                .ok_or(SgwError::MandatoryIeMissing("S1-U eNodeB F-TEID"))?;
            plan.push(BearerActivation::Accept {
                bearer_index,
                ebi: bc.ebi,
                enb,
            });
        } else {
            plan.push(BearerActivation::Reject {
                bearer_index,
                ebi: bc.ebi,
                cause,
            });
        }
    }
    Ok(plan)
}

/// Drop every bearer of a session still waiting for its EBI
fn remove_pending_bearers(ctx: &mut SgwContext, sess_index: u32) -> SgwResult<()> {
    let pending: Vec<u32> = ctx
        .bearers_in_sess(sess_index)
        .filter(|bearer| bearer.id == 0)
        .map(|bearer| bearer.index())
        .collect();
    for bearer_index in pending {
        log::warn!("    Pending bearer {} removed", bearer_index);
        ctx.bearer_remove(bearer_index)?;
    }
    Ok(())
}

/// Handle Create Bearer Response from MME
///
/// Completes dedicated bearer activation. Accepted bearers get their EBI and
/// eNB tunnel, rejected ones are removed. The response is relayed to the PGW.
/// A malformed response changes no bearer and removes every bearer of the
/// session still pending activation.
pub fn handle_create_bearer_response(
    ctx: &mut SgwContext,
    rsp: &CreateBearerResponse,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Create Bearer Response");

    let sess = ctx
        .sess_find_by_teid(rsp.sgw_s11_teid)
        .ok_or(SgwError::SessionNotFound(rsp.sgw_s11_teid))?;
    let (sess_index, pgw_s5c_teid) = (sess.index(), sess.pgw_s5c_teid);

    let plan = match plan_create_bearer_response(ctx, sess_index, rsp) {
        Ok(plan) => plan,
        Err(e) => {
            remove_pending_bearers(ctx, sess_index)?;
            return Err(e);
        }
    };

    let mut fwd = GtpMessage::new(Interface::S5c, gtp_type::CREATE_BEARER_RESPONSE, pgw_s5c_teid)
        .with_cause(rsp.cause);

    for activation in plan {
        match activation {
            BearerActivation::Accept {
                bearer_index,
                ebi,
                enb,
            } => {
                let Some(bearer) = ctx.bearer_find_mut(bearer_index) else {
                    continue;
                };
                bearer.id = ebi;
                bearer.enb_s1u_teid = enb.teid;
                bearer.enb_s1u_addr = Some(enb.addr);
                log::info!(
                    "    EBI[{}] ENB_S1U_TEID[{}] SGW_S1U_TEID[{}]",
                    bearer.id,
                    bearer.enb_s1u_teid,
                    bearer.sgw_s1u_teid()
                );
                fwd.bearer_contexts.push(BearerContext {
                    ebi,
                    cause: Some(gtp_cause::REQUEST_ACCEPTED),
                    s5u_sgw: Some(bearer.sgw_s5u_f_teid()),
                    ..Default::default()
                });
            }
            BearerActivation::Reject {
                bearer_index,
                ebi,
                cause,
            } => {
                log::warn!("    Bearer {} rejected [cause={}]", bearer_index, cause);
                let s5u_sgw = ctx.bearer_find(bearer_index).map(|b| b.sgw_s5u_f_teid());
                ctx.bearer_remove(bearer_index)?;
                fwd.bearer_contexts.push(BearerContext {
                    ebi,
                    cause: Some(cause),
                    s5u_sgw,
                    ..Default::default()
                });
            }
        }
    }

    Ok(vec![SgwOutput::Gtp(fwd)])
}

/// Handle Delete Bearer Response from MME
///
/// The PGW already decided to release, so bearers go regardless of cause.
/// A linked EBI releases the whole session.
pub fn handle_delete_bearer_response(
    ctx: &mut SgwContext,
    rsp: &DeleteBearerResponse,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Delete Bearer Response");

    let sess = ctx
        .sess_find_by_teid(rsp.sgw_s11_teid)
        .ok_or(SgwError::SessionNotFound(rsp.sgw_s11_teid))?;
    let (sess_index, pgw_s5c_teid) = (sess.index(), sess.pgw_s5c_teid);

    let mut fwd = GtpMessage::new(Interface::S5c, gtp_type::DELETE_BEARER_RESPONSE, pgw_s5c_teid)
        .with_cause(rsp.cause);

    if let Some(linked_ebi) = rsp.linked_ebi {
        fwd.linked_ebi = Some(linked_ebi);
        ctx.sess_remove(sess_index)?;
        return Ok(vec![SgwOutput::Gtp(fwd)]);
    }

    for bc in &rsp.bearer_contexts {
        match ctx.bearer_find_by_id(sess_index, bc.ebi).map(|b| b.index()) {
            Some(bearer_index) => {
                ctx.bearer_remove(bearer_index)?;
            }
            None => log::warn!("    Unknown EBI[{}] in Delete Bearer Response", bc.ebi),
        }
        fwd.bearer_contexts.push(BearerContext {
            ebi: bc.ebi,
            cause: bc.cause,
            ..Default::default()
        });
    }

    Ok(vec![SgwOutput::Gtp(fwd)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DlState;
    use crate::context::bcd_to_buffer;
    use crate::context::tests::test_context;
    use bytes::Bytes;
    use std::net::Ipv4Addr;

    const MME_ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
    const ENB_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);

    fn csr(imsi: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            imsi: bcd_to_buffer(imsi),
            apn: "internet".to_string(),
            pdn_type: 1,
            sender_f_teid: Some(FTeid::new(10, 0x100, MME_ADDR)),
            bearer_contexts: vec![BearerContext::with_ebi(5)],
            ..Default::default()
        }
    }

    fn gtp(output: &SgwOutput) -> &GtpMessage {
        match output {
            SgwOutput::Gtp(msg) => msg,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn enb_bearer_context(ebi: u8, teid: u32) -> BearerContext {
        BearerContext {
            ebi,
            s1u_enb: Some(FTeid::new(0, teid, ENB_ADDR)),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_session_request_relays_to_pgw() {
        let (mut ctx, _rx) = test_context(4, 16);
        let out = handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        assert_eq!(out.len(), 1);

        let msg = gtp(&out[0]);
        assert_eq!(msg.interface, Interface::S5c);
        assert_eq!(msg.msg_type, gtp_type::CREATE_SESSION_REQUEST);

        let sess = ctx.sess_first().unwrap();
        assert_eq!(sess.mme_s11_teid, 0x100);
        assert_eq!(msg.sender_f_teid.unwrap().teid, sess.sgw_s5c_teid());
        assert_eq!(msg.bearer_contexts.len(), 1);
        assert_eq!(msg.bearer_contexts[0].ebi, 5);
    }

    #[test]
    fn test_create_session_request_reuses_session() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let mut again = csr("001010123456789");
        again.sender_f_teid = Some(FTeid::new(10, 0x200, MME_ADDR));
        handle_create_session_request(&mut ctx, &again).unwrap();

        assert_eq!(ctx.sess_count(), 1);
        assert_eq!(ctx.sess_first().unwrap().mme_s11_teid, 0x200);
    }

    #[test]
    fn test_create_session_request_without_sender_teid() {
        let (mut ctx, _rx) = test_context(4, 16);
        let mut req = csr("001010123456789");
        req.sender_f_teid = None;
        let err = handle_create_session_request(&mut ctx, &req).unwrap_err();
        assert_eq!(err.cause(), gtp_cause::MANDATORY_IE_MISSING);
        assert_eq!(ctx.sess_count(), 0);
    }

    #[test]
    fn test_modify_bearer_request_unknown_session() {
        let (mut ctx, _rx) = test_context(4, 16);
        let req = ModifyBearerRequest {
            sgw_s11_teid: 9,
            bearer_contexts: vec![enb_bearer_context(5, 1)],
        };
        assert_eq!(
            handle_modify_bearer_request(&mut ctx, &req).unwrap_err(),
            SgwError::SessionNotFound(9)
        );
    }

    #[test]
    fn test_modify_bearer_request_flushes_buffer() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();
        let bearer_index = ctx.default_bearer_in_sess(sess_index).unwrap().index();

        // No eNB tunnel yet, so the first packets are held
        gtp_path::handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"a"));
        gtp_path::handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"b"));

        let req = ModifyBearerRequest {
            sgw_s11_teid: sess_index,
            bearer_contexts: vec![enb_bearer_context(5, 0x3000)],
        };
        let out = handle_modify_bearer_request(&mut ctx, &req).unwrap();
        assert_eq!(out.len(), 3);

        let rsp = gtp(&out[0]);
        assert_eq!(rsp.msg_type, gtp_type::MODIFY_BEARER_RESPONSE);
        assert_eq!(rsp.teid, 0x100);
        assert_eq!(rsp.cause, Some(gtp_cause::REQUEST_ACCEPTED));
        assert!(matches!(
            &out[1],
            SgwOutput::UserPlane { teid: 0x3000, pkt, .. } if pkt == &Bytes::from_static(b"a")
        ));

        let bearer = ctx.bearer_find(bearer_index).unwrap();
        assert_eq!(bearer.buffer.state(), DlState::Connected);
        assert!(bearer.buffer.is_empty());
    }

    #[test]
    fn test_modify_bearer_request_unknown_ebi_changes_nothing() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();

        let req = ModifyBearerRequest {
            sgw_s11_teid: sess_index,
            bearer_contexts: vec![enb_bearer_context(5, 0x3000), enb_bearer_context(9, 0x3001)],
        };
        let err = handle_modify_bearer_request(&mut ctx, &req).unwrap_err();
        assert_eq!(err, SgwError::EbiNotFound { sess_index, ebi: 9 });
        assert!(ctx.default_bearer_in_sess(sess_index).unwrap().enb_s1u().is_none());
    }

    #[test]
    fn test_release_access_bearers_then_downlink_notifies() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();
        let req = ModifyBearerRequest {
            sgw_s11_teid: sess_index,
            bearer_contexts: vec![enb_bearer_context(5, 0x3000)],
        };
        handle_modify_bearer_request(&mut ctx, &req).unwrap();

        let out = handle_release_access_bearers_request(
            &mut ctx,
            &ReleaseAccessBearersRequest {
                sgw_s11_teid: sess_index,
            },
        )
        .unwrap();
        assert_eq!(gtp(&out[0]).msg_type, gtp_type::RELEASE_ACCESS_BEARERS_RESPONSE);

        let bearer = ctx.default_bearer_in_sess(sess_index).unwrap();
        assert!(bearer.enb_s1u().is_none());
        assert_eq!(bearer.buffer.state(), DlState::Idle);
    }

    #[test]
    fn test_rejected_ddn_ack_discards() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();
        let bearer_index = ctx.default_bearer_in_sess(sess_index).unwrap().index();
        gtp_path::handle_downlink_packet(&mut ctx, bearer_index, Bytes::from_static(b"a"));

        let accepted = DownlinkDataNotificationAck {
            sgw_s11_teid: sess_index,
            cause: gtp_cause::REQUEST_ACCEPTED,
        };
        handle_downlink_data_notification_ack(&mut ctx, &accepted).unwrap();
        assert_eq!(ctx.bearer_find(bearer_index).unwrap().buffer.len(), 1);

        let rejected = DownlinkDataNotificationAck {
            sgw_s11_teid: sess_index,
            cause: gtp_cause::UNABLE_TO_PAGE_UE,
        };
        handle_downlink_data_notification_ack(&mut ctx, &rejected).unwrap();
        let bearer = ctx.bearer_find(bearer_index).unwrap();
        assert!(bearer.buffer.is_empty());
        assert_eq!(bearer.buffer.state(), DlState::Idle);
    }

    #[test]
    fn test_create_bearer_response_accept_and_reject() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();
        let accepted = ctx.bearer_add(sess_index, 0).unwrap().sgw_s1u_f_teid();
        let rejected = ctx.bearer_add(sess_index, 0).unwrap().sgw_s1u_f_teid();

        let rsp = CreateBearerResponse {
            sgw_s11_teid: sess_index,
            cause: gtp_cause::REQUEST_ACCEPTED,
            bearer_contexts: vec![
                BearerContext {
                    ebi: 6,
                    cause: Some(gtp_cause::REQUEST_ACCEPTED),
                    s1u_enb: Some(FTeid::new(0, 0x4000, ENB_ADDR)),
                    s1u_sgw: Some(accepted),
                    ..Default::default()
                },
                BearerContext {
                    ebi: 7,
                    cause: Some(gtp_cause::NO_RESOURCES_AVAILABLE),
                    s1u_sgw: Some(rejected),
                    ..Default::default()
                },
            ],
        };
        let out = handle_create_bearer_response(&mut ctx, &rsp).unwrap();
        let fwd = gtp(&out[0]);
        assert_eq!(fwd.interface, Interface::S5c);
        assert_eq!(fwd.bearer_contexts.len(), 2);

        let bearer = ctx.bearer_find_by_id(sess_index, 6).unwrap();
        assert_eq!(bearer.enb_s1u(), Some((0x4000, ENB_ADDR)));
        assert!(ctx.bearer_find(rejected.teid).is_none());
        assert_eq!(ctx.bearers_in_sess(sess_index).count(), 2);
    }

    #[test]
    fn test_create_bearer_response_malformed_context_changes_nothing() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();
        let good = ctx.bearer_add(sess_index, 0).unwrap().sgw_s1u_f_teid();
        ctx.bearer_add(sess_index, 0).unwrap();

        let rsp = CreateBearerResponse {
            sgw_s11_teid: sess_index,
            cause: gtp_cause::REQUEST_ACCEPTED,
            bearer_contexts: vec![
                BearerContext {
                    ebi: 6,
                    cause: Some(gtp_cause::REQUEST_ACCEPTED),
                    s1u_enb: Some(FTeid::new(0, 0x4000, ENB_ADDR)),
                    s1u_sgw: Some(good),
                    ..Default::default()
                },
                BearerContext {
                    ebi: 7,
                    cause: Some(gtp_cause::REQUEST_ACCEPTED),
                    s1u_enb: Some(FTeid::new(0, 0x4001, ENB_ADDR)),
                    s1u_sgw: None,
                    ..Default::default()
                },
            ],
        };
        let err = handle_create_bearer_response(&mut ctx, &rsp).unwrap_err();
        assert_eq!(err, SgwError::MandatoryIeMissing("S1-U SGW F-TEID"));

        // Nothing activated, both pending bearers gone, only the default left
        assert!(ctx.bearer_find_by_id(sess_index, 6).is_none());
        let ids: Vec<u8> = ctx.bearers_in_sess(sess_index).map(|b| b.id).collect();
        assert_eq!(ids, vec![5]);
        assert_eq!(ctx.bearer_pool().used(), 1);
    }

    #[test]
    fn test_create_bearer_response_accepted_without_enb_teid() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();
        let pending = ctx.bearer_add(sess_index, 0).unwrap().sgw_s1u_f_teid();

        let rsp = CreateBearerResponse {
            sgw_s11_teid: sess_index,
            cause: gtp_cause::REQUEST_ACCEPTED,
            bearer_contexts: vec![BearerContext {
                ebi: 6,
                s1u_sgw: Some(pending),
                ..Default::default()
            }],
        };
        let err = handle_create_bearer_response(&mut ctx, &rsp).unwrap_err();
        assert_eq!(err.cause(), gtp_cause::MANDATORY_IE_MISSING);
        assert!(ctx.bearer_find(pending.teid).is_none());
        assert_eq!(ctx.bearer_count(), 1);
    }

    #[test]
    fn test_delete_bearer_response() {
        let (mut ctx, _rx) = test_context(4, 16);
        handle_create_session_request(&mut ctx, &csr("001010123456789")).unwrap();
        let sess_index = ctx.sess_first().unwrap().index();
        ctx.bearer_add(sess_index, 6).unwrap();

        let rsp = DeleteBearerResponse {
            sgw_s11_teid: sess_index,
            cause: gtp_cause::REQUEST_ACCEPTED,
            linked_ebi: None,
            bearer_contexts: vec![BearerContext::with_ebi(6)],
        };
        handle_delete_bearer_response(&mut ctx, &rsp).unwrap();
        assert!(ctx.bearer_find_by_id(sess_index, 6).is_none());
        assert!(ctx.bearer_find_by_id(sess_index, 5).is_some());

        let rsp = DeleteBearerResponse {
            sgw_s11_teid: sess_index,
            cause: gtp_cause::REQUEST_ACCEPTED,
            linked_ebi: Some(5),
            bearer_contexts: Vec::new(),
        };
        let out = handle_delete_bearer_response(&mut ctx, &rsp).unwrap();
        assert_eq!(gtp(&out[0]).linked_ebi, Some(5));
        assert_eq!(ctx.sess_count(), 0);
        assert_eq!(ctx.bearer_count(), 0);
    }
}
