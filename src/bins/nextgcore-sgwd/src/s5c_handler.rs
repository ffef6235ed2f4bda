//! SGW S5-C Handler
//!
//! Handles GTPv2-C messages from the PGW on the S5-C interface.

use crate::context::SgwContext;
use crate::error::{SgwError, SgwResult};
use crate::message::{
    gtp_cause, gtp_type, BearerContext, CreateBearerRequest, CreateSessionResponse,
    DeleteBearerRequest, DeleteSessionResponse, GtpMessage, Interface, SgwOutput,
};

/// Peer TEID to answer an S5-C request on, when the session is known
pub fn pgw_s5c_teid(ctx: &SgwContext, sgw_s5c_teid: u32) -> u32 {
    ctx.sess_find_by_teid(sgw_s5c_teid)
        .map_or(0, |sess| sess.pgw_s5c_teid)
}

fn create_session_response_to_mme(mme_s11_teid: u32, cause: u8) -> SgwOutput {
    SgwOutput::Gtp(
        GtpMessage::new(Interface::S11, gtp_type::CREATE_SESSION_RESPONSE, mme_s11_teid)
            .with_cause(cause),
    )
}

/// Handle Create Session Response from PGW
///
/// On success the PGW tunnels are recorded and the MME receives the SGW S11
/// and S1-U F-TEIDs. On rejection, or when the response cannot be applied,
/// the session is removed and the MME gets the failure cause.
pub fn handle_create_session_response(
    ctx: &mut SgwContext,
    rsp: &CreateSessionResponse,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Create Session Response");

    let sess = ctx
        .sess_find_by_teid(rsp.sgw_s5c_teid)
        .ok_or(SgwError::SessionNotFound(rsp.sgw_s5c_teid))?;
    let (sess_index, mme_s11_teid) = (sess.index(), sess.mme_s11_teid);

    if !gtp_cause::is_accepted(rsp.cause) {
        log::warn!("    PGW rejected session {} [cause={}]", sess_index, rsp.cause);
        ctx.sess_remove(sess_index)?;
        return Ok(vec![create_session_response_to_mme(mme_s11_teid, rsp.cause)]);
    }

    match apply_create_session_response(ctx, sess_index, rsp) {
        Ok(msg) => Ok(vec![SgwOutput::Gtp(msg)]),
        Err(e) => {
            log::error!("    Create Session Response for session {}: {}", sess_index, e);
            ctx.sess_remove(sess_index)?;
            Ok(vec![create_session_response_to_mme(mme_s11_teid, e.cause())])
        }
    }
}

fn apply_create_session_response(
    ctx: &mut SgwContext,
    sess_index: u32,
    rsp: &CreateSessionResponse,
) -> SgwResult<GtpMessage> {
    let pgw_f_teid = rsp
        .sender_f_teid
        .ok_or(SgwError::MandatoryIeMissing("PGW S5C F-TEID"))?;
    if rsp.bearer_contexts.is_empty() {
        return Err(SgwError::MandatoryIeMissing("Bearer Context"));
    }

    let mut bearers = Vec::with_capacity(rsp.bearer_contexts.len());
    for bc in &rsp.bearer_contexts {
        let s5u_pgw = bc
            .s5u_pgw
            .ok_or(SgwError::MandatoryIeMissing("PGW S5U F-TEID"))?;
        let bearer = ctx
            .bearer_find_by_id(sess_index, bc.ebi)
            .ok_or(SgwError::EbiNotFound {
                sess_index,
                ebi: bc.ebi,
            })?;
        bearers.push((bearer.index(), s5u_pgw));
    }

    let sess = ctx
        .sess_find_mut(sess_index)
        .ok_or(SgwError::SessionNotFound(sess_index))?;
    sess.pgw_s5c_teid = pgw_f_teid.teid;
    sess.pgw_s5c_addr = Some(pgw_f_teid.addr);
    if let Some(paa) = &rsp.paa {
        sess.pdn.paa = paa.clone();
    }
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
        Interface::S11,
        gtp_type::CREATE_SESSION_RESPONSE,
        sess.mme_s11_teid,
    )
    .with_cause(rsp.cause);
    msg.sender_f_teid = Some(sess.sgw_s11_f_teid());

    for (bearer_index, s5u_pgw) in bearers {
        let Some(bearer) = ctx.bearer_find_mut(bearer_index) else {
            continue;
        };
        bearer.pgw_s5u_teid = s5u_pgw.teid;
        bearer.pgw_s5u_addr = Some(s5u_pgw.addr);
        log::info!(
            "    SGW_S5U_TEID[{:#x}] PGW_S5U_TEID[{:#x}]",
            bearer.sgw_s5u_teid(),
            bearer.pgw_s5u_teid
        );

        msg.bearer_contexts.push(BearerContext {
            ebi: bearer.id,
            cause: Some(gtp_cause::REQUEST_ACCEPTED),
            s1u_sgw: Some(bearer.sgw_s1u_f_teid()),
            ..Default::default()
        });
    }

    Ok(msg)
}

/// Handle Delete Session Response from PGW
pub fn handle_delete_session_response(
    ctx: &mut SgwContext,
    rsp: &DeleteSessionResponse,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Delete Session Response");

    let sess = ctx
        .sess_find_by_teid(rsp.sgw_s5c_teid)
        .ok_or(SgwError::SessionNotFound(rsp.sgw_s5c_teid))?;
    let (sess_index, mme_s11_teid) = (sess.index(), sess.mme_s11_teid);

    if !gtp_cause::is_accepted(rsp.cause) {
        log::warn!("    PGW answered cause {}, releasing anyway", rsp.cause);
    }
    ctx.sess_remove(sess_index)?;

    let rsp = GtpMessage::new(Interface::S11, gtp_type::DELETE_SESSION_RESPONSE, mme_s11_teid)
        .with_cause(rsp.cause);
    Ok(vec![SgwOutput::Gtp(rsp)])
}

/// Handle Create Bearer Request from PGW
///
/// Dedicated bearers are created with EBI 0; the MME assigns the real EBI in
/// its Create Bearer Response.
pub fn handle_create_bearer_request(
    ctx: &mut SgwContext,
    req: &CreateBearerRequest,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Create Bearer Request");

    let sess = ctx
        .sess_find_by_teid(req.sgw_s5c_teid)
        .ok_or(SgwError::SessionNotFound(req.sgw_s5c_teid))?;
    let (sess_index, mme_s11_teid) = (sess.index(), sess.mme_s11_teid);

    if ctx.bearer_find_by_id(sess_index, req.linked_ebi).is_none() {
        return Err(SgwError::EbiNotFound {
            sess_index,
            ebi: req.linked_ebi,
        });
    }
    if req.bearer_contexts.is_empty() {
        return Err(SgwError::MandatoryIeMissing("Bearer Context"));
    }
    let s5u_pgw_list = req
        .bearer_contexts
        .iter()
        .map(|bc| bc.s5u_pgw.ok_or(SgwError::MandatoryIeMissing("PGW S5U F-TEID")))
        .collect::<SgwResult<Vec<_>>>()?;

    let mut fwd = GtpMessage::new(Interface::S11, gtp_type::CREATE_BEARER_REQUEST, mme_s11_teid);
    fwd.linked_ebi = Some(req.linked_ebi);

    let mut added = Vec::with_capacity(s5u_pgw_list.len());
    for s5u_pgw in s5u_pgw_list {
        let bearer = match ctx.bearer_add(sess_index, 0) {
            Ok(bearer) => bearer,
            Err(e) => {
                for bearer_index in added {
                    let _ = ctx.bearer_remove(bearer_index);
                }
                return Err(e);
            }
        };
        bearer.pgw_s5u_teid = s5u_pgw.teid;
        bearer.pgw_s5u_addr = Some(s5u_pgw.addr);
        log::info!(
            "    SGW_S1U_TEID[{:#x}] PGW_S5U_TEID[{:#x}]",
            bearer.sgw_s1u_teid(),
            bearer.pgw_s5u_teid
        );

        added.push(bearer.index());
        fwd.bearer_contexts.push(BearerContext {
            ebi: 0,
            s1u_sgw: Some(bearer.sgw_s1u_f_teid()),
            ..Default::default()
        });
    }

    Ok(vec![SgwOutput::Gtp(fwd)])
}

/// Handle Delete Bearer Request from PGW
///
/// Relayed to the MME; bearers are released when its response arrives.
pub fn handle_delete_bearer_request(
    ctx: &mut SgwContext,
    req: &DeleteBearerRequest,
) -> SgwResult<Vec<SgwOutput>> {
    log::info!("Delete Bearer Request");

    let sess = ctx
        .sess_find_by_teid(req.sgw_s5c_teid)
        .ok_or(SgwError::SessionNotFound(req.sgw_s5c_teid))?;
    let (sess_index, mme_s11_teid) = (sess.index(), sess.mme_s11_teid);

    let mut fwd = GtpMessage::new(Interface::S11, gtp_type::DELETE_BEARER_REQUEST, mme_s11_teid);

    if let Some(linked_ebi) = req.linked_ebi {
        let default_ebi = ctx.default_bearer_in_sess(sess_index).map(|b| b.id);
        if default_ebi != Some(linked_ebi) {
            return Err(SgwError::EbiNotFound {
                sess_index,
                ebi: linked_ebi,
            });
        }
        fwd.linked_ebi = Some(linked_ebi);
        return Ok(vec![SgwOutput::Gtp(fwd)]);
    }

    if req.ebis.is_empty() {
        return Err(SgwError::MandatoryIeMissing("EPS Bearer ID"));
    }
    for &ebi in &req.ebis {
        if ctx.bearer_find_by_id(sess_index, ebi).is_none() {
            return Err(SgwError::EbiNotFound { sess_index, ebi });
        }
        fwd.bearer_contexts.push(BearerContext::with_ebi(ebi));
    }

    Ok(vec![SgwOutput::Gtp(fwd)])
}
