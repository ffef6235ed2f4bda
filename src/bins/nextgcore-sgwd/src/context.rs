//! SGW Context Management
//!
//! Session and bearer tables of the Serving Gateway.
//!
//! Sessions and bearers live in arenas addressed by an index taken from a
//! per-category [`IndexPool`]. That index is also the local TEID the SGW
//! advertises: a session's S11 and S5-C TEIDs are both its index, and a
//! bearer's S1-U and S5-U TEIDs are both its index. The TEID accessors below
//! read the index directly, so the two roles cannot drift apart.
//!
//! A session owns the ordered list of its bearer indices; a bearer only keeps
//! its session index for lookup. The first bearer in the list is the default
//! bearer.

use std::collections::hash_map::{self, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buffer::DownlinkBuffer;
use crate::config::SgwConfig;
use crate::error::{SgwError, SgwResult};
use crate::event::EventSender;
use crate::gtp_path::{self, GtpInterface, GtpNode, GtpXactCtx};
use crate::message::{f_teid_interface, Ambr, CreateSessionRequest, FTeid, Paa};
use crate::pool::{IndexPool, PoolKind};
use crate::timer::TimerManager;

// ============================================================================
// Constants
// ============================================================================

/// Maximum IMSI length (TBCD octets)
pub const MAX_IMSI_LEN: usize = 8;
/// Maximum IMSI BCD length
pub const MAX_IMSI_BCD_LEN: usize = 15;
/// Maximum APN length
pub const MAX_APN_LEN: usize = 100;

// ============================================================================
// IMSI helpers
// ============================================================================

/// TBCD octets to digit string. Filler nibbles (0xF) are skipped.
pub fn buffer_to_bcd(buf: &[u8]) -> String {
    let mut result = String::with_capacity(buf.len() * 2);
    for byte in buf {
        let low = byte & 0x0f;
        let high = (byte >> 4) & 0x0f;
        if low < 10 {
            result.push((b'0' + low) as char);
        }
        if high < 10 {
            result.push((b'0' + high) as char);
        }
    }
    result
}

/// Digit string to TBCD octets, padding an odd digit count with 0xF
pub fn bcd_to_buffer(bcd: &str) -> Vec<u8> {
    bcd.as_bytes()
        .chunks(2)
        .map(|pair| {
            let low = pair[0].wrapping_sub(b'0') & 0x0f;
            let high = pair.get(1).map_or(0x0f, |d| d.wrapping_sub(b'0') & 0x0f);
            (high << 4) | low
        })
        .collect()
}

/// IMSI+APN hash key. The IMSI length is stored up front so that no two
/// (IMSI, APN) pairs can produce the same byte string.
fn sess_hash_key(imsi: &[u8], apn: &str) -> SgwResult<Vec<u8>> {
    if imsi.is_empty() || imsi.len() > MAX_IMSI_LEN {
        return Err(SgwError::InvalidImsi(imsi.len()));
    }
    if apn.is_empty() || apn.len() > MAX_APN_LEN {
        return Err(SgwError::InvalidApn(apn.to_string()));
    }

    let mut key = Vec::with_capacity(1 + imsi.len() + apn.len());
    key.push(imsi.len() as u8);
    key.extend_from_slice(imsi);
    key.extend_from_slice(apn.as_bytes());
    Ok(key)
}

// ============================================================================
// Session
// ============================================================================

/// APN configuration of a PDN connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pdn {
    pub apn: String,
    pub pdn_type: u8,
    pub paa: Paa,
    pub ambr: Ambr,
}

/// SGW Session: one PDN connection of one subscriber
#[derive(Debug, Clone)]
pub struct SgwSess {
    index: u32,

    pub sgw_s11_addr: Ipv4Addr,
    /// MME-S11-F-TEID
    pub mme_s11_teid: u32,
    pub mme_s11_addr: Option<Ipv4Addr>,

    pub sgw_s5c_addr: Ipv4Addr,
    /// PGW-S5C-F-TEID
    pub pgw_s5c_teid: u32,
    pub pgw_s5c_addr: Option<Ipv4Addr>,

    imsi: Vec<u8>,
    imsi_bcd: String,

    pub pdn: Pdn,

    hash_key: Vec<u8>,
    bearer_ids: Vec<u32>,
}

impl SgwSess {
    fn new(
        index: u32,
        imsi: &[u8],
        apn: &str,
        hash_key: Vec<u8>,
        sgw_s11_addr: Ipv4Addr,
        sgw_s5c_addr: Ipv4Addr,
    ) -> Self {
        Self {
            index,
            sgw_s11_addr,
            mme_s11_teid: 0,
            mme_s11_addr: None,
            sgw_s5c_addr,
            pgw_s5c_teid: 0,
            pgw_s5c_addr: None,
            imsi: imsi.to_vec(),
            imsi_bcd: buffer_to_bcd(imsi),
            pdn: Pdn {
                apn: apn.to_string(),
                ..Default::default()
            },
            hash_key,
            bearer_ids: Vec::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// SGW-S11-TEID, identical to the session index
    pub fn sgw_s11_teid(&self) -> u32 {
        self.index
    }

    /// SGW-S5C-TEID, identical to the session index
    pub fn sgw_s5c_teid(&self) -> u32 {
        self.index
    }

    pub fn sgw_s11_f_teid(&self) -> FTeid {
        FTeid::new(
            f_teid_interface::S11_S4_SGW_GTP_C,
            self.sgw_s11_teid(),
            self.sgw_s11_addr,
        )
    }

    pub fn sgw_s5c_f_teid(&self) -> FTeid {
        FTeid::new(
            f_teid_interface::S5_S8_SGW_GTP_C,
            self.sgw_s5c_teid(),
            self.sgw_s5c_addr,
        )
    }

    pub fn imsi(&self) -> &[u8] {
        &self.imsi
    }

    pub fn imsi_bcd(&self) -> &str {
        &self.imsi_bcd
    }

    pub fn apn(&self) -> &str {
        &self.pdn.apn
    }

    /// Bearer indices in creation order; the first is the default bearer
    pub fn bearer_ids(&self) -> &[u32] {
        &self.bearer_ids
    }
}

// ============================================================================
// Bearer
// ============================================================================

/// SGW Bearer: one EPS bearer of a session
#[derive(Debug, Clone)]
pub struct SgwBearer {
    index: u32,

    /// EPS Bearer ID, assigned by the MME and unique only within the session
    pub id: u8,

    pub sgw_s1u_addr: Ipv4Addr,
    pub enb_s1u_teid: u32,
    pub enb_s1u_addr: Option<Ipv4Addr>,

    pub sgw_s5u_addr: Ipv4Addr,
    pub pgw_s5u_teid: u32,
    pub pgw_s5u_addr: Option<Ipv4Addr>,

    /// Packets held while the UE is idle
    pub buffer: DownlinkBuffer,

    sess_index: u32,
}

impl SgwBearer {
    fn new(
        index: u32,
        id: u8,
        sess_index: u32,
        sgw_s1u_addr: Ipv4Addr,
        sgw_s5u_addr: Ipv4Addr,
    ) -> Self {
        Self {
            index,
            id,
            sgw_s1u_addr,
            enb_s1u_teid: 0,
            enb_s1u_addr: None,
            sgw_s5u_addr,
            pgw_s5u_teid: 0,
            pgw_s5u_addr: None,
            buffer: DownlinkBuffer::new(),
            sess_index,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// SGW-S1U-TEID, identical to the bearer index
    pub fn sgw_s1u_teid(&self) -> u32 {
        self.index
    }

    /// SGW-S5U-TEID, identical to the bearer index
    pub fn sgw_s5u_teid(&self) -> u32 {
        self.index
    }

    pub fn sgw_s1u_f_teid(&self) -> FTeid {
        FTeid::new(
            f_teid_interface::S1_U_SGW_GTP_U,
            self.sgw_s1u_teid(),
            self.sgw_s1u_addr,
        )
    }

    pub fn sgw_s5u_f_teid(&self) -> FTeid {
        FTeid::new(
            f_teid_interface::S5_S8_SGW_GTP_U,
            self.sgw_s5u_teid(),
            self.sgw_s5u_addr,
        )
    }

    /// Index of the owning session
    pub fn sess_index(&self) -> u32 {
        self.sess_index
    }

    /// eNB S1-U tunnel, present while the UE is connected
    pub fn enb_s1u(&self) -> Option<(u32, Ipv4Addr)> {
        match (self.enb_s1u_teid, self.enb_s1u_addr) {
            (0, _) | (_, None) => None,
            (teid, Some(addr)) => Some((teid, addr)),
        }
    }

    /// PGW S5-U tunnel, present once the PGW answered for this bearer
    pub fn pgw_s5u(&self) -> Option<(u32, Ipv4Addr)> {
        match (self.pgw_s5u_teid, self.pgw_s5u_addr) {
            (0, _) | (_, None) => None,
            (teid, Some(addr)) => Some((teid, addr)),
        }
    }

    /// UE went idle: forget the eNB tunnel and start buffering
    pub fn release_access(&mut self) {
        self.enb_s1u_teid = 0;
        self.enb_s1u_addr = None;
        self.buffer.enter_idle();
    }
}

// ============================================================================
// Session iteration
// ============================================================================

/// Sessions in hash order. Borrowing the context keeps the tables frozen for
/// the lifetime of the iterator.
pub struct SessIter<'a> {
    keys: hash_map::Values<'a, Vec<u8>, u32>,
    sess_list: &'a HashMap<u32, SgwSess>,
}

impl<'a> Iterator for SessIter<'a> {
    type Item = &'a SgwSess;

    fn next(&mut self) -> Option<Self::Item> {
        for index in self.keys.by_ref() {
            if let Some(sess) = self.sess_list.get(index) {
                return Some(sess);
            }
        }
        None
    }
}

// ============================================================================
// SGW Context (Main)
// ============================================================================

/// SGW Context - interfaces, peers, and the session/bearer tables
pub struct SgwContext {
    /// S11 local endpoint (GTP-C toward MME)
    pub s11: GtpInterface,
    /// S5-C local endpoint (GTP-C toward PGW)
    pub s5c: GtpInterface,
    /// S1-U local endpoint (GTP-U toward eNB)
    pub s1u: GtpInterface,
    /// S5-U local endpoint (GTP-U toward PGW)
    pub s5u: GtpInterface,

    /// MME S11 GTP-C node
    pub s11_node: GtpNode,
    /// PGW S5-C GTP-C node
    pub s5c_node: GtpNode,

    /// Command queue feeding the worker
    queue: EventSender,
    /// Timer service
    pub timer_mgr: TimerManager,
    /// GTP transaction context
    pub xact_ctx: GtpXactCtx,

    buffer_expiry: Duration,

    sess_pool: IndexPool,
    bearer_pool: IndexPool,

    /// Session arena (by index)
    sess_list: HashMap<u32, SgwSess>,
    /// IMSI+APN -> session index
    sess_hash: HashMap<Vec<u8>, u32>,
    /// Bearer arena (by index)
    bearer_list: HashMap<u32, SgwBearer>,
}

impl SgwContext {
    /// Create a context ready for signaling
    pub fn new(conf: &SgwConfig, queue: EventSender) -> Self {
        let max_sess = conf.max.sess.min(u32::MAX as u64) as u32;
        let max_bearer = conf.max.bearer.min(u32::MAX as u64) as u32;

        log::info!(
            "SGW context initialized with max {} sessions, {} bearers",
            max_sess,
            max_bearer
        );

        Self {
            s11: GtpInterface::new(conf.sgw.gtpc.s11),
            s5c: GtpInterface::new(conf.sgw.gtpc.s5c),
            s1u: GtpInterface::new(conf.sgw.gtpu.s1u),
            s5u: GtpInterface::new(conf.sgw.gtpu.s5u),
            s11_node: GtpNode::new(conf.mme),
            s5c_node: GtpNode::new(conf.pgw),
            queue,
            timer_mgr: TimerManager::new(),
            xact_ctx: GtpXactCtx::new(),
            buffer_expiry: conf.time.buffer_expiry(),
            sess_pool: IndexPool::new(PoolKind::Session, max_sess),
            bearer_pool: IndexPool::new(PoolKind::Bearer, max_bearer),
            sess_list: HashMap::new(),
            sess_hash: HashMap::new(),
            bearer_list: HashMap::new(),
        }
    }

    /// Tear everything down: sessions (and their bearers and buffers),
    /// timers, and interface sockets.
    pub fn fini(&mut self) {
        self.sess_remove_all();
        self.timer_mgr.clear();
        gtp_path::gtp_close(self);
        log::info!("SGW context finalized");
    }

    /// Command queue identity
    pub fn queue(&self) -> &EventSender {
        &self.queue
    }

    pub fn buffer_expiry(&self) -> Duration {
        self.buffer_expiry
    }

    pub fn sess_pool(&self) -> &IndexPool {
        &self.sess_pool
    }

    pub fn bearer_pool(&self) -> &IndexPool {
        &self.bearer_pool
    }

    // ========================================================================
    // Session Management
    // ========================================================================

    /// Create a session and its default bearer.
    ///
    /// Fails with `DuplicateKey` if the IMSI+APN pair already has a session;
    /// use [`Self::sess_find_or_add_by_message`] for the idempotent path.
    pub fn sess_add(&mut self, imsi: &[u8], apn: &str, ebi: u8) -> SgwResult<&mut SgwSess> {
        let hash_key = sess_hash_key(imsi, apn)?;
        if self.sess_hash.contains_key(&hash_key) {
            return Err(SgwError::DuplicateKey {
                imsi_bcd: buffer_to_bcd(imsi),
                apn: apn.to_string(),
            });
        }

        let index = self.sess_pool.acquire()?;
        let sess = SgwSess::new(
            index,
            imsi,
            apn,
            hash_key.clone(),
            self.s11.addr,
            self.s5c.addr,
        );
        self.sess_hash.insert(hash_key, index);
        self.sess_list.insert(index, sess);

        if let Err(e) = self.bearer_add(index, ebi) {
            log::error!("Default bearer for session {} failed: {}", index, e);
            let _ = self.sess_remove(index);
            return Err(e);
        }

        let sess = self
            .sess_list
            .get_mut(&index)
            .ok_or(SgwError::SessionNotFound(index))?;
        log::info!(
            "[Added] Session IMSI[{}] APN[{}] (index={}, ebi={})",
            sess.imsi_bcd,
            apn,
            index,
            ebi
        );
        Ok(sess)
    }

    /// Remove a session after removing every bearer it owns
    pub fn sess_remove(&mut self, index: u32) -> SgwResult<SgwSess> {
        let bearer_ids = self
            .sess_list
            .get(&index)
            .ok_or(SgwError::SessionNotFound(index))?
            .bearer_ids
            .clone();

        for bearer_index in bearer_ids {
            if let Err(e) = self.bearer_remove(bearer_index) {
                log::error!("Session {} lists a stale bearer: {}", index, e);
            }
        }

        let sess = self
            .sess_list
            .remove(&index)
            .ok_or(SgwError::SessionNotFound(index))?;
        self.sess_hash.remove(&sess.hash_key);
        self.sess_pool.release(index);

        log::info!(
            "[Removed] Session IMSI[{}] APN[{}] (index={})",
            sess.imsi_bcd,
            sess.pdn.apn,
            index
        );
        Ok(sess)
    }

    /// Remove every session
    pub fn sess_remove_all(&mut self) {
        let indices: Vec<u32> = self.sess_list.keys().copied().collect();
        for index in indices {
            let _ = self.sess_remove(index);
        }
    }

    /// Find session by index
    pub fn sess_find(&self, index: u32) -> Option<&SgwSess> {
        self.sess_list.get(&index)
    }

    pub fn sess_find_mut(&mut self, index: u32) -> Option<&mut SgwSess> {
        self.sess_list.get_mut(&index)
    }

    /// Find session by SGW S11 or S5-C TEID.
    ///
    /// Both TEIDs equal the session index, so the result does not tell which
    /// interface the TEID belongs to; the caller knows that already.
    pub fn sess_find_by_teid(&self, teid: u32) -> Option<&SgwSess> {
        self.sess_find(teid)
    }

    pub fn sess_find_by_teid_mut(&mut self, teid: u32) -> Option<&mut SgwSess> {
        self.sess_find_mut(teid)
    }

    /// Exact IMSI+APN lookup
    pub fn sess_find_by_imsi_apn(&self, imsi: &[u8], apn: &str) -> Option<&SgwSess> {
        let key = sess_hash_key(imsi, apn).ok()?;
        let index = self.sess_hash.get(&key)?;
        self.sess_list.get(index)
    }

    /// Existing session for the request's IMSI+APN, or a new one whose
    /// default bearer takes the EBI of the first bearer context.
    pub fn sess_find_or_add_by_message(
        &mut self,
        req: &CreateSessionRequest,
    ) -> SgwResult<&mut SgwSess> {
        if req.imsi.is_empty() {
            return Err(SgwError::MandatoryIeMissing("IMSI"));
        }
        if req.apn.is_empty() {
            return Err(SgwError::MandatoryIeMissing("APN"));
        }
        let ebi = req
            .bearer_contexts
            .first()
            .map(|bearer| bearer.ebi)
            .ok_or(SgwError::MandatoryIeMissing("Bearer Context"))?;

        let key = sess_hash_key(&req.imsi, &req.apn)?;
        if let Some(&index) = self.sess_hash.get(&key) {
            log::debug!("Session IMSI[{}] APN[{}] exists", buffer_to_bcd(&req.imsi), req.apn);
            return self
                .sess_list
                .get_mut(&index)
                .ok_or(SgwError::SessionNotFound(index));
        }

        self.sess_add(&req.imsi, &req.apn, ebi)
    }

    /// Iterate sessions in hash order
    pub fn sess_iter(&self) -> SessIter<'_> {
        SessIter {
            keys: self.sess_hash.values(),
            sess_list: &self.sess_list,
        }
    }

    /// First session in hash order
    pub fn sess_first(&self) -> Option<&SgwSess> {
        self.sess_iter().next()
    }

    pub fn sess_count(&self) -> usize {
        self.sess_list.len()
    }

    // ========================================================================
    // Bearer Management
    // ========================================================================

    /// Add a bearer at the end of the session's bearer list
    pub fn bearer_add(&mut self, sess_index: u32, id: u8) -> SgwResult<&mut SgwBearer> {
        let sess = self
            .sess_list
            .get_mut(&sess_index)
            .ok_or(SgwError::SessionNotFound(sess_index))?;
        let index = self.bearer_pool.acquire()?;
        sess.bearer_ids.push(index);

        let bearer = SgwBearer::new(index, id, sess_index, self.s1u.addr, self.s5u.addr);
        log::debug!(
            "[Added] Bearer EBI[{}] (index={}, sess={})",
            id,
            index,
            sess_index
        );
        Ok(self.bearer_list.entry(index).or_insert(bearer))
    }

    /// Remove a bearer, dropping anything it buffered
    pub fn bearer_remove(&mut self, index: u32) -> SgwResult<SgwBearer> {
        let mut bearer = self
            .bearer_list
            .remove(&index)
            .ok_or(SgwError::BearerNotFound(index))?;

        if let Some(sess) = self.sess_list.get_mut(&bearer.sess_index) {
            sess.bearer_ids.retain(|&id| id != index);
        }

        self.timer_mgr.stop_all_for_bearer(index);
        let discarded = bearer.buffer.discard();
        if discarded > 0 {
            log::warn!("Bearer {} removed with {} buffered packets", index, discarded);
        }

        self.bearer_pool.release(index);

        log::debug!(
            "[Removed] Bearer EBI[{}] (index={}, sess={})",
            bearer.id,
            index,
            bearer.sess_index
        );
        Ok(bearer)
    }

    /// Remove every bearer of a session. Returns how many were removed.
    pub fn bearer_remove_all(&mut self, sess_index: u32) -> SgwResult<usize> {
        let bearer_ids = self
            .sess_list
            .get(&sess_index)
            .ok_or(SgwError::SessionNotFound(sess_index))?
            .bearer_ids
            .clone();

        let mut removed = 0;
        for index in bearer_ids {
            if self.bearer_remove(index).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Find any live bearer by index
    pub fn bearer_find(&self, index: u32) -> Option<&SgwBearer> {
        self.bearer_list.get(&index)
    }

    pub fn bearer_find_mut(&mut self, index: u32) -> Option<&mut SgwBearer> {
        self.bearer_list.get_mut(&index)
    }

    pub fn bearer_find_by_sgw_s1u_teid(&self, sgw_s1u_teid: u32) -> Option<&SgwBearer> {
        self.bearer_find(sgw_s1u_teid)
    }

    pub fn bearer_find_by_sgw_s5u_teid(&self, sgw_s5u_teid: u32) -> Option<&SgwBearer> {
        self.bearer_find(sgw_s5u_teid)
    }

    pub fn bearer_find_by_sgw_s5u_teid_mut(&mut self, sgw_s5u_teid: u32) -> Option<&mut SgwBearer> {
        self.bearer_find_mut(sgw_s5u_teid)
    }

    /// Bearer of a session by EBI
    pub fn bearer_find_by_id(&self, sess_index: u32, id: u8) -> Option<&SgwBearer> {
        self.bearers_in_sess(sess_index).find(|bearer| bearer.id == id)
    }

    pub fn bearer_find_by_id_mut(&mut self, sess_index: u32, id: u8) -> Option<&mut SgwBearer> {
        let index = self.bearer_find_by_id(sess_index, id)?.index;
        self.bearer_find_mut(index)
    }

    /// First bearer created for the session
    pub fn default_bearer_in_sess(&self, sess_index: u32) -> Option<&SgwBearer> {
        self.bearer_first(sess_index)
    }

    pub fn bearer_first(&self, sess_index: u32) -> Option<&SgwBearer> {
        let sess = self.sess_list.get(&sess_index)?;
        sess.bearer_ids
            .first()
            .and_then(|index| self.bearer_list.get(index))
    }

    /// Bearer following `bearer_index` in its session's list
    pub fn bearer_next(&self, bearer_index: u32) -> Option<&SgwBearer> {
        let bearer = self.bearer_list.get(&bearer_index)?;
        let sess = self.sess_list.get(&bearer.sess_index)?;
        let pos = sess.bearer_ids.iter().position(|&id| id == bearer_index)?;
        sess.bearer_ids
            .get(pos + 1)
            .and_then(|index| self.bearer_list.get(index))
    }

    /// Bearers of a session in creation order
    pub fn bearers_in_sess(&self, sess_index: u32) -> impl Iterator<Item = &SgwBearer> + '_ {
        self.sess_list
            .get(&sess_index)
            .map(|sess| sess.bearer_ids.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(move |index| self.bearer_list.get(index))
    }

    pub fn bearer_count(&self) -> usize {
        self.bearer_list.len()
    }
}

// ============================================================================
// Global Context Instance
// ============================================================================

static SGW_CONTEXT: Mutex<Option<Arc<Mutex<SgwContext>>>> = Mutex::new(None);

/// Install the process-wide SGW context
pub fn sgw_context_init(
    conf: &SgwConfig,
    queue: EventSender,
) -> SgwResult<Arc<Mutex<SgwContext>>> {
    let mut slot = SGW_CONTEXT.lock().unwrap_or_else(|e| e.into_inner());
    if slot.is_some() {
        return Err(SgwError::AlreadyInitialized);
    }

    let ctx = Arc::new(Mutex::new(SgwContext::new(conf, queue)));
    *slot = Some(Arc::clone(&ctx));
    Ok(ctx)
}

/// Tear down the process-wide SGW context
pub fn sgw_context_final() -> SgwResult<()> {
    let ctx = SGW_CONTEXT
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
        .ok_or(SgwError::NotInitialized)?;

    ctx.lock().unwrap_or_else(|e| e.into_inner()).fini();
    Ok(())
}

/// Get the process-wide SGW context
pub fn sgw_self() -> SgwResult<Arc<Mutex<SgwContext>>> {
    SGW_CONTEXT
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .map(Arc::clone)
        .ok_or(SgwError::NotInitialized)
}

// ============================================================================
// Tests
// ============================================================================
