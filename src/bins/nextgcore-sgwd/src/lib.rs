//! NextGCore SGW (Serving Gateway) Library
//!
//! Session and bearer engine of the EPC Serving Gateway:
//! - S11 interface: GTPv2-C messages from MME
//! - S5-C interface: GTPv2-C messages from PGW
//! - S1-U / S5-U interfaces: uplink relay, downlink buffering while the UE is idle

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod gtp_path;
pub mod message;
pub mod pool;
pub mod s11_handler;
pub mod s5c_handler;
pub mod sm;
pub mod timer;


// Re-export commonly used types
pub use buffer::{DlState, DownlinkBuffer, PushOutcome, MAX_NUM_BUFFER_PKT};
pub use config::{ConfigError, SgwConfig};
pub use context::{
    sgw_context_final, sgw_context_init, sgw_self, Pdn, SgwBearer, SgwContext, SgwSess,
};
pub use error::{SgwError, SgwResult};
pub use event::{EventQueue, EventReceiver, EventSender, SgwEvent, SgwEventId};
pub use gtp_path::{
    gtp_close, gtp_open, handle_downlink_packet, handle_uplink_packet, DownlinkAction,
};
pub use message::{SgwOutput, S11Message, S5cMessage};
pub use pool::{IndexPool, PoolKind};
pub use sm::{SgwFsm, SgwState};
pub use timer::{SgwTimerId, TimerManager};
