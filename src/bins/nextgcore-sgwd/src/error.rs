//! SGW Error types

use thiserror::Error;

use crate::message::gtp_cause;
use crate::pool::PoolKind;

/// SGW Error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SgwError {
    /// Index pool has no free entry
    #[error("Resource exhausted: {0} pool is empty")]
    ResourceExhausted(PoolKind),

    /// Session add invoked for an IMSI+APN that already has a session
    #[error("Duplicate session key IMSI[{imsi_bcd}] APN[{apn}]")]
    DuplicateKey { imsi_bcd: String, apn: String },

    /// No live session with this index
    #[error("Session not found: index {0}")]
    SessionNotFound(u32),

    /// No live bearer with this index
    #[error("Bearer not found: index {0}")]
    BearerNotFound(u32),

    /// Session has no bearer with this EBI
    #[error("Bearer EBI[{ebi}] not found in session {sess_index}")]
    EbiNotFound { sess_index: u32, ebi: u8 },

    /// Context init called twice without teardown
    #[error("SGW context already initialized")]
    AlreadyInitialized,

    /// Context used before init or after teardown
    #[error("SGW context not initialized")]
    NotInitialized,

    /// IMSI buffer empty or longer than the TBCD maximum
    #[error("Invalid IMSI length: {0}")]
    InvalidImsi(usize),

    /// APN empty or longer than the maximum
    #[error("Invalid APN: {0}")]
    InvalidApn(String),

    /// Decoded message lacks a mandatory IE
    #[error("Missing mandatory IE: {0}")]
    MandatoryIeMissing(&'static str),
}

impl SgwError {
    /// GTPv2 cause value used to reject the request that triggered this error
    pub fn cause(&self) -> u8 {
        match self {
            SgwError::ResourceExhausted(_) => gtp_cause::NO_RESOURCES_AVAILABLE,
            SgwError::SessionNotFound(_)
            | SgwError::BearerNotFound(_)
            | SgwError::EbiNotFound { .. } => gtp_cause::CONTEXT_NOT_FOUND,
            SgwError::MandatoryIeMissing(_) => gtp_cause::MANDATORY_IE_MISSING,
            SgwError::InvalidImsi(_) | SgwError::InvalidApn(_) => {
                gtp_cause::MANDATORY_IE_INCORRECT
            }
            _ => gtp_cause::SYSTEM_FAILURE,
        }
    }
}

/// SGW Result type
pub type SgwResult<T> = Result<T, SgwError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_mapping() {
        assert_eq!(
            SgwError::ResourceExhausted(PoolKind::Bearer).cause(),
            gtp_cause::NO_RESOURCES_AVAILABLE
        );
        assert_eq!(SgwError::SessionNotFound(3).cause(), gtp_cause::CONTEXT_NOT_FOUND);
        assert_eq!(
            SgwError::MandatoryIeMissing("Bearer Context").cause(),
            gtp_cause::MANDATORY_IE_MISSING
        );
        assert_eq!(SgwError::AlreadyInitialized.cause(), gtp_cause::SYSTEM_FAILURE);
    }

    #[test]
    fn test_error_display() {
        let err = SgwError::ResourceExhausted(PoolKind::Session);
        assert_eq!(err.to_string(), "Resource exhausted: session pool is empty");
    }
}
