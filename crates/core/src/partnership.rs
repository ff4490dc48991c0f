use thiserror::Error;

use crate::pricing::MAX_COMMISSION_BPS;
use crate::types::PartnershipStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PartnershipRuleError {
    #[error("commission must be between 0 and {MAX_COMMISSION_BPS} basis points (got {0})")]
    CommissionOutOfRange(i64),
    #[error("partnership has already been answered ({0:?})")]
    AlreadyAnswered(PartnershipStatus),
    #[error("commission can only change on an active partnership (status {0:?})")]
    NotActive(PartnershipStatus),
}

/// Checks a commission rate expressed in basis points.
pub fn validate_commission(bps: i64) -> Result<i64, PartnershipRuleError> {
    if (0..=MAX_COMMISSION_BPS).contains(&bps) {
        Ok(bps)
    } else {
        Err(PartnershipRuleError::CommissionOutOfRange(bps))
    }
}

/// Status a pending partnership moves to after the wholesaler answers.
pub fn respond(
    current: PartnershipStatus,
    accept: bool,
) -> Result<PartnershipStatus, PartnershipRuleError> {
    match current {
        PartnershipStatus::Pending if accept => Ok(PartnershipStatus::Active),
        PartnershipStatus::Pending => Ok(PartnershipStatus::Rejected),
        other => Err(PartnershipRuleError::AlreadyAnswered(other)),
    }
}

pub fn ensure_commission_editable(current: PartnershipStatus) -> Result<(), PartnershipRuleError> {
    match current {
        PartnershipStatus::Active => Ok(()),
        other => Err(PartnershipRuleError::NotActive(other)),
    }
}
