use thiserror::Error;

use crate::types::OrderStatus;

/// Prefix used for human readable order numbers.
pub const ORDER_NUMBER_PREFIX: &str = "KORA-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("order cannot move from {from} to {to}")]
    NotAllowed { from: OrderStatus, to: OrderStatus },
    #[error("order is already {0}")]
    Unchanged(OrderStatus),
}

impl OrderStatus {
    /// Statuses that may follow `self`.
    pub fn next_statuses(self) -> &'static [OrderStatus] {
        match self {
            Self::Pending => &[Self::Confirmed, Self::Cancelled],
            Self::Confirmed => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Shipped],
            Self::Shipped => &[Self::Delivered],
            Self::Delivered | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.next_statuses().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.next_statuses().is_empty()
    }

    /// Cancelling returns stock to inventory, so it is only offered before fulfilment starts.
    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(Self::Cancelled)
    }

    /// Counts toward revenue and payouts.
    pub fn is_billable(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Validates a status change requested by a seller or an administrator.
pub fn validate_transition(
    current: OrderStatus,
    next: OrderStatus,
) -> Result<(), TransitionError> {
    if current == next {
        return Err(TransitionError::Unchanged(current));
    }
    if !current.can_transition_to(next) {
        return Err(TransitionError::NotAllowed {
            from: current,
            to: next,
        });
    }
    Ok(())
}

/// Builds the public order number from a sortable unique suffix.
pub fn order_number(unique_suffix: &str) -> String {
    format!("{ORDER_NUMBER_PREFIX}{unique_suffix}")
}
