//! Ownership and role checks applied before any mutation reaches storage.

use crate::types::{OrderStatus, Role};

/// Authenticated caller as seen by the business rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    /// Product edits are limited to the owning wholesaler and administrators.
    pub fn can_manage_product(&self, wholesaler_id: &str) -> bool {
        self.is_admin() || (self.has_role(Role::Wholesaler) && self.id == wholesaler_id)
    }

    /// Orders are visible to the buyer, to any seller with a line in them, and to admins.
    pub fn can_view_order<'a>(
        &self,
        customer_id: &str,
        sellers: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        self.is_admin() || self.id == customer_id || sellers.into_iter().any(|id| id == self.id)
    }

    /// Fulfilment updates come from administrators or a wholesaler supplying the order.
    pub fn can_fulfil_order<'a>(&self, wholesalers: impl IntoIterator<Item = &'a str>) -> bool {
        self.is_admin()
            || (self.has_role(Role::Wholesaler) && wholesalers.into_iter().any(|id| id == self.id))
    }

    /// Buyers may cancel while the order is pending; fulfilment staff until processing starts.
    pub fn can_cancel_order<'a>(
        &self,
        status: OrderStatus,
        customer_id: &str,
        wholesalers: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        if !status.is_cancellable() {
            return false;
        }
        if self.can_fulfil_order(wholesalers) {
            return true;
        }
        self.id == customer_id && status == OrderStatus::Pending
    }
}
