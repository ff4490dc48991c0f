//! Cart totals, shipping and commission arithmetic. All amounts are integer RWF.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Commission rates are expressed in basis points; 10_000 bps is 100%.
pub const MAX_COMMISSION_BPS: i64 = 10_000;

/// Flat-fee shipping that is waived above a subtotal threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingPolicy {
    pub flat_fee: i64,
    pub free_threshold: i64,
}

impl ShippingPolicy {
    pub fn new(flat_fee: i64, free_threshold: i64) -> Self {
        Self {
            flat_fee,
            free_threshold,
        }
    }

    /// Shipping charged for the given subtotal. Empty carts ship for free.
    pub fn fee_for(&self, subtotal: i64) -> i64 {
        if subtotal <= 0 || subtotal >= self.free_threshold {
            0
        } else {
            self.flat_fee
        }
    }
}

/// Totals shown on the cart page and persisted on orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub item_count: i64,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("amount overflow while pricing cart")]
    Overflow,
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("price must not be negative")]
    NegativePrice,
}

/// Returns `unit_price * quantity`, rejecting overflow and nonsensical inputs.
pub fn line_total(unit_price: i64, quantity: i64) -> Result<i64, PricingError> {
    if quantity <= 0 {
        return Err(PricingError::InvalidQuantity);
    }
    if unit_price < 0 {
        return Err(PricingError::NegativePrice);
    }
    unit_price
        .checked_mul(quantity)
        .ok_or(PricingError::Overflow)
}

/// Summarises `(unit_price, quantity)` pairs into cart totals.
pub fn summarize<I>(lines: I, shipping: &ShippingPolicy) -> Result<CartSummary, PricingError>
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let mut item_count = 0i64;
    let mut subtotal = 0i64;
    for (unit_price, quantity) in lines {
        let total = line_total(unit_price, quantity)?;
        subtotal = subtotal.checked_add(total).ok_or(PricingError::Overflow)?;
        item_count = item_count
            .checked_add(quantity)
            .ok_or(PricingError::Overflow)?;
    }

    let shipping_fee = shipping.fee_for(subtotal);
    let total = subtotal
        .checked_add(shipping_fee)
        .ok_or(PricingError::Overflow)?;

    Ok(CartSummary {
        item_count,
        subtotal,
        shipping_fee,
        total,
    })
}

/// How a sold line is split between wholesaler and dropshipper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub line_total: i64,
    pub wholesale_amount: i64,
    pub commission_amount: i64,
    pub wholesaler_payout: i64,
    pub dropshipper_earning: i64,
}

/// Splits a line sold at `unit_price` for a product priced `wholesale_price`.
///
/// Commission is `floor(wholesale_amount * bps / 10_000)` and is paid by the
/// wholesaler on top of the dropshipper's markup.
pub fn commission_split(
    unit_price: i64,
    wholesale_price: i64,
    quantity: i64,
    commission_bps: i64,
) -> Result<CommissionSplit, PricingError> {
    let total = line_total(unit_price, quantity)?;
    let wholesale_amount = line_total(wholesale_price, quantity)?;
    let bps = commission_bps.clamp(0, MAX_COMMISSION_BPS);

    let commission = (wholesale_amount as i128 * bps as i128) / MAX_COMMISSION_BPS as i128;
    let commission_amount = i64::try_from(commission).map_err(|_| PricingError::Overflow)?;

    let markup = total - wholesale_amount;
    Ok(CommissionSplit {
        line_total: total,
        wholesale_amount,
        commission_amount,
        wholesaler_payout: wholesale_amount - commission_amount,
        dropshipper_earning: markup + commission_amount,
    })
}
