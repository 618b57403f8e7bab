//! Value objects shared by the storefront aggregates and messages.

use common::AggregateId;
use serde::{Deserialize, Serialize};

/// Money amount in minor units (cents) to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Adds two amounts, or `None` if the result does not fit.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.cents.checked_add(other.cents).map(Money::from_cents)
    }

    /// Multiplies by a quantity, or `None` if the result does not fit.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.cents.checked_mul(i64::from(quantity)).map(Money::from_cents)
    }

    /// Sums amounts, or `None` as soon as the running total overflows.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |total, amount| total.checked_add(amount))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// A product and a quantity, as carried by reservation and compensation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: AggregateId,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(product_id: AggregateId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// An order line with the price and title captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: AggregateId,
    pub quantity: u32,
    pub price_snapshot: Money,
    pub title_snapshot: String,
}

impl OrderLine {
    pub fn new(
        product_id: AggregateId,
        quantity: u32,
        price_snapshot: Money,
        title_snapshot: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            quantity,
            price_snapshot,
            title_snapshot: title_snapshot.into(),
        }
    }

    /// Returns `price_snapshot * quantity`, or `None` on overflow.
    pub fn subtotal(&self) -> Option<Money> {
        self.price_snapshot.checked_mul(self.quantity)
    }

    /// Sums the subtotals of `lines`, or `None` on overflow.
    pub fn total(lines: &[OrderLine]) -> Option<Money> {
        lines.iter().try_fold(Money::zero(), |total, line| {
            total.checked_add(line.subtotal()?)
        })
    }

    pub fn line_item(&self) -> LineItem {
        LineItem::new(self.product_id, self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(1050).to_string(), "$10.50");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-$2.50");
    }

    #[test]
    fn money_display_of_extremes() {
        assert_eq!(Money::from_cents(i64::MIN).to_string(), "-$92233720368547758.08");
        assert_eq!(Money::from_cents(i64::MAX).to_string(), "$92233720368547758.07");
    }

    #[test]
    fn money_sums() {
        let total = Money::checked_sum([100, 250, 50].into_iter().map(Money::from_cents));
        assert_eq!(total, Some(Money::from_cents(400)));
        assert_eq!(Money::checked_sum([]), Some(Money::zero()));
        assert_eq!(Money::from_cents(1000).checked_mul(3), Some(Money::from_cents(3000)));
    }

    #[test]
    fn money_overflow_is_none() {
        let big = Money::from_cents(i64::MAX / 2);
        assert_eq!(big.checked_mul(3), None);
        assert_eq!(big.checked_add(big).and_then(|m| m.checked_add(big)), None);
        assert_eq!(Money::checked_sum([big, big, big]), None);
        assert_eq!(Money::from_cents(i64::MAX).checked_mul(u32::MAX), None);
    }

    #[test]
    fn order_line_subtotal() {
        let line = OrderLine::new(AggregateId::new(), 2, Money::from_cents(1000), "Widget");
        assert_eq!(line.subtotal(), Some(Money::from_cents(2000)));
        assert_eq!(line.line_item().quantity, 2);
    }

    #[test]
    fn order_total_overflows_to_none() {
        let fits = [
            OrderLine::new(AggregateId::new(), 2, Money::from_cents(1000), "A"),
            OrderLine::new(AggregateId::new(), 1, Money::from_cents(500), "B"),
        ];
        assert_eq!(OrderLine::total(&fits), Some(Money::from_cents(2500)));

        let huge = Money::from_cents(i64::MAX / 2);
        let one_line = [OrderLine::new(AggregateId::new(), 3, huge, "A")];
        assert_eq!(OrderLine::total(&one_line), None);

        let two_lines = [
            OrderLine::new(AggregateId::new(), 1, huge, "A"),
            OrderLine::new(AggregateId::new(), 2, huge, "B"),
        ];
        assert_eq!(OrderLine::total(&two_lines), None);
    }

    #[test]
    fn line_item_wire_format_is_camel_case() {
        let id = AggregateId::new();
        let json = serde_json::to_value(LineItem::new(id, 3)).unwrap();
        assert_eq!(json, serde_json::json!({ "productId": id.to_string(), "quantity": 3 }));
    }
}
