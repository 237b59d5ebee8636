//! Payment orders recorded by the tenant's own checkout.

use serde::{Deserialize, Serialize};

use crate::id::TenantId;

pub const PAY_STATUS_PAID: i16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub tenant_id: TenantId,
    pub merchant_order_no: String,
    /// Trade number assigned by the payment provider.
    pub platform_order_no: String,
    pub buyer_id: Option<String>,
    pub pay_status: i16,
    pub pay_ip: Option<String>,
    pub first_open_ip: Option<String>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.pay_status == PAY_STATUS_PAID
    }

    /// Buyer identity, if the provider reported a non-empty one.
    pub fn buyer(&self) -> Option<&str> {
        non_empty(self.buyer_id.as_deref())
    }

    /// Pay-time IP, else the IP the checkout page was first opened from.
    pub fn best_ip(&self) -> Option<&str> {
        non_empty(self.pay_ip.as_deref()).or_else(|| non_empty(self.first_open_ip.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order {
            id: 1,
            tenant_id: TenantId::new(1),
            merchant_order_no: "BY120251022AAAA".into(),
            platform_order_no: "2025102222001".into(),
            buyer_id: Some("2088000".into()),
            pay_status: PAY_STATUS_PAID,
            pay_ip: Some("10.0.0.1".into()),
            first_open_ip: Some("10.0.0.2".into()),
        }
    }

    #[test]
    fn prefers_pay_ip() {
        assert_eq!(order().best_ip(), Some("10.0.0.1"));

        let mut blank_pay_ip = order();
        blank_pay_ip.pay_ip = Some("  ".into());
        assert_eq!(blank_pay_ip.best_ip(), Some("10.0.0.2"));

        blank_pay_ip.first_open_ip = None;
        assert_eq!(blank_pay_ip.best_ip(), None);
    }

    #[test]
    fn empty_buyer_is_absent() {
        let mut o = order();
        o.buyer_id = Some(String::new());
        assert_eq!(o.buyer(), None);
        assert!(o.is_paid());
    }
}
