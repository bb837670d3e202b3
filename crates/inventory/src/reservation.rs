use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgemarket_core::{
    CustomerId, DomainError, DomainResult, OrderId, ProductId, ReservationGroupId,
    ReservationRecordId, TenantId,
};

/// Reservation row lifecycle.
///
/// ```text
///         create (reserve)
///               │
///               ▼
///           [Pending] ──release──▶ [Released]   (terminal)
///               │
///               ├──confirm───────▶ [Confirmed]  (terminal)
///               │
///               └──expiry sweep──▶ [Expired]    (terminal)
/// ```
///
/// A row never transitions out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl core::str::FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(DomainError::validation(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One per-product hold row of a reservation group.
///
/// While Pending, the row's `quantity` has already been subtracted from the
/// product's stock; it is restored exactly once (release/expiry) or consumed
/// exactly once (confirmation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub record_id: ReservationRecordId,
    pub group_id: ReservationGroupId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub customer_id: CustomerId,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    /// Required while Pending.
    pub expires_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    /// Set only on confirmation, linking the hold to a finalized order.
    pub order_id: Option<OrderId>,
    /// Caller-supplied correlation string.
    pub external_reference: Option<String>,
}

impl StockReservation {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        group_id: ReservationGroupId,
        tenant_id: TenantId,
        product_id: ProductId,
        customer_id: CustomerId,
        quantity: i64,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        external_reference: Option<String>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation(
                "reserved quantity must be positive",
            ));
        }
        Ok(Self {
            record_id: ReservationRecordId::new(),
            group_id,
            tenant_id,
            product_id,
            customer_id,
            quantity,
            status: ReservationStatus::Pending,
            created_at,
            expires_at: Some(expires_at),
            confirmed_at: None,
            released_at: None,
            order_id: None,
            external_reference,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    /// A Pending row whose deadline has passed. Terminal rows are never
    /// considered expired; they already left the state machine.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at.is_some_and(|at| at < now)
    }

    /// Pending → Confirmed. The hold becomes a permanent deduction.
    pub fn confirm(&mut self, order_id: OrderId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("confirm")?;
        if self.is_expired_at(now) {
            return Err(DomainError::invariant(
                "expired reservation cannot be confirmed",
            ));
        }
        self.status = ReservationStatus::Confirmed;
        self.confirmed_at = Some(now);
        self.order_id = Some(order_id);
        Ok(())
    }

    /// Pending → Released. The caller restores the held stock.
    pub fn release(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("release")?;
        self.status = ReservationStatus::Released;
        self.released_at = Some(now);
        Ok(())
    }

    /// Pending → Expired. The expiry sweep restores the held stock.
    pub fn expire(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_pending("expire")?;
        self.status = ReservationStatus::Expired;
        self.released_at = Some(now);
        Ok(())
    }

    fn ensure_pending(&self, action: &str) -> DomainResult<()> {
        if !self.is_pending() {
            return Err(DomainError::invariant(format!(
                "cannot {action} a reservation in terminal state {}",
                self.status
            )));
        }
        Ok(())
    }
}
