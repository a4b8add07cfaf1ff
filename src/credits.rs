//! Credit ledger arithmetic and the credit pack catalog.
//!
//! Nothing here performs I/O: callers fetch the two counters from the store
//! and hand them to [`credit_status`].

use serde::Serialize;
use utoipa::ToSchema;

/// Credits a freshly created user profile starts with.
pub const DEFAULT_CREDITS_TOTAL: i32 = 20;

/// Remaining balance at or below which the user is warned.
pub const WARNING_THRESHOLD: i64 = 3;

/// A purchasable bundle of credits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPack {
    pub id: &'static str,
    /// Credits granted on purchase.
    pub amount: i32,
    /// Price in whole US dollars.
    pub price_usd: u32,
    pub label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<&'static str>,
    pub price_per_credit: f64,
    /// Card checkout price id; `None` while card checkout is not configured.
    pub stripe_price_id: Option<&'static str>,
}

pub static CREDIT_PACKS: [CreditPack; 3] = [
    CreditPack {
        id: "pack_50",
        amount: 50,
        price_usd: 9,
        label: "Starter Pack",
        badge: None,
        price_per_credit: 0.18,
        stripe_price_id: None,
    },
    CreditPack {
        id: "pack_150",
        amount: 150,
        price_usd: 19,
        label: "Growth Pack",
        badge: Some("Most Popular"),
        price_per_credit: 0.13,
        stripe_price_id: None,
    },
    CreditPack {
        id: "pack_500",
        amount: 500,
        price_usd: 49,
        label: "Scale Pack",
        badge: Some("Best Value"),
        price_per_credit: 0.10,
        stripe_price_id: None,
    },
];

/// Looks a pack up by id in the static catalog.
pub fn find_pack(pack_id: &str) -> Option<&'static CreditPack> {
    CREDIT_PACKS.iter().find(|pack| pack.id == pack_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CreditTier {
    Normal,
    Warning,
    Locked,
}

/// Derived view of a user's two credit counters.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatus {
    pub tier: CreditTier,
    pub available: i64,
    pub total: i64,
    pub used: i64,
    /// 0-100 for progress bars; 100 when the ceiling is zero.
    pub usage_percent: i64,
    pub label: String,
    pub is_locked: bool,
    pub is_warning: bool,
    pub is_normal: bool,
}

/// Computes tier, balance and display label from `(total, used)`.
///
/// Inputs are not validated; a negative `used` simply yields a balance above
/// the ceiling.
pub fn credit_status(total: i64, used: i64) -> CreditStatus {
    let available = (total - used).max(0);
    let usage_percent = if total > 0 {
        (used as f64 / total as f64 * 100.0).round() as i64
    } else {
        100
    };

    let tier = if available == 0 {
        CreditTier::Locked
    } else if available <= WARNING_THRESHOLD {
        CreditTier::Warning
    } else {
        CreditTier::Normal
    };

    let plural = if available == 1 { "" } else { "s" };
    let label = match tier {
        CreditTier::Normal => format!("{} AI generation{} left this month", available, plural),
        CreditTier::Warning => format!(
            "Only {} AI generation{} left - running low",
            available, plural
        ),
        CreditTier::Locked => "No AI generations left this month".to_string(),
    };

    CreditStatus {
        tier,
        available,
        total,
        used,
        usage_percent,
        label,
        is_locked: tier == CreditTier::Locked,
        is_warning: tier == CreditTier::Warning,
        is_normal: tier == CreditTier::Normal,
    }
}
