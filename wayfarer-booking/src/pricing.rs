use wayfarer_core::Plan;

use crate::context::BookingRules;

/// `percent`% of `amount`, rounded half up. Amounts are never negative here.
pub fn percent_of(amount: i64, percent: u8) -> i64 {
    (amount * i64::from(percent) + 50).div_euclid(100)
}

/// Money split for a new booking. This is the single place the vendor cut is
/// resolved; the result is stored on the booking and reused by refunds and
/// payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FareBreakdown {
    pub trip_cost: i64,
    pub platform_fee: i64,
    pub total_amount: i64,
    pub vendor_cut_percent: u8,
    pub vendor_payout_amount: i64,
    pub platform_cut: i64,
}

impl FareBreakdown {
    pub fn quote(plan: &Plan, num_people: u32, rules: &BookingRules) -> Self {
        let trip_cost = plan.price * i64::from(num_people);
        let vendor_cut_percent = plan
            .vendor_cut_percent
            .unwrap_or(rules.default_vendor_cut_percent)
            .min(100);
        let vendor_payout_amount = percent_of(trip_cost, vendor_cut_percent);
        let platform_fee = percent_of(trip_cost, rules.platform_fee_percent);

        Self {
            trip_cost,
            platform_fee,
            total_amount: trip_cost + platform_fee,
            vendor_cut_percent,
            vendor_payout_amount,
            platform_cut: trip_cost - vendor_payout_amount,
        }
    }
}
