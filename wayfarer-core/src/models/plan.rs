use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wayfarer_shared::Masked;

/// A sellable trip template. Departures are scheduled against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub vendor_id: String,
    pub name: String,
    /// Price per person in whole currency units.
    pub price: i64,
    pub is_active: bool,
    /// Share of the trip cost paid to the vendor (85 means 85%).
    pub vendor_cut_percent: Option<u8>,
}

impl Plan {
    pub fn new(vendor_id: &str, name: &str, price: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor_id: vendor_id.to_string(),
            name: name.to_string(),
            price,
            is_active: true,
            vendor_cut_percent: None,
        }
    }

    pub fn with_vendor_cut(mut self, percent: u8) -> Self {
        self.vendor_cut_percent = Some(percent.min(100));
        self
    }
}

/// Linked gateway account that receives a vendor's payouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorAccount {
    pub vendor_id: String,
    pub account_id: Masked<String>,
}
