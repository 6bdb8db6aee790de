//! ISO 15118-2 schedule structures
//!
//! Value types for the SAScheduleList the SECC hands to the EV during
//! ChargeParameterDiscovery: a power ceiling schedule (PMaxSchedule) paired
//! with a SalesTariff, grouped under one SAScheduleTuple.

use serde::{Deserialize, Serialize};

/// Maximum representable start offset of a RelativeTimeInterval
pub const MAX_INTERVAL_START: u32 = 16_777_214;

/// Unit of a physical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitSymbol {
    W,
    A,
    V,
    Wh,
}

/// Physical value with a power-of-ten multiplier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalValue {
    pub multiplier: i16,
    pub value: i32,
    pub unit: UnitSymbol,
}

impl PhysicalValue {
    /// A plain watt value with no scaling
    pub fn watts(value: i32) -> Self {
        Self {
            multiplier: 0,
            value,
            unit: UnitSymbol::W,
        }
    }
}

/// Time interval relative to the schedule start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeTimeInterval {
    pub start: u32,
    pub duration: u32,
}

/// One entry of the power ceiling schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PMaxScheduleEntry {
    pub p_max: PhysicalValue,
    pub time_interval: RelativeTimeInterval,
}

/// Power ceiling schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PMaxSchedule {
    pub schedule_entries: Vec<PMaxScheduleEntry>,
}

/// One entry of the sales tariff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesTariffEntry {
    pub e_price_level: u8,
    pub time_interval: RelativeTimeInterval,
}

/// Sales tariff presented alongside the power schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesTariff {
    pub id: String,
    pub sales_tariff_id: i32,
    pub sales_tariff_entry: Vec<SalesTariffEntry>,
    pub num_e_price_levels: u8,
}

/// Power schedule and tariff grouped under one tuple id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaScheduleTuple {
    pub sa_schedule_tuple_id: i32,
    pub p_max_schedule: PMaxSchedule,
    pub sales_tariff: Option<SalesTariff>,
}
