//! OCPP charging profile -> ISO 15118 schedule translation
//!
//! Pure conversion from the charging profile pushed by the CSMS into the
//! SAScheduleTuple the ISO 15118 session hands to the EV. No I/O, no state:
//! identical input always yields identical output.

use thiserror::Error;

use crate::iso::schedule::{
    PMaxSchedule, PMaxScheduleEntry, PhysicalValue, RelativeTimeInterval, SaScheduleTuple,
    SalesTariff, SalesTariffEntry, MAX_INTERVAL_START,
};
use crate::ocpp::types::{ChargingProfile, ChargingRateUnit};

/// Nominal AC voltage used to convert ampere limits into watts
const NOMINAL_VOLTAGE: f64 = 230.0;

/// Schedule duration applied when the profile carries none, in seconds
const DEFAULT_DURATION: i32 = 86_400;

/// Price level assigned to every sales tariff entry
const FIXED_PRICE_LEVEL: u8 = 1;

/// Validation failures of the profile translation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("charging profile must carry at least one charging schedule")]
    EmptySchedule,

    #[error("unsupported charging rate unit: {0}")]
    UnsupportedRateUnit(String),
}

/// Convert an OCPP charging profile into one ISO 15118 schedule tuple.
///
/// Only the first charging schedule of the profile is translated; OCPP
/// permits up to three (one per phase configuration) but the session
/// consumes a single tuple, so later entries are ignored.
pub fn translate(profile: &ChargingProfile) -> Result<SaScheduleTuple, TranslateError> {
    let schedule = profile
        .charging_schedule
        .first()
        .ok_or(TranslateError::EmptySchedule)?;

    let duration = schedule.duration.unwrap_or(DEFAULT_DURATION).max(0) as u32;

    let to_watts = |limit: f64| -> Result<i32, TranslateError> {
        match schedule.charging_rate_unit {
            ChargingRateUnit::A => Ok((limit * NOMINAL_VOLTAGE).round() as i32),
            ChargingRateUnit::W => Ok(limit.round() as i32),
            ChargingRateUnit::Unsupported => Err(TranslateError::UnsupportedRateUnit(
                format!("{:?}", schedule.charging_rate_unit),
            )),
        }
    };

    let clamp_start = |start_period: i32| -> u32 {
        (start_period.max(0) as u32).min(MAX_INTERVAL_START)
    };

    let mut schedule_entries = Vec::with_capacity(schedule.charging_schedule_period.len());
    let mut tariff_entries = Vec::with_capacity(schedule.charging_schedule_period.len());

    for period in &schedule.charging_schedule_period {
        let interval = RelativeTimeInterval {
            start: clamp_start(period.start_period),
            duration,
        };

        schedule_entries.push(PMaxScheduleEntry {
            p_max: PhysicalValue::watts(to_watts(period.limit)?),
            time_interval: interval,
        });

        tariff_entries.push(SalesTariffEntry {
            e_price_level: FIXED_PRICE_LEVEL,
            time_interval: interval,
        });
    }

    let num_e_price_levels = tariff_entries.len() as u8;

    Ok(SaScheduleTuple {
        sa_schedule_tuple_id: profile.id,
        p_max_schedule: PMaxSchedule { schedule_entries },
        sales_tariff: Some(SalesTariff {
            id: format!("id{}", profile.id),
            sales_tariff_id: profile.id,
            sales_tariff_entry: tariff_entries,
            num_e_price_levels,
        }),
    })
}
