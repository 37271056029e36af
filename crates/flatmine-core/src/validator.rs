//! Plausibility checks on parsed listings.
//!
//! Sites carry typos, swapped fields and outright fiction; anything the
//! checks cannot account for is rejected rather than stored. Validation
//! never mutates the listing.

use chrono::{Duration, Utc};

use crate::Flat;

/// Empirical per-room ceiling on area per room, index 0 = one room.
const SPECIFIC_AREA_LIMITS: [f64; 9] = [69.5, 110.0, 130.0, 110.0, 86.0, 75.0, 65.0, 65.0, 65.0];
const SPECIFIC_AREA_FLOOR: f64 = 13.5;

pub struct FlatValidator {
    max_age: Option<Duration>,
}

impl Default for FlatValidator {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::days(210)),
        }
    }
}

impl FlatValidator {
    /// `max_age` of `None` disables the publication-age gate.
    pub fn new(max_age: Option<Duration>) -> Self {
        Self { max_age }
    }

    /// A listing missing any required field fails quietly; no distinction
    /// is made between incomplete and implausible.
    pub fn validate(&self, flat: &Flat) -> bool {
        let (Some(area), Some(rooms), Some(floor), Some(total_floor), Some(published)) =
            (flat.area, flat.rooms, flat.floor, flat.total_floor, flat.published)
        else {
            return false;
        };
        if !(10.0..560.0).contains(&area) {
            return false;
        }
        if !(1..=9).contains(&rooms) {
            return false;
        }
        let specific = area / rooms as f64;
        if specific < SPECIFIC_AREA_FLOOR || specific > SPECIFIC_AREA_LIMITS[rooms as usize - 1] {
            return false;
        }
        if !(1..=47).contains(&total_floor) {
            return false;
        }
        if !(0..=total_floor).contains(&floor) {
            return false;
        }
        if let Some(kitchen) = flat.kitchen_area {
            if kitchen < 2.0 || kitchen >= area {
                return false;
            }
        }
        if let Some(living) = flat.living_area {
            if living <= 5.0 || living >= area {
                return false;
            }
        }
        if let Some(ceiling) = flat.ceiling_height {
            if !(1.8..=6.0).contains(&ceiling) {
                return false;
            }
        }
        if let Some(max_age) = self.max_age {
            if Utc::now().date_naive() - published > max_age {
                return false;
            }
        }
        true
    }
}
