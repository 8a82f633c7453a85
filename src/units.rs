//! Power and current conversions for a three-phase 230 V installation

/// Phase voltage
pub const PHASE_VOLTAGE: f32 = 230.0;

/// Number of phases every wallbox charges on
pub const PHASES: f32 = 3.0;

/// Distance in tenths of an amp below which a value counts as on the step
const TENTHS_TOLERANCE: f64 = 1e-3;

/// Convert a three-phase power into the per-phase current
pub fn watts_to_amps(watts: f32) -> f32 {
    watts / (PHASE_VOLTAGE * PHASES)
}

/// Like [`watts_to_amps`] but truncated to 0.1 A
pub fn watts_to_amps_rounded(watts: f32) -> f32 {
    // Whole watts divide exactly in f64, so exact steps stay exact
    let tenths = (f64::from(watts) * 10.0 / f64::from(PHASE_VOLTAGE * PHASES)).trunc();
    (tenths / 10.0) as f32
}

/// Per-phase current back to three-phase power
pub fn amps_to_watts(amps: f32) -> f32 {
    amps * PHASE_VOLTAGE * PHASES
}

/// Current in the wallbox register unit of 0.1 A, truncated
///
/// A value that is the nearest `f32` to a 0.1 A step maps to that step even
/// when it is stored just below it (6.1 A is 6.0999999).
#[allow(clippy::float_cmp)]
pub fn amps_to_device_units(amps: f32) -> u16 {
    let scaled = f64::from(amps) * 10.0;
    let step = scaled.ceil();
    let units = if (step / 10.0) as f32 == amps {
        step
    } else {
        scaled.trunc()
    };
    // Saturating float-to-int cast: negatives and NaN become 0
    units as u16
}

/// Truncate a current computed by f32 arithmetic to 0.1 A, absorbing the
/// rounding error of sums and differences of 0.1 A steps
pub fn floor_to_tenths(amps: f32) -> f32 {
    let scaled = f64::from(amps) * 10.0;
    let nearest = scaled.round();
    let tenths = if (scaled - nearest).abs() < TENTHS_TOLERANCE {
        nearest
    } else {
        scaled.floor()
    };
    (tenths / 10.0) as f32
}

/// Register value in 0.1 A back to amps
pub fn device_units_to_amps(units: u16) -> f32 {
    f32::from(units) / 10.0
}

/// PV power left over for charging: output minus the household load, where
/// the load excludes what the wallboxes themselves draw
pub fn pv_surplus_watts(output_watts: u32, consumption_watts: u32, ev_power_watts: u32) -> u32 {
    let household = consumption_watts.saturating_sub(ev_power_watts);
    output_watts.saturating_sub(household)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn exact_phase_power_is_one_amp() {
        assert!(close(watts_to_amps(690.0), 1.0));
        assert!(close(watts_to_amps_rounded(690.0), 1.0));
    }

    #[test]
    fn rounded_variant_truncates() {
        assert!(close(watts_to_amps_rounded(689.0), 0.9));
        assert!(close(watts_to_amps_rounded(0.0), 0.0));
        assert!(close(watts_to_amps_rounded(11040.0), 16.0));
    }

    #[test]
    fn device_units_truncate() {
        assert_eq!(amps_to_device_units(8.999_999), 89);
        assert_eq!(amps_to_device_units(9.1), 91);
        assert_eq!(amps_to_device_units(16.0), 160);
        assert_eq!(amps_to_device_units(0.0), 0);
        assert_eq!(amps_to_device_units(-1.0), 0);
        assert_eq!(amps_to_device_units(f32::NAN), 0);
        assert_eq!(amps_to_device_units(6.1), 61);
    }

    #[test]
    fn every_step_survives_conversion_to_register_units() {
        for tenths in 60u16..=160 {
            let watts = f32::from(tenths) * 69.0;
            let amps = watts_to_amps_rounded(watts);
            assert_eq!(amps_to_device_units(amps), tenths, "{watts} W -> {amps} A");
            assert_eq!(amps_to_device_units(f32::from(tenths) / 10.0), tenths);
        }
        // One watt short of a step stays on the step below
        assert_eq!(amps_to_device_units(watts_to_amps_rounded(4208.0)), 60);
    }

    #[test]
    fn floor_to_tenths_absorbs_arithmetic_error() {
        for a in 60u16..=200 {
            for b in 0u16..=a {
                let diff = f32::from(a) / 10.0 - f32::from(b) / 10.0;
                assert_eq!(amps_to_device_units(floor_to_tenths(diff)), a - b, "{a} - {b}");
            }
        }
        assert!(close(floor_to_tenths(5.75), 5.7));
        assert!(close(floor_to_tenths(-0.25), -0.3));
        assert_eq!(amps_to_device_units(floor_to_tenths(8.999_999)), 90);
    }

    #[test]
    fn watts_round_trip() {
        assert!(close(amps_to_watts(watts_to_amps(4140.0)), 4140.0));
        assert!(close(device_units_to_amps(160), 16.0));
    }

    #[test]
    fn surplus_excludes_ev_draw() {
        assert_eq!(pv_surplus_watts(5000, 3000, 2000), 4000);
        assert_eq!(pv_surplus_watts(5000, 1000, 2000), 5000);
        assert_eq!(pv_surplus_watts(1000, 4000, 0), 0);
    }
}
