/*!
    conversions between engineering units and the integer encodings the board expects

    callers validate ranges first, these functions clamp as a last resort so any input yields a valid register value
*/

/// raw value of an analog input or output at full scale
pub const ANALOG_FULL_SCALE: f64 = 4095.;
/// voltage of an analog input or output at full scale
pub const VOLT_FULL_SCALE: f64 = 10.;
/// current of an analog input in current mode at full scale
pub const AMPERE_FULL_SCALE: f64 = 52.475;

/// lowest PWM frequency the dividers can reach (Hz)
pub const PWM_MIN_FREQUENCY: f64 = 1.;
/// PWM frequencies must stay strictly below this (Hz)
pub const PWM_MAX_FREQUENCY: f64 = 100_000.;
/// clock feeding the PWM prescalers (Hz)
pub const PWM_CLOCK: f64 = 32_000_000.;
/// division ratio of each prescaler selection, indexed by the 2 low bits of a divider
const PWM_PRESCALERS: [f64; 4] = [1., 8., 64., 512.];


/// what an analog input measures
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AnalogMode {
    #[default]
    Volt,
    Ampere,
}
impl AnalogMode {
    /// value of an analog input at full scale in this mode
    pub fn full_scale(self) -> f64 {
        match self {
            Self::Volt => VOLT_FULL_SCALE,
            Self::Ampere => AMPERE_FULL_SCALE,
        }
    }
}


/// analog input raw value to volts or amperes
pub fn ain_to_value(raw: u16, mode: AnalogMode) -> f64 {
    f64::from(raw) * mode.full_scale() / ANALOG_FULL_SCALE
}

/// analog output volts to raw value
pub fn volts_to_aout(volts: f64) -> u16 {
    let volts = volts.clamp(0., VOLT_FULL_SCALE);
    (volts * ANALOG_FULL_SCALE / VOLT_FULL_SCALE + 0.5) as u16
}

/// duty cycle fraction to raw value
pub fn duty_to_u16(duty: f64) -> u16 {
    (duty.clamp(0., 1.) * f64::from(u16::MAX) + 0.5) as u16
}

/// raw value to duty cycle fraction
pub fn u16_to_duty(raw: u16) -> f64 {
    f64::from(raw) / f64::from(u16::MAX)
}

/**
    PWM frequency to divider register value

    the 2 low bits select a prescaler, the 14 high bits hold the period in prescaled clock ticks (its 2 low bits dropped). The smallest prescaler keeping the period in 16 bits is chosen for best resolution.

    return `None` if the frequency is out of `[PWM_MIN_FREQUENCY, PWM_MAX_FREQUENCY)`
*/
pub fn frequency_to_divider(frequency: f64) -> Option<u16> {
    if !(PWM_MIN_FREQUENCY .. PWM_MAX_FREQUENCY).contains(&frequency)
        {return None}
    PWM_PRESCALERS.iter().enumerate().find_map(|(selection, prescaler)| {
        let period = PWM_CLOCK / prescaler / frequency + 0.5;
        if period <= f64::from(u16::MAX)
            {Some((period as u16 & !0b11) | selection as u16)}
        else
            {None}
    })
}

/// divider register value to the PWM frequency it produces, `None` for a null period
pub fn divider_to_frequency(divider: u16) -> Option<f64> {
    let period = divider & !0b11;
    if period == 0
        {return None}
    Some(PWM_CLOCK / PWM_PRESCALERS[usize::from(divider & 0b11)] / f64::from(period))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn within(a: f64, b: f64, tolerance: f64) -> bool {
        a - b < tolerance && b - a < tolerance
    }
    fn close(a: f64, b: f64) -> bool {
        within(a, b, 1e-9)
    }

    #[test]
    fn analog_input_scale() {
        assert!(close(ain_to_value(4095, AnalogMode::Volt), 10.));
        assert!(close(ain_to_value(4095, AnalogMode::Ampere), 52.475));
        assert_eq!(ain_to_value(0, AnalogMode::Volt), 0.);
        assert_eq!(ain_to_value(0, AnalogMode::Ampere), 0.);
    }

    #[test]
    fn analog_output_scale() {
        assert_eq!(volts_to_aout(0.), 0);
        assert_eq!(volts_to_aout(10.), 4095);
        assert_eq!(volts_to_aout(5.), 2048);
        assert_eq!(volts_to_aout(12.), 4095);
    }

    #[test]
    fn duty_scale() {
        assert_eq!(duty_to_u16(0.), 0);
        assert_eq!(duty_to_u16(1.), u16::MAX);
        assert_eq!(duty_to_u16(0.5), 0x8000);
        assert!(close(u16_to_duty(u16::MAX), 1.));
    }

    #[test]
    fn pwm_dividers() {
        assert_eq!(frequency_to_divider(0.5), None);
        assert_eq!(frequency_to_divider(100_000.), None);
        assert_eq!(frequency_to_divider(f64::NAN), None);

        // fast frequencies use the undivided clock
        let divider = frequency_to_divider(99_999.).unwrap();
        assert_eq!(divider & 0b11, 0);
        // 1Hz needs the biggest prescaler
        let divider = frequency_to_divider(1.).unwrap();
        assert_eq!(divider & 0b11, 3);
        assert!(within(divider_to_frequency(divider).unwrap(), 1., 1e-3));

        for frequency in [1., 10., 333., 1000., 20_000.] {
            let divider = frequency_to_divider(frequency).unwrap();
            let actual = divider_to_frequency(divider).unwrap();
            assert!(within(actual, frequency, frequency * 0.01), "{} Hz gave {} Hz", frequency, actual);
        }
    }
}
