use crate::{
    units::{self, AnalogMode},
    registers::{self, Register, CounterConfig, CounterMode, CounterDirection, CounterEdge},
    frame::{TxFrame, RxFrame},
    sdc::{SdcHandle, SdcStatus},
    };
use super::{Error, Monarco, Transport};


/// digital inputs and outputs
pub const DIGITAL_PORTS: u8 = 4;
/// PWM outputs, sharing the digital outputs
pub const PWM_OUTPUTS: u8 = 4;
/// PWM frequency dividers
pub const PWM_CHANNELS: u8 = 2;
/// analog inputs and outputs
pub const ANALOG_PORTS: u8 = 2;
pub const COUNTERS: u8 = 2;
/// user LEDs
pub const LEDS: u8 = 8;

/// PWM outputs (0-based) driven by each PWM channel
const PWM_GROUPS: [&[usize]; PWM_CHANNELS as usize] = [&[0, 1, 2], &[3]];


/// analog input value, in the unit of the mode it was measured in
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AnalogReading {
    /// volts or amperes
    pub value: f64,
    pub raw: u16,
    /// mode in effect on the board
    pub mode: AnalogMode,
    /// a configuration was requested but the board has not taken it yet
    pub provisional: bool,
}


/**
    channel access

    ports and channels are numbered from 1 as on the board's connectors. Every method validates its arguments before locking, an invalid call leaves the frames untouched.
    These methods wait for the frame lock and nothing else, the values written reach the board with the next exchange.
*/
impl<T: Transport> Monarco<T> {
    pub fn set_digital_out(&self, port: u8, value: bool) -> Result<(), Error> {
        let bit = 1 << index(port, DIGITAL_PORTS)?;
        let mut state = self.state();
        if value
            {state.tx.dout |= bit}
        else
            {state.tx.dout &= !bit}
        Ok(())
    }
    /// digital output state as it will be sent
    pub fn digital_out(&self, port: u8) -> Result<bool, Error> {
        let bit = 1 << index(port, DIGITAL_PORTS)?;
        Ok(self.state().tx.dout & bit != 0)
    }
    /// digital input state from the last frame received
    pub fn get_digital_in(&self, port: u8) -> Result<bool, Error> {
        let bit = 1 << index(port, DIGITAL_PORTS)?;
        Ok(self.state().rx.din & bit != 0)
    }

    /// set the frequency of PWM channel 1 (outputs 1 to 3) or channel 2 (output 4)
    pub fn set_pwm_frequency(&self, channel: u8, frequency: f64) -> Result<(), Error> {
        let index = index(channel, PWM_CHANNELS)?;
        let divider = divider(frequency)?;
        let mut state = self.state();
        *state.tx.divider_mut(index).ok_or(Error::InvalidChannel(channel))? = divider;
        Ok(())
    }
    /// set the duty cycle of a PWM output, as a fraction in `[0, 1]`
    pub fn set_pwm_out(&self, port: u8, duty: f64) -> Result<(), Error> {
        let output = index(port, PWM_OUTPUTS)?;
        let duty = duty_cycle(duty)?;
        let mut state = self.state();
        *state.tx.duty_mut(output).ok_or(Error::InvalidChannel(port))? = duty;
        Ok(())
    }
    /// set the frequency and all duty cycles of a PWM channel at once, they reach the board in the same frame
    pub fn set_pwm(&self, channel: u8, frequency: f64, duties: &[f64]) -> Result<(), Error> {
        let index = index(channel, PWM_CHANNELS)?;
        let divider = divider(frequency)?;
        let outputs = PWM_GROUPS[index];
        if duties.len() != outputs.len()
            {return Err(Error::InvalidArgument("one duty cycle is needed per output of the PWM channel"))}
        let mut encoded = [0; 3];
        for (dst, &duty) in encoded.iter_mut().zip(duties) {
            *dst = duty_cycle(duty)?;
        }

        let mut state = self.state();
        *state.tx.divider_mut(index).ok_or(Error::InvalidChannel(channel))? = divider;
        for (&output, &duty) in outputs.iter().zip(&encoded) {
            *state.tx.duty_mut(output).ok_or(Error::InvalidChannel(channel))? = duty;
        }
        Ok(())
    }

    /// set an analog output, in volts within `[0, 10]`
    pub fn set_analog_out(&self, port: u8, volts: f64) -> Result<(), Error> {
        let index = index(port, ANALOG_PORTS)?;
        if !(0. ..= units::VOLT_FULL_SCALE).contains(&volts)
            {return Err(Error::InvalidArgument("analog output must be in [0, 10] V"))}
        let raw = units::volts_to_aout(volts);
        let mut state = self.state();
        *state.tx.aout_mut(index).ok_or(Error::InvalidChannel(port))? = raw;
        Ok(())
    }
    /**
        analog input from the last frame received, scaled according to the mode in effect on the board

        after a mode change the reading stays in the previous mode and is flagged provisional until the board takes the new configuration, as are the readings taken before the startup configuration is done
    */
    pub fn get_analog_in(&self, port: u8) -> Result<AnalogReading, Error> {
        let index = index(port, ANALOG_PORTS)?;
        let state = self.state();
        let raw = state.rx.ain(index).ok_or(Error::InvalidChannel(port))?;
        let mode = state.analog.applied[index];
        Ok(AnalogReading {
            value: units::ain_to_value(raw, mode),
            raw,
            mode,
            provisional: state.analog.provisional(),
        })
    }
    /// change the measurement mode of an analog input, applied once the returned register write is done
    pub fn set_analog_mode(&self, port: u8, mode: AnalogMode) -> Result<SdcHandle, Error> {
        let index = index(port, ANALOG_PORTS)?;
        let mut state = self.state();
        let mut modes = state.analog.requested;
        modes[index] = mode;
        state.configure_analog(modes)
    }
    /// measurement mode in effect on the board
    pub fn analog_mode(&self, port: u8) -> Result<AnalogMode, Error> {
        let index = index(port, ANALOG_PORTS)?;
        Ok(self.state().analog.applied[index])
    }

    /**
        configure a counter, applied once the returned register write is done

        counter 2 and PWM channel 2 share their hardware, they should not be used together
    */
    pub fn set_counter_mode(&self, counter: u8, mode: CounterMode, direction: CounterDirection, edge: CounterEdge) -> Result<SdcHandle, Error> {
        let register = registers::counter_config(index(counter, COUNTERS)?)
            .ok_or(Error::InvalidChannel(counter))?;
        self.write_register(register, CounterConfig::build(mode, direction, edge))
    }
    /// counter value from the last frame received
    pub fn get_counter_value(&self, counter: u8) -> Result<u32, Error> {
        let index = index(counter, COUNTERS)?;
        self.state().rx.counter(index).ok_or(Error::InvalidChannel(counter))
    }
    /// request a counter reset, the request is withdrawn by the cycle once the board acknowledges it
    pub fn reset_counter(&self, counter: u8) -> Result<(), Error> {
        let index = index(counter, COUNTERS)?;
        self.state().tx.control.set_counter_reset(index, true);
        Ok(())
    }
    /// whether a reset of this counter is still waiting for acknowledgement
    pub fn counter_reset_pending(&self, counter: u8) -> Result<bool, Error> {
        let index = index(counter, COUNTERS)?;
        Ok(self.state().tx.control.counter_reset(index))
    }

    /// drive a user LED, `None` gives it back to the firmware
    pub fn set_led(&self, led: u8, value: Option<bool>) -> Result<(), Error> {
        let bit = 1 << index(led, LEDS)?;
        let mut state = self.state();
        match value {
            Some(on) => {
                state.tx.led_mask |= bit;
                if on
                    {state.tx.led_value |= bit}
                else
                    {state.tx.led_value &= !bit}
            },
            None => {
                state.tx.led_mask &= !bit;
                state.tx.led_value &= !bit;
            },
        }
        Ok(())
    }
    /// drive the status LED, `None` gives it back to the firmware
    pub fn set_status_led(&self, value: Option<bool>) {
        let mut state = self.state();
        state.tx.control.set_status_led_mask(value.is_some());
        state.tx.control.set_status_led_value(value.unwrap_or(false));
    }
    pub fn set_shutdown(&self, shutdown: bool) {
        self.state().tx.control.set_shutdown(shutdown);
    }

    /// enqueue a register read, its value comes with [Self::sdc_status]
    pub fn read_register<V>(&self, register: Register<V>) -> Result<SdcHandle, Error> {
        Ok(self.state().sdc.enqueue(register.address(), 0, false)?)
    }
    /// enqueue a register write
    pub fn write_register<V: Into<u16>>(&self, register: Register<V>, value: V) -> Result<SdcHandle, Error> {
        let value = value.into();
        Ok(self.state().sdc.enqueue(register.address(), value, true)?)
    }
    /**
        progress of a register operation

        a finished operation is reported only once, then its handle is stale and reported as an invalid argument
    */
    pub fn sdc_status(&self, handle: SdcHandle) -> Result<SdcStatus, Error> {
        self.state().sdc.status(handle)
            .ok_or(Error::InvalidArgument("stale sub-device operation handle"))
    }
    /// number of register operations not serviced yet
    pub fn sdc_pending(&self) -> usize {
        self.state().sdc.pending()
    }

    /// copy of the frame to be sent next
    pub fn tx_frame(&self) -> TxFrame {
        self.state().tx
    }
    /// copy of the last frame received
    pub fn rx_frame(&self) -> RxFrame {
        self.state().rx
    }
}


/// 0-based index of a channel numbered from 1
fn index(channel: u8, count: u8) -> Result<usize, Error> {
    if (1 ..= count).contains(&channel)
        {Ok(usize::from(channel - 1))}
    else
        {Err(Error::InvalidChannel(channel))}
}

fn divider(frequency: f64) -> Result<u16, Error> {
    units::frequency_to_divider(frequency)
        .ok_or(Error::InvalidArgument("PWM frequency must be in [1, 100000) Hz"))
}

fn duty_cycle(duty: f64) -> Result<u16, Error> {
    if !(0. ..= 1.).contains(&duty)
        {return Err(Error::InvalidArgument("duty cycle must be in [0, 1]"))}
    Ok(units::duty_to_u16(duty))
}
