//! Cell voltage through a resistor divider on an ADC1 pin.

use esp_hal::{
    Blocking,
    analog::adc::{Adc, AdcCalCurve, AdcChannel, AdcConfig, AdcPin, Attenuation},
    gpio::AnalogPin,
    peripherals::ADC1,
};
use log::debug;
use mmpaper_core::battery::percent_from_millivolts;

const SAMPLES: u32 = 8;
const MAX_POLLS: u32 = 10_000;

/// Source of a state-of-charge estimate.
pub trait BatterySense {
    fn percent(&mut self) -> u8;
}

pub struct AdcBattery<'d, PIN> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    pin: AdcPin<PIN, ADC1<'d>, AdcCalCurve<ADC1<'d>>>,
    divider: u32,
}

impl<'d, PIN> AdcBattery<'d, PIN>
where
    PIN: AdcChannel + AnalogPin,
{
    /// `divider` is the ratio between the cell and the pin voltage.
    pub fn new(adc1: ADC1<'d>, pin: PIN, divider: u32) -> Self {
        let mut config = AdcConfig::new();
        let pin = config.enable_pin_with_cal::<_, AdcCalCurve<ADC1<'d>>>(pin, Attenuation::_11dB);
        let adc = Adc::new(adc1, config);
        Self {
            adc,
            pin,
            divider: divider.max(1),
        }
    }

    /// Averaged cell voltage, `None` if the converter never answered.
    pub fn millivolts(&mut self) -> Option<u16> {
        let mut sum = 0u32;
        for _ in 0..SAMPLES {
            let mut polls = 0;
            let sample = loop {
                if let Ok(mv) = self.adc.read_oneshot(&mut self.pin) {
                    break mv;
                }
                polls += 1;
                if polls >= MAX_POLLS {
                    return None;
                }
            };
            sum += sample as u32;
        }
        Some(((sum / SAMPLES) * self.divider).min(u16::MAX as u32) as u16)
    }
}

impl<PIN> BatterySense for AdcBattery<'_, PIN>
where
    PIN: AdcChannel + AnalogPin,
{
    fn percent(&mut self) -> u8 {
        match self.millivolts() {
            Some(mv) => {
                let percent = percent_from_millivolts(mv);
                debug!("battery: {}mV {}%", mv, percent);
                percent
            }
            // Unknown charge must not block updates.
            None => 100,
        }
    }
}
