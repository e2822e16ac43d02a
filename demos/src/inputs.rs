use std::{sync::Arc, time::Duration};
use monarco::{
    registers,
    driver::{Monarco, Config, AnalogMode, SdcStatus, simulated::Device},
    };

#[tokio::main]
async fn main() {
    env_logger::init();
    let device = Device::new();
    device.set_analog_input(1, 1234);
    device.set_analog_input(2, 3000);
    let config = Config::default()
        .with_cycle(Duration::from_millis(5))
        .with_analog(2, AnalogMode::Ampere);
    let monarco = Arc::new(Monarco::new(config, device.clone()).unwrap());

    // the cycle gets its own thread, the calls below never wait on it
    let cycle = monarco.spawn().unwrap();
    let version = monarco.read_register(registers::FIRMWARE_VERSION).unwrap();
    loop {
        match monarco.sdc_status(version).unwrap() {
            SdcStatus::Pending => tokio::time::sleep(Duration::from_millis(5)).await,
            SdcStatus::Done(version) => {println!("firmware version {:#06x}", version); break},
            SdcStatus::Error => {println!("firmware version unavailable"); break},
        }
    }
    for _ in 0 .. 5 {
        device.pulse(1, 7);
        tokio::time::sleep(Duration::from_millis(100)).await;
        println!("AIN1 {:?}", monarco.get_analog_in(1).unwrap());
        println!("AIN2 {:?}", monarco.get_analog_in(2).unwrap());
        println!("CNT1 {}", monarco.get_counter_value(1).unwrap());
    }
    println!("{:?}", monarco.stats());
    cycle.stop().await.unwrap();
    monarco.close().await.unwrap();
}
