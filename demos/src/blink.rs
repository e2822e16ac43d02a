use std::{sync::Arc, time::Duration};
use monarco::driver::{Monarco, Config, simulated::Device};

#[tokio::main]
async fn main() {
    env_logger::init();
    // a real board would come with its own transport, the simulated one echoes the outputs on the inputs
    let device = Device::new();
    device.set_loopback(true);
    let monarco = Arc::new(Monarco::new(Config::default(), device.clone()).unwrap());

    // the cycle gets its own thread, the calls below never wait on it
    let cycle = monarco.spawn().unwrap();
    let mut on = false;
    for _ in 0 .. 10 {
        on = ! on;
        monarco.set_digital_out(2, on).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        println!("DOUT2 {}, DIN2 reads {}", on, monarco.get_digital_in(2).unwrap());
    }
    cycle.stop().await.unwrap();
    monarco.close().await.unwrap();
    println!("{} frames exchanged", device.exchanges());
}
