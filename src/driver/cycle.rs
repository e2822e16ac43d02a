use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering::*},
        },
    thread,
    };
use tokio::{
    sync::{Notify, oneshot},
    time::Instant,
    };
use log::*;

use crate::{
    mutex::*,
    frame::{TxFrame, RxFrame},
    sdc::{SdcQueue, SdcHandle, SdcStatus},
    registers::{self, HardwareConfig},
    units::AnalogMode,
    };
use super::{Error, Config, Transport, TransportError};


/// a transport failure is reported once every this number of consecutive failures
pub const THROTTLE: u32 = 100;
/// maximum number of analog configurations waiting for the board
const ANALOG_CONFIGS: usize = 8;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;


/**
    Monarco board driver

    all frame state lives in one [BusyMutex], held by the cycle for the whole exchange and post-processing of a frame, and by the channel methods for their read-modify-write. No one ever sees a frame in the middle of an exchange.
*/
pub struct Monarco<T> {
    state: BusyMutex<State>,
    /// `None` once closed
    transport: BusyMutex<Option<T>>,
    config: Config,
    phase: AtomicU8,
    /// set to request the cycle to stop after its current exchange
    stopping: AtomicBool,
    /// wakes the cycle up when stopping
    wakeup: Notify,
}

/// lifecycle of the cycle, it can only move forward
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

/// counters of the cycle
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// exchanges attempted
    pub cycles: u64,
    /// exchanges failed
    pub failures: u64,
    /// exchanges failed since the last successful one
    pub consecutive_failures: u32,
}

/// everything shared between the cycle and the channel methods
pub(super) struct State {
    pub tx: TxFrame,
    pub rx: RxFrame,
    pub sdc: SdcQueue,
    pub analog: AnalogState,
    pub stats: Stats,
}
pub(super) struct AnalogState {
    /// modes in effect on the board
    pub applied: [AnalogMode; 2],
    /// modes last requested
    pub requested: [AnalogMode; 2],
    /// hardware configuration writes not serviced yet, with the modes they set
    pub configs: heapless::Deque<(SdcHandle, [AnalogMode; 2]), ANALOG_CONFIGS>,
}


impl<T: Transport> Monarco<T> {
    /// open the transport and initialize a driver on it
    pub fn open(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let transport = T::open(&config.transport)?;
        Self::new(config, transport)
    }
    /// initialize a driver on an already opened transport
    pub fn new(config: Config, transport: T) -> Result<Self, Error> {
        config.validate()?;
        let state = State::new(&config)?;
        Ok(Self {
            state: BusyMutex::from(state),
            transport: BusyMutex::from(Some(transport)),
            config,
            phase: AtomicU8::new(IDLE),
            stopping: AtomicBool::new(false),
            wakeup: Notify::new(),
        })
    }
    pub fn config(&self) -> &Config {&self.config}

    pub fn phase(&self) -> Phase {
        match self.phase.load(Acquire) {
            IDLE => Phase::Idle,
            RUNNING => Phase::Running,
            _ => Phase::Stopped,
        }
    }
    pub fn stats(&self) -> Stats {
        self.state().stats
    }
    /// lock the frame state, for the channel methods
    pub(super) fn state(&self) -> BusyMutexGuard<'_, State> {
        self.state.blocking_lock()
    }

    /**
        coroutine performing the frame exchanges, once per cycle interval

        it **must** be running for the channels to reach the board. It returns after [Self::stop], and can only be run once per driver.
        Transport failures do not interrupt it, they are reported in the log and the next cycle retries.

        It holds the frame lock during each exchange, so the channel methods must not be called from the task polling it: they would spin on the lock while that task cannot resume the exchange. [Self::spawn] runs it on its own thread instead.
    */
    pub async fn run(&self) -> Result<(), Error> {
        if self.phase.compare_exchange(IDLE, RUNNING, AcqRel, Acquire).is_err() {
            return Err(Error::State("cycle already started or stopped"));
        }
        let result = self.cycle().await;
        self.phase.store(STOPPED, Release);
        info!("cycle stopped");
        result
    }
    async fn cycle(&self) -> Result<(), Error> {
        let mut guard = self.transport.try_lock()
            .ok_or(Error::State("transport in use"))?;
        let transport = guard.as_mut()
            .ok_or(Error::Transport(TransportError::Closed))?;

        info!("cycle started every {:?}", self.config.cycle);
        let mut deadline = Instant::now();
        loop {
            if self.stopping.load(Acquire)
                {break}
            // failures are already reported by the state, the next tick retries
            let _ = self.tick(transport).await;
            // a late cycle is not caught up
            deadline = deadline.checked_add(self.config.cycle)
                .unwrap_or(deadline)
                .max(Instant::now());
            // sleep until the next cycle, or until woken up for stopping
            let _ = tokio::time::timeout_at(deadline, self.wakeup.notified()).await;
        }
        Ok(())
    }

    /// perform a single exchange now, for applications timing the cycle themselves
    pub async fn update(&self) -> Result<(), Error> {
        if self.phase() == Phase::Running {
            return Err(Error::State("cycle is running"));
        }
        let mut guard = self.transport.try_lock()
            .ok_or(Error::State("transport in use"))?;
        let transport = guard.as_mut()
            .ok_or(Error::Transport(TransportError::Closed))?;
        self.tick(transport).await
    }

    /// one exchange and its state transitions, all under the lock
    async fn tick(&self, transport: &mut T) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let tx = state.tx.encode();
        let received = match transport.exchange(&tx[..]).await {
            Ok(rx) => RxFrame::decode(&rx).map_err(Error::from),
            Err(error) => Err(Error::from(error)),
        };
        let result = match received {
            Ok(rx) => {
                state.recover();
                state.receive(rx);
                Ok(())
            },
            Err(error) => {
                state.fail(&error);
                Err(error)
            },
        };
        state.tx.control.advance_sign_of_life();
        state.stats.cycles += 1;
        result
    }

    /// request the cycle to stop after its current exchange, a stopped driver cannot run again
    pub fn stop(&self) {
        self.stopping.store(true, Release);
        let _ = self.phase.compare_exchange(IDLE, STOPPED, AcqRel, Acquire);
        self.wakeup.notify_one();
    }

    /// stop the cycle, wait for it to return, then close the transport
    pub async fn close(&self) -> Result<(), Error> {
        self.stop();
        // the cycle holds the transport until it returns
        let mut guard = self.transport.lock().await;
        let transport = guard.take()
            .ok_or(Error::State("transport already closed"))?;
        transport.close()?;
        info!("transport closed");
        Ok(())
    }
}

impl<T: Transport + 'static> Monarco<T> {
    /**
        run the cycle on a dedicated thread, driven by its own single threaded tokio runtime

        the channel methods can then be called from any thread or task, they never share an executor with the exchange holding their lock
    */
    pub fn spawn(self: &Arc<Self>) -> Result<Cycle<T>, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(Error::Runtime)?;
        let (send, result) = oneshot::channel();
        let monarco = self.clone();
        let thread = thread::Builder::new()
            .name(std::format!("{}-cycle", self.config.transport.label))
            .spawn(move || {
                // the receiver may be gone if the handle was dropped
                let _ = send.send(runtime.block_on(monarco.run()));
            })
            .map_err(Error::Runtime)?;
        Ok(Cycle {
            monarco: self.clone(),
            thread,
            result,
        })
    }
}

/// handle on a cycle running on its own thread
pub struct Cycle<T> {
    monarco: Arc<Monarco<T>>,
    thread: thread::JoinHandle<()>,
    result: oneshot::Receiver<Result<(), Error>>,
}
impl<T: Transport> Cycle<T> {
    pub fn monarco(&self) -> &Arc<Monarco<T>> {&self.monarco}
    pub fn is_finished(&self) -> bool {self.thread.is_finished()}
    /// request the cycle to stop and wait for its current exchange to end
    pub async fn stop(self) -> Result<(), Error> {
        self.monarco.stop();
        self.result.await
            .map_err(|_| Error::State("cycle thread panicked"))?
    }
}


impl State {
    fn new(config: &Config) -> Result<Self, Error> {
        let mut state = Self {
            tx: TxFrame::default(),
            rx: RxFrame::default(),
            sdc: SdcQueue::new(),
            analog: AnalogState {
                applied: [AnalogMode::default(); 2],
                requested: [AnalogMode::default(); 2],
                configs: heapless::Deque::new(),
            },
            stats: Stats::default(),
        };
        // user LEDs stay with the firmware until the application takes them
        state.tx.led_mask = 0;
        state.configure_analog(config.analog)?;
        Ok(state)
    }

    /// enqueue a hardware configuration write setting the given analog modes
    pub fn configure_analog(&mut self, modes: [AnalogMode; 2]) -> Result<SdcHandle, Error> {
        if self.analog.configs.is_full()
            {return Err(Error::CapacityExceeded)}
        let mut config = HardwareConfig::default();
        for (index, &mode) in modes.iter().enumerate() {
            config.set_current(index, mode == AnalogMode::Ampere);
        }
        let handle = self.sdc.enqueue(registers::HW_CONFIG.address(), u16::from(config), true)?;
        self.analog.configs.push_back((handle, modes))
            .map_err(|_| Error::CapacityExceeded)?;
        self.analog.requested = modes;
        Ok(handle)
    }

    /// state transitions following a successful exchange
    fn receive(&mut self, rx: RxFrame) {
        self.rx = rx;
        // reset requests must fall as soon as acknowledged, or the board resets again
        for index in 0 .. 2 {
            if self.tx.control.counter_reset(index) && self.rx.status.counter_reset_done(index) {
                self.tx.control.set_counter_reset(index, false);
                debug!("counter {} reset acknowledged", index+1);
            }
        }
        if let Some((handle, status)) = self.sdc.process(&mut self.tx.sdc_request, &self.rx.sdc_response) {
            let address = self.sdc.item(handle).map(|item| item.address).unwrap_or_default();
            match status {
                SdcStatus::Error => warn!("sub-device operation on register {:#05x} failed", address),
                _ => debug!("sub-device operation on register {:#05x} done", address),
            }
        }
        self.apply_analog();
    }

    /// switch analog scaling once the board has taken the configuration
    fn apply_analog(&mut self) {
        while let Some(&(handle, modes)) = self.analog.configs.front() {
            match self.sdc.status(handle) {
                Some(SdcStatus::Pending) => break,
                Some(SdcStatus::Done(_)) => {
                    self.analog.applied = modes;
                    info!("analog inputs now measuring {:?}", modes);
                },
                Some(SdcStatus::Error) | None => {
                    warn!("analog inputs configuration {:?} refused", modes);
                    // the board keeps its previous configuration
                    if self.analog.configs.len() == 1
                        {self.analog.requested = self.analog.applied}
                },
            }
            self.analog.configs.pop_front();
        }
    }

    fn fail(&mut self, error: &Error) {
        if self.stats.failed() {
            warn!("exchange failed ({} in a row): {}", self.stats.consecutive_failures, error);
        }
    }
    fn recover(&mut self) {
        if let Some(streak) = self.stats.succeeded() {
            info!("exchange recovered after {} failures", streak);
        }
    }
}

impl AnalogState {
    /// a configuration is still on its way to the board
    pub fn provisional(&self) -> bool {
        ! self.configs.is_empty()
    }
}

impl Stats {
    /// count a failed exchange, return whether it is to be reported: the first of a streak, then one every [THROTTLE]
    fn failed(&mut self) -> bool {
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        (self.consecutive_failures - 1) % THROTTLE == 0
    }
    /// count a successful exchange, return the length of the failure streak it ends if any
    fn succeeded(&mut self) -> Option<u32> {
        let streak = core::mem::take(&mut self.consecutive_failures);
        (streak != 0).then_some(streak)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SdcSlot;

    #[test]
    fn failures_throttled() {
        let mut stats = Stats::default();
        let reported = (1 ..= 250)
            .filter(|_| stats.failed())
            .collect::<std::vec::Vec<u32>>();
        assert_eq!(reported, [1, 101, 201]);
        assert_eq!(stats.failures, 250);
        assert_eq!(stats.consecutive_failures, 250);

        // recovery ends the streak once
        assert_eq!(stats.succeeded(), Some(250));
        assert_eq!(stats.succeeded(), None);
        assert_eq!(stats.consecutive_failures, 0);
        // and the next failure is reported again
        assert!(stats.failed());
        assert!(! stats.failed());
        assert_eq!(stats.failures, 252);
    }

    #[test]
    fn refused_configuration_keeps_modes() {
        let config = Config::default().with_analog(1, AnalogMode::Ampere);
        let mut state = State::new(&config).unwrap();
        assert!(state.analog.provisional());
        assert_eq!(state.analog.requested, [AnalogMode::Ampere, AnalogMode::Volt]);

        let mut refused = SdcSlot::request(registers::HW_CONFIG.address(), 0, true);
        refused.flags.set_error(true);
        let idle = SdcSlot::default();
        let mut request = SdcSlot::default();
        // loaded, transmitted, then answered
        assert!(state.sdc.process(&mut request, &idle).is_none());
        assert!(state.sdc.process(&mut request, &idle).is_none());
        assert!(matches!(state.sdc.process(&mut request, &refused), Some((_, SdcStatus::Error))));

        state.apply_analog();
        assert!(state.analog.configs.is_empty());
        assert_eq!(state.analog.applied, [AnalogMode::Volt; 2]);
        assert_eq!(state.analog.requested, state.analog.applied);
        assert!(! state.analog.provisional());
    }
}
