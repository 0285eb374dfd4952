//! Role tasks and the launcher that starts them for the supervisor.
//!
//! Every task is a named thread polling at a fixed period until its stop
//! flag is raised. Hardware is handed out through [`ResourceSlot`] leases
//! so two tasks can never drive the same device; a lease is released when
//! the task thread ends, which is before `stop` returns.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::{DeviceConfig, Role};
use crate::error::{HardwareError, TaskError};
use crate::hal::{AnalogInputs, DigitalOutputs, DutyOutputs, SenderSwitches};
use crate::mapping::{Mapper, Rate, pulse_to_duty};
use crate::mode::{Launcher, Worker};
use crate::packet::{CHANNEL_COUNT, ControlPacket, DIGITAL_OUTPUTS, RATE_BIT};
use crate::radio::{Radio, ReceiveCallback};
use crate::service::ConfigService;
use crate::shared::{ActuationOutputs, NodeState};
use crate::websocket;

pub const SENDER_PERIOD_MS: u64 = 20;
pub const RECEIVER_PERIOD_MS: u64 = 10;

/// A device that at most one task may use at a time.
pub struct ResourceSlot<T> {
    name: &'static str,
    device: Option<Arc<Mutex<T>>>,
    leased: Arc<AtomicBool>,
}

impl<T> Clone for ResourceSlot<T> {
    fn clone(&self) -> Self {
        ResourceSlot {
            name: self.name,
            device: self.device.clone(),
            leased: Arc::clone(&self.leased),
        }
    }
}

impl<T> ResourceSlot<T> {
    pub fn new(name: &'static str, device: T) -> Self {
        ResourceSlot {
            name,
            device: Some(Arc::new(Mutex::new(device))),
            leased: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A slot for hardware that failed to initialise.
    pub fn empty(name: &'static str) -> Self {
        ResourceSlot {
            name,
            device: None,
            leased: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_result<E: std::fmt::Display>(name: &'static str, device: Result<T, E>) -> Self {
        match device {
            Ok(device) => ResourceSlot::new(name, device),
            Err(e) => {
                warn!("{} unavailable: {}", name, e);
                ResourceSlot::empty(name)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_leased(&self) -> bool {
        self.leased.load(Ordering::Acquire)
    }

    pub fn lease(&self) -> Result<Lease<T>, TaskError> {
        let device = self.device.as_ref().ok_or(TaskError::ResourceUnavailable(self.name))?;
        if self
            .leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TaskError::ResourceBusy(self.name));
        }
        Ok(Lease {
            device: Arc::clone(device),
            leased: Arc::clone(&self.leased),
        })
    }
}

pub struct Lease<T> {
    device: Arc<Mutex<T>>,
    leased: Arc<AtomicBool>,
}

impl<T> Lease<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        self.leased.store(false, Ordering::Release);
    }
}

/// Run `step` every `period` until `stop` is raised. Deadlines advance by a
/// whole period so a slow step does not shift later ones; after an overrun
/// the schedule restarts from now instead of bursting.
pub fn run_periodic<F: FnMut()>(stop: &AtomicBool, period: Duration, mut step: F) {
    let mut deadline = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        step();
        deadline += period;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }
}

type StopHook = Box<dyn FnOnce() + Send>;

pub struct ThreadWorker {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    before_join: Option<StopHook>,
}

impl ThreadWorker {
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self, TaskError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(flag))
            .map_err(|source| TaskError::Spawn { name, source })?;

        info!("Task {} started", name);
        Ok(ThreadWorker {
            name,
            stop,
            handle: Some(handle),
            before_join: None,
        })
    }

    /// Run `hook` on stop, before the thread is signalled.
    pub fn with_stop_hook<H: FnOnce() + Send + 'static>(mut self, hook: H) -> Self {
        self.before_join = Some(Box::new(hook));
        self
    }
}

impl Worker for ThreadWorker {
    fn name(&self) -> &str {
        self.name
    }

    fn stop(mut self: Box<Self>) {
        if let Some(hook) = self.before_join.take() {
            hook();
        }
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Task {} panicked", self.name);
            }
        }
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Samples the controls and transmits one packet per period.
pub struct SenderLoop {
    state: Arc<NodeState>,
    radio: Arc<dyn Radio>,
    analog: Lease<Box<dyn AnalogInputs>>,
    switches: Lease<SenderSwitches>,
    failing: bool,
}

impl SenderLoop {
    pub fn new(
        state: Arc<NodeState>,
        radio: Arc<dyn Radio>,
        analog: Lease<Box<dyn AnalogInputs>>,
        switches: Lease<SenderSwitches>,
    ) -> Self {
        SenderLoop {
            state,
            radio,
            analog,
            switches,
            failing: false,
        }
    }

    fn sample(&self) -> Result<ControlPacket, HardwareError> {
        let mut channels = [0u16; CHANNEL_COUNT];
        {
            let mut analog = self.analog.lock();
            let available = analog.channel_count().min(CHANNEL_COUNT);
            for (i, value) in channels.iter_mut().enumerate().take(available) {
                *value = analog.read_channel(i)?;
            }
        }
        let digital = self.switches.lock().read_digital()?;
        Ok(ControlPacket::new(channels, digital))
    }

    pub fn step(&mut self) {
        let packet = match self.sample() {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Input sampling failed: {}", e);
                return;
            }
        };

        let peer = self.state.config.load().peer;
        match self.radio.send(&peer, &packet.encode()) {
            Ok(()) => {
                if self.failing {
                    info!("Sending to {} again", peer);
                    self.failing = false;
                }
                let now = self.state.now_ms();
                self.state.link.on_packet_received(self.radio.signal_quality(), now);
            }
            Err(e) if self.failing => debug!("Send failed: {}", e),
            Err(e) => {
                warn!("Send to {} failed: {}", peer, e);
                self.failing = true;
            }
        }
    }
}

/// Actuation values for one packet under the current configuration.
///
/// A configured device uses the per-channel calibration. Before that the
/// rate-only mapping is used with the rate selected by the packet.
pub fn compute_outputs(mapper: &Mapper, config: &DeviceConfig, packet: &ControlPacket) -> ActuationOutputs {
    let rate = Rate::from_flag(packet.is_high_rate());
    let mut pulses_us = [0u16; CHANNEL_COUNT];
    for (i, pulse) in pulses_us.iter_mut().enumerate() {
        let raw = packet.channels[i];
        *pulse = if config.configured {
            mapper.map_channel(raw, &config.channels[i])
        } else {
            mapper.map_rate(raw, rate)
        };
    }
    ActuationOutputs {
        pulses_us,
        digital: packet.digital & !RATE_BIT,
    }
}

/// Callback run by the transport for every inbound frame.
pub fn receive_callback(state: Arc<NodeState>) -> ReceiveCallback {
    Arc::new(move |frame: &[u8], signal_quality: i8| match ControlPacket::decode(frame) {
        Some(packet) => {
            let now = state.now_ms();
            state.packets.publish(packet, now);
            state.link.on_packet_received(signal_quality, now);
        }
        None => debug!("Dropped {}-byte frame", frame.len()),
    })
}

/// Applies the newest received packet to the outputs. Packets cached before
/// the loop was created are never applied.
pub struct ReceiverLoop {
    state: Arc<NodeState>,
    mapper: Mapper,
    servos: Lease<Box<dyn DutyOutputs>>,
    lights: Lease<Box<dyn DigitalOutputs>>,
    applied: u64,
}

impl ReceiverLoop {
    pub fn new(
        state: Arc<NodeState>,
        servos: Lease<Box<dyn DutyOutputs>>,
        lights: Lease<Box<dyn DigitalOutputs>>,
    ) -> Self {
        let applied = state.packets.latest().map(|r| r.sequence).unwrap_or(0);
        ReceiverLoop {
            state,
            mapper: Mapper::default(),
            servos,
            lights,
            applied,
        }
    }

    pub fn step(&mut self) {
        let Some(received) = self.state.packets.newer_than(self.applied) else {
            return;
        };
        self.applied = received.sequence;

        let config = self.state.config.load();
        let outputs = compute_outputs(&self.mapper, &config, &received.packet);
        if let Err(e) = self.actuate(&outputs) {
            warn!("Output write failed: {}", e);
        }
        self.state.outputs.publish(outputs);
    }

    fn actuate(&self, outputs: &ActuationOutputs) -> Result<(), HardwareError> {
        {
            let mut servos = self.servos.lock();
            let count = servos.channel_count().min(CHANNEL_COUNT);
            for (i, &pulse) in outputs.pulses_us.iter().enumerate().take(count) {
                servos.write_duty(i, pulse_to_duty(pulse))?;
            }
        }

        let mut lights = self.lights.lock();
        let count = lights.pin_count().min(DIGITAL_OUTPUTS);
        for i in 0..count {
            lights.write_pin(i, outputs.digital & (1 << i) != 0)?;
        }
        Ok(())
    }
}

/// Devices the role tasks lease from.
#[derive(Clone)]
pub struct Hardware {
    pub analog: ResourceSlot<Box<dyn AnalogInputs>>,
    pub switches: ResourceSlot<SenderSwitches>,
    pub servos: ResourceSlot<Box<dyn DutyOutputs>>,
    pub lights: ResourceSlot<Box<dyn DigitalOutputs>>,
}

pub struct NodeLauncher {
    radio: Arc<dyn Radio>,
    hardware: Hardware,
    state: Arc<NodeState>,
    service: ConfigService,
    config_addr: String,
}

impl NodeLauncher {
    pub fn new(
        radio: Arc<dyn Radio>,
        hardware: Hardware,
        state: Arc<NodeState>,
        service: ConfigService,
        config_addr: impl Into<String>,
    ) -> Self {
        NodeLauncher {
            radio,
            hardware,
            state,
            service,
            config_addr: config_addr.into(),
        }
    }

    fn spawn_sender(&self) -> Result<ThreadWorker, TaskError> {
        let analog = self.hardware.analog.lease()?;
        let switches = self.hardware.switches.lease()?;
        let mut sender = SenderLoop::new(Arc::clone(&self.state), Arc::clone(&self.radio), analog, switches);

        ThreadWorker::spawn("sender", move |stop| {
            run_periodic(&stop, Duration::from_millis(SENDER_PERIOD_MS), || sender.step());
        })
    }

    fn spawn_receiver(&self) -> Result<ThreadWorker, TaskError> {
        let servos = self.hardware.servos.lease()?;
        let lights = self.hardware.lights.lease()?;
        let mut receiver = ReceiverLoop::new(Arc::clone(&self.state), servos, lights);

        let worker = ThreadWorker::spawn("receiver", move |stop| {
            run_periodic(&stop, Duration::from_millis(RECEIVER_PERIOD_MS), || receiver.step());
        })?;
        self.radio.set_receive_callback(receive_callback(Arc::clone(&self.state)));

        let radio = Arc::clone(&self.radio);
        Ok(worker.with_stop_hook(move || radio.clear_receive_callback()))
    }
}

impl Launcher for NodeLauncher {
    fn launch_role(&mut self, role: Role) -> Result<Box<dyn Worker>, TaskError> {
        let worker = match role {
            Role::Sender => self.spawn_sender()?,
            Role::Receiver => self.spawn_receiver()?,
        };
        Ok(Box::new(worker))
    }

    fn launch_config(&mut self) -> Result<Box<dyn Worker>, TaskError> {
        let listener = TcpListener::bind(&self.config_addr).map_err(|source| TaskError::Bind {
            addr: self.config_addr.clone(),
            source,
        })?;
        let service = self.service.clone();
        let worker = ThreadWorker::spawn("config", move |stop| websocket::serve(listener, service, stop))?;
        Ok(Box::new(worker))
    }
}
