use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rclink::buttons::HoldDetector;
use rclink::config::{DeviceConfig, MemoryStore, Role};
use rclink::hal::mock::{MockAnalog, MockDuty, MockPins};
use rclink::hal::{AnalogInputs, DigitalOutputs, DutyOutputs, SenderSwitches};
use rclink::indicator::OperatingState;
use rclink::mapping::pulse_to_duty;
use rclink::mode::{DeviceMode, Supervisor};
use rclink::packet::{CHANNEL_COUNT, DIGITAL_OUTPUTS};
use rclink::radio::{LoopbackRadio, Radio};
use rclink::service::ConfigService;
use rclink::shared::NodeState;
use rclink::tasks::{Hardware, NodeLauncher, ResourceSlot};

struct Board {
    analog: MockAnalog,
    switches: MockPins,
    servos: MockDuty,
    lights: MockPins,
    hardware: Hardware,
}

impl Board {
    fn new() -> Self {
        let analog = MockAnalog::new(8);
        let switches = MockPins::new(2);
        let servos = MockDuty::new(CHANNEL_COUNT);
        let lights = MockPins::new(DIGITAL_OUTPUTS);
        let hardware = Hardware {
            analog: ResourceSlot::new("adc", Box::new(analog.clone()) as Box<dyn AnalogInputs>),
            switches: ResourceSlot::new(
                "switches",
                SenderSwitches {
                    inputs: Box::new(switches.clone()),
                    lights: vec![0],
                    rate: Some(1),
                },
            ),
            servos: ResourceSlot::new("servos", Box::new(servos.clone()) as Box<dyn DutyOutputs>),
            lights: ResourceSlot::new("lights", Box::new(lights.clone()) as Box<dyn DigitalOutputs>),
        };
        Board {
            analog,
            switches,
            servos,
            lights,
            hardware,
        }
    }
}

struct Node {
    state: Arc<NodeState>,
    service: ConfigService,
    supervisor: Supervisor<NodeLauncher>,
}

impl Node {
    fn start(role: Role, radio: Arc<dyn Radio>, board: &Board) -> Self {
        let config = DeviceConfig {
            role,
            ..DeviceConfig::default()
        };
        let state = Arc::new(NodeState::new(config));
        let service = ConfigService::new(Arc::clone(&state), Arc::new(MemoryStore::new()));
        let launcher = NodeLauncher::new(
            radio,
            board.hardware.clone(),
            Arc::clone(&state),
            service.clone(),
            "127.0.0.1:0",
        );
        let supervisor = Supervisor::start(launcher, Arc::clone(&state), service.clone(), HoldDetector::default());
        Node {
            state,
            service,
            supervisor,
        }
    }

    fn tick(&mut self) -> OperatingState {
        let now = self.state.now_ms();
        self.supervisor.tick(now, false)
    }
}

fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn pair() -> (Arc<LoopbackRadio>, Arc<LoopbackRadio>) {
    let (a, b) = LoopbackRadio::pair(-45);
    (Arc::new(a), Arc::new(b))
}

#[test]
fn test_sender_drives_receiver_outputs() {
    let (tx_radio, rx_radio) = pair();
    let tx_board = Board::new();
    let rx_board = Board::new();

    let mut receiver = Node::start(Role::Receiver, rx_radio, &rx_board);
    let mut sender = Node::start(Role::Sender, tx_radio, &tx_board);
    assert_eq!(receiver.supervisor.mode(), DeviceMode::Running(Role::Receiver));
    assert_eq!(sender.supervisor.mode(), DeviceMode::Running(Role::Sender));

    tx_board.analog.set(0, 4095);
    tx_board.analog.set(1, 0);
    tx_board.switches.set(0, true);
    tx_board.switches.set(1, true);

    assert!(wait_until(|| rx_board.servos.duty(0) == Some(pulse_to_duty(2000))));
    assert_eq!(rx_board.servos.duty(1), Some(pulse_to_duty(1000)));
    assert!(wait_until(|| rx_board.lights.level(0)));

    assert_eq!(receiver.tick(), OperatingState::RunningConnected);
    assert_eq!(sender.tick(), OperatingState::RunningConnected);

    assert!(wait_until(|| receiver.service.telemetry().outputs[0] == 2000));
    let telemetry = receiver.service.telemetry();
    assert!(telemetry.connected);
    assert_eq!(telemetry.signal_quality, -45);
    assert_eq!(telemetry.channels[0], 4095);

    sender.supervisor.shutdown();
    receiver.supervisor.shutdown();
}

#[test]
fn test_link_loss_is_detected_on_both_ends() {
    let (tx_radio, rx_radio) = pair();
    let tx_board = Board::new();
    let rx_board = Board::new();

    let mut receiver = Node::start(Role::Receiver, rx_radio, &rx_board);
    let mut sender = Node::start(Role::Sender, Arc::clone(&tx_radio) as Arc<dyn Radio>, &tx_board);
    assert!(wait_until(|| receiver.state.link.is_connected()));

    tx_radio.set_link_up(false);
    assert!(wait_until(|| receiver.tick() == OperatingState::RunningDisconnected));
    assert!(wait_until(|| sender.tick() == OperatingState::RunningDisconnected));
    assert_eq!(receiver.state.link.status().signal_quality, -120);

    tx_radio.set_link_up(true);
    assert!(wait_until(|| receiver.tick() == OperatingState::RunningConnected));

    sender.supervisor.shutdown();
    receiver.supervisor.shutdown();
}

#[test]
fn test_config_mode_suspends_receiver() {
    let (tx_radio, rx_radio) = pair();
    let tx_board = Board::new();
    let rx_board = Board::new();

    let mut receiver = Node::start(Role::Receiver, rx_radio, &rx_board);
    let mut sender = Node::start(Role::Sender, tx_radio, &tx_board);

    tx_board.analog.set(0, 4095);
    tx_board.switches.set(1, true);
    assert!(wait_until(|| rx_board.servos.duty(0) == Some(pulse_to_duty(2000))));

    receiver.supervisor.enter_config_mode().unwrap();
    assert_eq!(receiver.supervisor.mode(), DeviceMode::ConfigMode);
    assert_eq!(receiver.supervisor.active_worker(), Some("config"));
    assert!(!rx_board.hardware.servos.is_leased());

    tx_board.analog.set(0, 0);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rx_board.servos.duty(0), Some(pulse_to_duty(2000)));

    receiver.service.request_exit();
    receiver.tick();
    assert_eq!(receiver.supervisor.mode(), DeviceMode::Running(Role::Receiver));
    assert!(wait_until(|| rx_board.servos.duty(0) == Some(pulse_to_duty(1000))));

    sender.tick();
    sender.supervisor.shutdown();
    receiver.supervisor.shutdown();
}

#[test]
fn test_malformed_frames_are_dropped() {
    let (tx_radio, rx_radio) = pair();
    let rx_board = Board::new();
    let mut receiver = Node::start(Role::Receiver, Arc::clone(&rx_radio) as Arc<dyn Radio>, &rx_board);

    rx_radio.inject(&[0xFF; 12]);
    rx_radio.inject(&[0xFF; 14]);
    rx_radio.inject(&[]);
    thread::sleep(Duration::from_millis(50));
    assert!(receiver.state.packets.latest().is_none());
    assert!(!receiver.state.link.is_connected());
    assert_eq!(rx_board.servos.duty(0), None);
    assert_eq!(receiver.tick(), OperatingState::RunningDisconnected);

    let mut frame = [0u8; 13];
    frame[..2].copy_from_slice(&4095u16.to_le_bytes());
    frame[12] = 0x80;
    rx_radio.inject(&frame);
    assert!(wait_until(|| rx_board.servos.duty(0) == Some(pulse_to_duty(2000))));
    assert!(receiver.state.link.is_connected());

    let telemetry = receiver.service.telemetry();
    assert_eq!(telemetry.digital, 0);
    assert!(telemetry.high_rate);

    drop(tx_radio);
    receiver.supervisor.shutdown();
}

#[test]
fn test_missing_hardware_falls_back_to_config_mode() {
    let (radio, _peer) = pair();
    let mut board = Board::new();
    board.hardware.servos = ResourceSlot::empty("servos");

    let node = Node::start(Role::Receiver, radio, &board);
    assert_eq!(node.supervisor.mode(), DeviceMode::ConfigMode);
    assert_eq!(node.supervisor.active_worker(), Some("config"));
    node.supervisor.shutdown();
}
