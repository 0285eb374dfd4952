use anyhow::{Context, Result};
use log::{LevelFilter, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use env_logger::Builder;

use rclink::adc::Mcp3208;
use rclink::buttons::HoldDetector;
use rclink::config::{ConfigStore, DeviceConfig, JsonFileStore};
use rclink::gpio::{PinOutputs, SoftPwmServos, SwitchInputs};
use rclink::hal::{AnalogInputs, DigitalInputs, DigitalOutputs, DutyOutputs, SenderSwitches};
use rclink::indicator::StatusIndicator;
use rclink::mode::Supervisor;
use rclink::options::Options;
use rclink::packet::CHANNEL_COUNT;
use rclink::radio::{Radio, UdpRadio};
use rclink::service::ConfigService;
use rclink::shared::NodeState;
use rclink::tasks::{Hardware, NodeLauncher, ResourceSlot, run_periodic};

const SERVO_PINS: [u8; CHANNEL_COUNT] = [17, 27, 22, 23, 24, 25];
const LIGHT_PINS: [u8; 7] = [5, 6, 13, 19, 26, 20, 21];
const SWITCH_PINS: [u8; 5] = [12, 18, 14, 15, 2];
const LIGHT_SWITCHES: [usize; 4] = [0, 1, 2, 3];
const RATE_SWITCH: usize = 4;
const MODE_BUTTON_PIN: u8 = 4;
const STATUS_LED_PIN: u8 = 16;
const SUPERVISOR_PERIOD_MS: u64 = 10;

fn hardware() -> Hardware {
    let analog = Mcp3208::new(CHANNEL_COUNT).map(|adc| Box::new(adc) as Box<dyn AnalogInputs>);
    let switches = SwitchInputs::new(&SWITCH_PINS).map(|inputs| SenderSwitches {
        inputs: Box::new(inputs),
        lights: LIGHT_SWITCHES.to_vec(),
        rate: Some(RATE_SWITCH),
    });
    let servos = SoftPwmServos::new(&SERVO_PINS).map(|pwm| Box::new(pwm) as Box<dyn DutyOutputs>);
    let lights = PinOutputs::new(&LIGHT_PINS).map(|pins| Box::new(pins) as Box<dyn DigitalOutputs>);

    Hardware {
        analog: ResourceSlot::from_result("adc", analog),
        switches: ResourceSlot::from_result("switches", switches),
        servos: ResourceSlot::from_result("servos", servos),
        lights: ResourceSlot::from_result("lights", lights),
    }
}

fn main() -> Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let options = Options::from_env();
    info!("Starting RC link with {:?}", options);

    let store = Arc::new(JsonFileStore::new(options.config_path.clone()));
    let config = store.load().unwrap_or_else(|e| {
        error!("Cannot load settings from {}: {}", options.config_path.display(), e);
        DeviceConfig::default()
    });
    info!(
        "Role {}, radio channel {}, peer {}, configured {}",
        config.role, config.radio_channel, config.peer, config.configured
    );

    let radio: Arc<dyn Radio> = Arc::new(
        UdpRadio::open(options.udp_base_port, config.radio_channel, &options.interface)
            .context("opening radio")?,
    );

    let state = Arc::new(NodeState::new(config));
    let service = ConfigService::new(Arc::clone(&state), store);
    let launcher = NodeLauncher::new(
        radio,
        hardware(),
        Arc::clone(&state),
        service.clone(),
        options.ws_addr.clone(),
    );

    let mut mode_button = match SwitchInputs::new(&[MODE_BUTTON_PIN]) {
        Ok(button) => Some(button),
        Err(e) => {
            warn!("Mode button unavailable: {}", e);
            None
        }
    };
    let mut status_led = match PinOutputs::new(&[STATUS_LED_PIN]) {
        Ok(pin) => Some(StatusIndicator::new(Box::new(pin), 0)),
        Err(e) => {
            warn!("Status LED unavailable: {}", e);
            None
        }
    };

    let mut supervisor = Supervisor::start(launcher, Arc::clone(&state), service, HoldDetector::default());

    let running_forever = AtomicBool::new(false);
    run_periodic(&running_forever, Duration::from_millis(SUPERVISOR_PERIOD_MS), || {
        let now = state.now_ms();
        let pressed = match mode_button.as_mut() {
            Some(button) => button.read_pin(0).unwrap_or_else(|e| {
                warn!("Mode button read failed: {}", e);
                false
            }),
            None => false,
        };

        let operating = supervisor.tick(now, pressed);
        if let Some(led) = status_led.as_mut() {
            led.update(operating, now);
        }
    });

    supervisor.shutdown();
    Ok(())
}
