//! Device mode arbitration.
//!
//! The node is either running its data-link role (sender or receiver) or in
//! configuration mode with the configuration interface up. Exactly one
//! worker is live at a time: the old one is always stopped and joined before
//! the next one is launched. A failed launch puts the previous worker back.

use std::sync::Arc;

use log::{error, info, warn};

use crate::buttons::HoldDetector;
use crate::config::Role;
use crate::error::TaskError;
use crate::indicator::OperatingState;
use crate::service::ConfigService;
use crate::shared::NodeState;

const RELAUNCH_INTERVAL_MS: u64 = 1000;

/// A running task that can be stopped. `stop` returns once the task has
/// released everything it held.
pub trait Worker: Send {
    fn name(&self) -> &str;
    fn stop(self: Box<Self>);
}

pub trait Launcher {
    fn launch_role(&mut self, role: Role) -> Result<Box<dyn Worker>, TaskError>;
    fn launch_config(&mut self) -> Result<Box<dyn Worker>, TaskError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Running(Role),
    ConfigMode,
}

pub struct Supervisor<L: Launcher> {
    launcher: L,
    state: Arc<NodeState>,
    service: ConfigService,
    mode: DeviceMode,
    active: Option<Box<dyn Worker>>,
    hold: HoldDetector,
    last_relaunch_ms: Option<u64>,
}

impl<L: Launcher> Supervisor<L> {
    /// Start in `Running(role)` with the persisted role. If that role cannot
    /// start, fall back to configuration mode so the device stays reachable.
    pub fn start(launcher: L, state: Arc<NodeState>, service: ConfigService, hold: HoldDetector) -> Self {
        let role = state.config.load().role;
        let mut supervisor = Supervisor {
            launcher,
            state,
            service,
            mode: DeviceMode::Running(role),
            active: None,
            hold,
            last_relaunch_ms: None,
        };

        match supervisor.launcher.launch_role(role) {
            Ok(worker) => {
                info!("Started {} role", role);
                supervisor.active = Some(worker);
            }
            Err(e) => {
                error!("Cannot start {} role: {}", role, e);
                match supervisor.launcher.launch_config() {
                    Ok(worker) => {
                        warn!("Entered configuration mode instead");
                        supervisor.mode = DeviceMode::ConfigMode;
                        supervisor.active = Some(worker);
                    }
                    Err(e) => error!("Cannot start configuration interface: {}", e),
                }
            }
        }
        supervisor
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn is_config_mode(&self) -> bool {
        self.mode == DeviceMode::ConfigMode
    }

    pub fn active_worker(&self) -> Option<&str> {
        self.active.as_deref().map(|w| w.name())
    }

    pub fn operating_state(&self) -> OperatingState {
        OperatingState::from_flags(self.state.link.is_connected(), self.is_config_mode())
    }

    /// One supervisor period: link sweep, mode button, exit requests.
    pub fn tick(&mut self, now_ms: u64, button_pressed: bool) -> OperatingState {
        self.state.link.sweep(now_ms);

        if self.hold.update(button_pressed, now_ms) {
            let result = match self.mode {
                DeviceMode::Running(_) => self.enter_config_mode(),
                DeviceMode::ConfigMode => self.leave_config_mode(),
            };
            if let Err(e) = result {
                warn!("Mode change refused: {}", e);
            }
        }

        if self.service.take_exit_request() && self.is_config_mode() {
            if let Err(e) = self.leave_config_mode() {
                warn!("Leaving configuration mode refused: {}", e);
            }
        }

        if self.active.is_none() {
            self.relaunch(now_ms);
        }

        self.operating_state()
    }

    fn stop_active(&mut self) {
        if let Some(worker) = self.active.take() {
            let name = worker.name().to_string();
            worker.stop();
            info!("Stopped {}", name);
        }
    }

    pub fn enter_config_mode(&mut self) -> Result<(), TaskError> {
        let DeviceMode::Running(role) = self.mode else {
            return Ok(());
        };

        self.stop_active();
        match self.launcher.launch_config() {
            Ok(worker) => {
                self.active = Some(worker);
                self.mode = DeviceMode::ConfigMode;
                info!("Mode {:?} => {:?}", DeviceMode::Running(role), self.mode);
                Ok(())
            }
            Err(e) => {
                error!("Cannot start configuration interface: {}", e);
                match self.launcher.launch_role(role) {
                    Ok(worker) => self.active = Some(worker),
                    Err(e) => error!("Cannot restart {} role: {}", role, e),
                }
                Err(e)
            }
        }
    }

    /// Back to the role currently persisted, which may have been changed
    /// while in configuration mode.
    pub fn leave_config_mode(&mut self) -> Result<(), TaskError> {
        if self.mode != DeviceMode::ConfigMode {
            return Ok(());
        }

        let role = self.state.config.load().role;
        self.stop_active();
        match self.launcher.launch_role(role) {
            Ok(worker) => {
                self.active = Some(worker);
                self.mode = DeviceMode::Running(role);
                info!("Mode {:?} => {:?}", DeviceMode::ConfigMode, self.mode);
                Ok(())
            }
            Err(e) => {
                error!("Cannot start {} role: {}", role, e);
                match self.launcher.launch_config() {
                    Ok(worker) => self.active = Some(worker),
                    Err(e) => error!("Cannot restart configuration interface: {}", e),
                }
                Err(e)
            }
        }
    }

    fn relaunch(&mut self, now_ms: u64) {
        if let Some(last) = self.last_relaunch_ms {
            if now_ms.saturating_sub(last) < RELAUNCH_INTERVAL_MS {
                return;
            }
        }
        self.last_relaunch_ms = Some(now_ms);

        let launched = match self.mode {
            DeviceMode::Running(role) => self.launcher.launch_role(role),
            DeviceMode::ConfigMode => self.launcher.launch_config(),
        };
        match launched {
            Ok(worker) => {
                info!("Relaunched {}", worker.name());
                self.active = Some(worker);
            }
            Err(e) => warn!("Relaunch in {:?} failed: {}", self.mode, e),
        }
    }

    pub fn shutdown(mut self) {
        self.stop_active();
    }
}
