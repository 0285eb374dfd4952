use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, WebSocket, accept};

use log::{debug, error, info, warn};

use crate::service::{ConfigService, Telemetry};

const ACCEPT_POLL_MS: u64 = 20;
const CLIENT_POLL_MS: u64 = 100;
const HANDSHAKE_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    GetConfig,
    SetConfig { config: Map<String, Value> },
    GetTelemetry,
    Reset,
    Exit,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Config { config: Map<String, Value> },
    Telemetry(Telemetry),
    Exiting,
    Error { message: String },
}

pub fn handle_request(service: &ConfigService, text: &str) -> Response {
    let request = match serde_json::from_str::<Request>(text) {
        Ok(request) => request,
        Err(e) => {
            return Response::Error {
                message: format!("bad request: {}", e),
            };
        }
    };

    match request {
        Request::GetConfig => Response::Config {
            config: service.get_config().to_entries(),
        },
        Request::SetConfig { config } => match service.set_config(&config) {
            Ok(updated) => Response::Config {
                config: updated.to_entries(),
            },
            Err(e) => {
                warn!("Settings update failed: {}", e);
                Response::Error { message: e.to_string() }
            }
        },
        Request::GetTelemetry => Response::Telemetry(service.telemetry()),
        Request::Reset => match service.reset() {
            Ok(defaults) => Response::Config {
                config: defaults.to_entries(),
            },
            Err(e) => Response::Error { message: e.to_string() },
        },
        Request::Exit => {
            info!("Exit from configuration mode requested");
            service.request_exit();
            Response::Exiting
        }
    }
}

/// Accept configuration clients until `stop` is raised, then wait for
/// every client thread to finish.
pub fn serve(listener: TcpListener, service: ConfigService, stop: Arc<AtomicBool>) {
    if let Err(e) = listener.set_nonblocking(true) {
        error!("Cannot poll configuration listener: {}", e);
        return;
    }
    if let Ok(addr) = listener.local_addr() {
        info!("Configuration WebSocket listening on {}", addr);
    }

    let mut clients: Vec<JoinHandle<()>> = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Configuration client from {}", peer);
                let service = service.clone();
                let stop = Arc::clone(&stop);
                match thread::Builder::new()
                    .name("config-client".into())
                    .spawn(move || client_session(stream, service, stop))
                {
                    Ok(handle) => clients.push(handle),
                    Err(e) => error!("Cannot spawn configuration client thread: {}", e),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
            Err(e) => {
                error!("Connection error: {}", e);
                thread::sleep(Duration::from_millis(ACCEPT_POLL_MS));
            }
        }
        clients.retain(|handle| !handle.is_finished());
    }

    for handle in clients {
        let _ = handle.join();
    }
    info!("Configuration WebSocket closed");
}

fn open_session(stream: TcpStream) -> Option<WebSocket<TcpStream>> {
    let prepared = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(Duration::from_millis(HANDSHAKE_TIMEOUT_MS))));
    if let Err(e) = prepared {
        warn!("Cannot configure client socket: {}", e);
        return None;
    }

    let websocket = match accept(stream) {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {}", e);
            return None;
        }
    };
    if let Err(e) = websocket
        .get_ref()
        .set_read_timeout(Some(Duration::from_millis(CLIENT_POLL_MS)))
    {
        warn!("Cannot configure client socket: {}", e);
        return None;
    }
    Some(websocket)
}

fn client_session(stream: TcpStream, service: ConfigService, stop: Arc<AtomicBool>) {
    let Some(mut websocket) = open_session(stream) else {
        return;
    };
    info!("New configuration client connected");

    while !stop.load(Ordering::Relaxed) {
        match websocket.read() {
            Ok(Message::Text(text)) => {
                let response = handle_request(&service, &text);
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        if websocket.send(Message::Text(json)).is_err() {
                            info!("Configuration client disconnected");
                            return;
                        }
                    }
                    Err(e) => error!("JSON serialization error: {}", e),
                }
            }
            Ok(Message::Close(_)) => {
                info!("Configuration client disconnected");
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                info!("Configuration client disconnected");
                return;
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                return;
            }
        }
    }

    let _ = websocket.close(None);
    let _ = websocket.flush();
}
