pub mod adc;
pub mod buttons;
pub mod config;
pub mod error;
pub mod gpio;
pub mod hal;
pub mod indicator;
pub mod link;
pub mod mapping;
pub mod mode;
pub mod options;
pub mod packet;
pub mod radio;
pub mod service;
pub mod shared;
pub mod tasks;
pub mod websocket;
