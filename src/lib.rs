pub mod audio;
pub mod calibration;
pub mod config;
pub mod coordinator;
pub mod counter;
pub mod gate;
pub mod logging;
pub mod pose;
pub mod protocol;
pub mod session;
pub mod signal;
pub mod stability;
pub mod supervisor;
pub mod timer;
