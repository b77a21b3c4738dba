// teensy_emu: host-side runtime for Teensy firmware modules

pub mod abi;
pub mod config;
pub mod hardware;
pub mod host_os;
pub mod module_manager;
pub mod scheduler;

pub use teensy_shared::remote;

pub use config::{ConfigError, EmulatorConfig, load_config};
pub use hardware::Board;
pub use host_os::EmulatorHost;
pub use module_manager::{Firmware, FnFirmware, LoadError, ModuleRuntime, ModuleState};
