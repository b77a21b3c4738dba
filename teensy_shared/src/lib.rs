// teensy_shared: types shared by the emulator host and firmware modules

pub mod abi;
pub mod firmware;
pub mod remote;

pub use abi::{HostApi, ModuleDescriptor, TmElements, ABI_VERSION};
