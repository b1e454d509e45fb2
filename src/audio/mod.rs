// Audio module - WAV codec, duplex transport and offline alignment

pub mod capture;
pub mod clock;
pub mod engine;
pub mod format_conversion;
pub mod mixer;
pub mod parameters;
pub mod playback;
pub mod processing;
pub mod transport;
pub mod virtual_device;
pub mod wav;
