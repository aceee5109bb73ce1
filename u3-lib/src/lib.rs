pub mod calibration;
pub mod checksum;
pub mod commands;
pub mod constants;
pub mod device;
pub mod error;
pub mod feedback;
pub mod ops;
pub mod packet;
pub mod probe;
pub mod transport;
pub mod usb;

// Re-export the session type and its collaborators for easy access
pub use calibration::{CalibrationInfo, HardwareVersion, TdacCalibrationInfo};
pub use device::{DeviceSelector, U3};
pub use error::U3Error;
pub use transport::{Connector, Transport};
pub use usb::{UsbConfig, UsbConnector, UsbTransport};
