// Protocol constants for the LabJack U3

/// LabJack USB vendor ID
pub const VID: u16 = 0x0CD5;

/// U3 USB product ID
pub const PID: u16 = 0x0003;

/// Product ID reported by ConfigU3 and stored in calibration records
pub const U3_PRODUCT_ID: u8 = 3;

/// Bulk OUT endpoint for commands
pub const ENDPOINT_OUT: u8 = 0x01;

/// Bulk IN endpoint for command responses
pub const ENDPOINT_IN: u8 = 0x82;

/// Size of the extended packet header (6 bytes)
pub const HEADER_SIZE: usize = 6;

/// Largest packet the U3 accepts or returns on the command endpoints
pub const MAX_PACKET_SIZE: usize = 64;

/// Command byte shared by every extended command
pub const EXTENDED_COMMAND_BYTE: u8 = 0xF8;

/// ConfigU3 request size (26 bytes)
pub const CONFIG_U3_REQUEST_SIZE: usize = 26;

/// ConfigU3 response size (38 bytes)
pub const CONFIG_U3_RESPONSE_SIZE: usize = 38;

/// ConfigIO request and response size (12 bytes)
pub const CONFIG_IO_SIZE: usize = 12;

/// ConfigTimerClock request and response size (10 bytes)
pub const CONFIG_TIMER_CLOCK_SIZE: usize = 10;

/// ReadMem response size (40 bytes)
pub const READ_MEM_RESPONSE_SIZE: usize = 40;

/// Number of calibration memory blocks read at session open
pub const CALIBRATION_BLOCKS: u8 = 5;

/// Calibration constants decoded from each block
pub const CONSTANTS_PER_BLOCK: usize = 4;

/// Total number of calibration constants
pub const CALIBRATION_CONSTANTS: usize = 20;

/// Offset of the first result byte in a Feedback response
/// (error code, error frame and echo precede it)
pub const FEEDBACK_DATA_OFFSET: usize = 9;

/// Offset of the ack array in an I2C response
pub const I2C_ACK_OFFSET: usize = 8;

/// Offset of the received I2C bytes in an I2C response
pub const I2C_DATA_OFFSET: usize = 12;

/// Most bytes a single I2C command can send
pub const I2C_MAX_SEND: usize = 50;

/// Most bytes a single I2C command can receive
pub const I2C_MAX_RECEIVE: usize = 52;

/// I2C address of the EEPROM on an LJTDAC accessory
pub const TDAC_EEPROM_ADDRESS: u8 = 0xA0;

/// EEPROM memory address of the LJTDAC DACA slope
pub const TDAC_CALIBRATION_MEMORY_ADDRESS: u8 = 64;

/// Number of calibration bytes stored on the LJTDAC EEPROM
pub const TDAC_CALIBRATION_SIZE: u8 = 32;

/// Highest FIO/EIO/CIO line number usable for digital IO
pub const MAX_DIGITAL_CHANNEL: u8 = 19;

/// Highest FIO/EIO line number that has an analog mode
pub const MAX_FLEXIBLE_CHANNEL: u8 = 15;

/// Positive channel of the internal temperature sensor
pub const TEMPERATURE_CHANNEL: u8 = 30;

/// Negative channel meaning Vref
pub const VREF_CHANNEL: u8 = 30;

/// Negative channel meaning single-ended (GND)
pub const SINGLE_ENDED_CHANNEL: u8 = 31;

/// Negative channel requesting the special 0-3.6 V range on hardware 1.30+
pub const SPECIAL_RANGE_CHANNEL: u8 = 32;
