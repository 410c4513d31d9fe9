//! Firmware build signature
//!
//! MULTI-Module firmware embeds a short ASCII signature describing how it
//! was compiled. The signature is optional: an image without one simply has
//! unknown size limits.

mod parser;
mod types;

pub use parser::{
    find_marker, parse, scan, PackedFlags, SignatureScan, SIGNATURE_LEN, SIGNATURE_MARKER,
};
pub use types::{
    ChannelOrder, FirmwareSignature, ModuleType, SignatureFormat, TelemetryType, CHANNEL_ORDERS,
};

/// USB string descriptors the Maple USB stack links into the image
const MAPLE_USB_MARKER: &[u8] = b"M\0a\0p\0l\0e\0\x12\x03L\0e\0a\0f\0L\0a\0b\0s\0\x12\x01";

/// Whether the image was built with the Maple USB stack
///
/// Firmware without it cannot be reflashed over the native USB port, so it
/// must never be written through that transport.
pub fn supports_native_usb(image: &[u8]) -> bool {
    image
        .windows(MAPLE_USB_MARKER.len())
        .any(|w| w == MAPLE_USB_MARKER)
}
