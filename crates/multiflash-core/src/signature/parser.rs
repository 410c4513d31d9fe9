//! Signature decoding
//!
//! A signature is a fixed 24-character ASCII window starting at the first
//! `multi-` in the image. Two grammars exist:
//!
//! ```text
//! v1: multi-(avr|stm|orx)-([a-z]{5})-(\d{8})
//! v2: multi-x([a-z0-9]{8})-(\d{8})
//! ```
//!
//! v1 is always tried first.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use bitflags::bitflags;

use super::types::{ChannelOrder, FirmwareSignature, ModuleType, SignatureFormat, TelemetryType};
use crate::error::SignatureError;

/// Literal that introduces a signature
pub const SIGNATURE_MARKER: &[u8; 6] = b"multi-";

/// Length of the signature window
pub const SIGNATURE_LEN: usize = 24;

const V2_PREFIX: &str = "multi-x";

const MODULE_TYPE_MASK: u32 = 0x0000_0003;
const CHANNEL_ORDER_MASK: u32 = 0x0000_007C;
const CHANNEL_ORDER_SHIFT: u32 = 2;
const TELEMETRY_TYPE_MASK: u32 = 0x0000_0C00;
const TELEMETRY_TYPE_SHIFT: u32 = 10;

bitflags! {
    /// Single-bit options of a packed-hex flag word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PackedFlags: u32 {
        /// Built to run behind a bootloader
        const BOOTLOADER_SUPPORT = 1 << 7;
        /// CHECK_FOR_BOOTLOADER defined
        const CHECK_FOR_BOOTLOADER = 1 << 8;
        /// INVERT_TELEMETRY defined
        const INVERT_TELEMETRY = 1 << 9;
        /// DEBUG_SERIAL defined
        const DEBUG_SERIAL = 1 << 12;
    }
}

/// Result of looking for a signature in an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureScan {
    /// No `multi-` marker anywhere in the image
    Absent,
    /// Marker present but the window could not be decoded
    Unparsable(SignatureError),
    /// Signature decoded
    Found(FirmwareSignature),
}

/// Offset of the first signature marker, if any
pub fn find_marker(image: &[u8]) -> Option<usize> {
    image
        .windows(SIGNATURE_MARKER.len())
        .position(|w| w == SIGNATURE_MARKER)
}

/// Locate and decode the signature, reporting why decoding failed
pub fn scan(image: &[u8]) -> SignatureScan {
    let Some(offset) = find_marker(image) else {
        return SignatureScan::Absent;
    };

    let Some(window) = image.get(offset..offset + SIGNATURE_LEN) else {
        return SignatureScan::Unparsable(SignatureError::Truncated { offset });
    };

    let text = match core::str::from_utf8(window) {
        Ok(text) if text.is_ascii() => text,
        _ => {
            return SignatureScan::Unparsable(SignatureError::UnknownFormat(
                String::from_utf8_lossy(window).into_owned(),
            ))
        }
    };

    if let Some(sig) = decode_v1(text) {
        return SignatureScan::Found(sig);
    }

    match decode_v2(text) {
        Ok(Some(sig)) => SignatureScan::Found(sig),
        Ok(None) => SignatureScan::Unparsable(SignatureError::UnknownFormat(text.to_string())),
        Err(e) => SignatureScan::Unparsable(e),
    }
}

/// Decode the signature of a firmware image
///
/// Malformed signatures are logged and reported as `None`; callers must
/// then fall back to conservative size limits.
pub fn parse(image: &[u8]) -> Option<FirmwareSignature> {
    match scan(image) {
        SignatureScan::Found(sig) => {
            log::debug!("Firmware signature: {}", sig.raw);
            Some(sig)
        }
        SignatureScan::Unparsable(e) => {
            log::warn!("Ignoring firmware signature: {:?}", e);
            None
        }
        SignatureScan::Absent => None,
    }
}

fn decode_v1(text: &str) -> Option<FirmwareSignature> {
    let bytes = text.as_bytes();
    if bytes[9] != b'-' || bytes[15] != b'-' {
        return None;
    }

    let module_type = match &text[6..9] {
        "avr" => ModuleType::Avr,
        "stm" => ModuleType::Stm32,
        "orx" => ModuleType::OrangeRx,
        _ => return None,
    };

    let flags = &bytes[10..15];
    if !flags.iter().all(u8::is_ascii_lowercase) {
        return None;
    }

    let digits = &text[16..24];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let telemetry_type = match flags[2] {
        b't' => TelemetryType::OpenTx,
        b's' => TelemetryType::ErskyTx,
        _ => TelemetryType::Undefined,
    };

    Some(FirmwareSignature {
        format: SignatureFormat::V1,
        module_type,
        channel_order: ChannelOrder::Unknown,
        bootloader_support: flags[0] == b'b',
        check_for_bootloader: flags[1] == b'c',
        telemetry_type,
        invert_telemetry: flags[3] == b'i',
        debug_serial: flags[4] == b'd',
        version: join_version(digits, true),
        raw: text.to_string(),
    })
}

fn decode_v2(text: &str) -> Result<Option<FirmwareSignature>, SignatureError> {
    if !text.starts_with(V2_PREFIX) || text.as_bytes()[15] != b'-' {
        return Ok(None);
    }

    let hex = &text[7..15];
    if !hex
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Ok(None);
    }

    let digits = &text[16..24];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }

    let word = u32::from_str_radix(hex, 16)
        .map_err(|e| SignatureError::Unparsable(format!("flag word '{}': {}", hex, e)))?;

    Ok(Some(decode_flag_word(word, digits, text)))
}

/// Build a signature from a packed-hex flag word and its version digits
fn decode_flag_word(word: u32, digits: &str, raw: &str) -> FirmwareSignature {
    let flags = PackedFlags::from_bits_truncate(word);

    let module_type = match word & MODULE_TYPE_MASK {
        0 => ModuleType::Avr,
        1 => ModuleType::Stm32,
        3 => ModuleType::OrangeRx,
        _ => ModuleType::Unknown,
    };

    let order_index = ((word & CHANNEL_ORDER_MASK) >> CHANNEL_ORDER_SHIFT) as u8;

    let telemetry_type = match (word & TELEMETRY_TYPE_MASK) >> TELEMETRY_TYPE_SHIFT {
        2 => TelemetryType::OpenTx,
        1 => TelemetryType::ErskyTx,
        _ => TelemetryType::Undefined,
    };

    FirmwareSignature {
        format: SignatureFormat::V2,
        module_type,
        channel_order: ChannelOrder::from_index(order_index),
        bootloader_support: flags.contains(PackedFlags::BOOTLOADER_SUPPORT),
        check_for_bootloader: flags.contains(PackedFlags::CHECK_FOR_BOOTLOADER),
        telemetry_type,
        invert_telemetry: flags.contains(PackedFlags::INVERT_TELEMETRY),
        debug_serial: flags.contains(PackedFlags::DEBUG_SERIAL),
        version: join_version(digits, false),
        raw: raw.to_string(),
    }
}

/// Turn `AABBCCDD` into `AA.BB.CC.DD`, optionally dropping leading zeros
///
/// A trimmed field keeps one digit: `00` becomes `0`, not an empty part.
fn join_version(digits: &str, trim: bool) -> String {
    let parts: Vec<&str> = (0..4)
        .map(|i| {
            let field = &digits[i * 2..i * 2 + 2];
            if trim {
                match field.trim_start_matches('0') {
                    "" => "0",
                    trimmed => trimmed,
                }
            } else {
                field
            }
        })
        .collect();
    parts.join(".")
}
