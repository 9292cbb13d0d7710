//! Well-known message codes.
//!
//! Codes identify the business meaning of a message. Only the exempt codes
//! matter to the core: they stay readable by the server's auth stage and are
//! never compressed or encrypted.

/// Device authorization, legacy first step
pub const AUTH_STEP1: &str = "MSGAUTH00000";
/// Device authorization, credential step
pub const AUTH_STEP2: &str = "MSGAUTH00002";
/// Keep-alive request
pub const KEEP_ALIVE: &str = "MSGBA0030001";

/// Attribute group upload (default code)
pub const ATTR_GROUP: &str = "Basic-AttrGroup";
/// Provisioning data
pub const PROVISIONING: &str = "Basic-Provisioning";
/// Device activation
pub const ACTIVATION: &str = "MSGBA0110001";
/// Leaf (sub-device) registration
pub const LEAF_REGISTRATION: &str = "MSGBA0110003";

/// Firmware upgrade request from the server
pub const FIRMWARE_UPGRADE: &str = "MSGBA0420001";
/// Firmware upgrade progress report
pub const FIRMWARE_PROGRESS: &str = "MSGBA0420003";
/// Firmware version report
pub const FIRMWARE_VERSION: &str = "MSGBA0420004";
/// Firmware upgrade result
pub const FIRMWARE_RESULT: &str = "MSGBA0420005";
/// Firmware version request
pub const FIRMWARE_VERSION_REQUEST: &str = "MSGBA0420007";

/// File upload URI request
pub const FILE_UPLOAD: &str = "MSGBA0410001";
/// File upload completion
pub const FILE_UPLOAD_DONE: &str = "MSGBA0410017";

/// Attribute notification
pub const NOTIFY_ATTR: &str = "MSGBA0300001";
/// Event notification
pub const NOTIFY_EVENT: &str = "MSGBA0300003";
/// Control result notification
pub const NOTIFY_CONTROL: &str = "MSGBA0300007";
/// Leaf attribute notification
pub const NOTIFY_LEAF_ATTR: &str = "MSGBA0300027";
/// Leaf event notification
pub const NOTIFY_LEAF_EVENT: &str = "MSGBA0300029";

const MSGBA_PREFIX: &str = "MSGBA";

/// Codes that are never compressed or encrypted.
pub fn is_exempt(code: &str) -> bool {
    matches!(code, AUTH_STEP1 | AUTH_STEP2 | KEEP_ALIVE)
}

/// Answer code for a request code.
///
/// `MSGBA` codes are answered with the next number (`MSGBA0420001` ->
/// `MSGBA0420002`); other codes are echoed.
pub fn answer_code(code: &str) -> String {
    code.strip_prefix(MSGBA_PREFIX)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u64>().ok())
        .and_then(|n| n.checked_add(1))
        .map_or_else(
            || code.to_string(),
            |next| format!("{MSGBA_PREFIX}{next:07}"),
        )
}
