use crate::accessory::Characteristic;

pub const TOPIC_ROOT: &str = "lamp";
pub const SET_SUFFIX: &str = "set";
pub const BUTTON_TOPIC: &str = "button";
pub const AVAILABILITY_TOPIC: &str = "availability";

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

pub fn state_topic(device: &str, characteristic: Characteristic) -> String {
    format!("{TOPIC_ROOT}/{device}/{}", characteristic.name())
}

pub fn set_topic(device: &str, characteristic: Characteristic) -> String {
    format!("{TOPIC_ROOT}/{device}/{}/{SET_SUFFIX}", characteristic.name())
}

pub fn set_filter(device: &str) -> String {
    format!("{TOPIC_ROOT}/{device}/+/{SET_SUFFIX}")
}

pub fn button_topic(device: &str) -> String {
    format!("{TOPIC_ROOT}/{device}/{BUTTON_TOPIC}")
}

pub fn availability_topic(device: &str) -> String {
    format!("{TOPIC_ROOT}/{device}/{AVAILABILITY_TOPIC}")
}

pub fn parse_set_topic(device: &str, topic: &str) -> Option<Characteristic> {
    let rest = topic
        .strip_prefix(TOPIC_ROOT)?
        .strip_prefix('/')?
        .strip_prefix(device)?
        .strip_prefix('/')?;
    let name = rest.strip_suffix(SET_SUFFIX)?.strip_suffix('/')?;
    Characteristic::from_name(name)
}

pub fn parse_button_level(payload: &str) -> Option<bool> {
    match payload.trim() {
        "1" | "pressed" => Some(true),
        "0" | "released" => Some(false),
        _ => None,
    }
}
