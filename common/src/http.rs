use std::collections::HashMap;

use thiserror::Error;

use crate::{broker::Intent, types::Capabilities};

pub const ACKNOWLEDGEMENT: &str = "OK";

pub const CONTROL_ROUTES: [&str; 8] = [
    "/lamp",
    "/brightness",
    "/color",
    "/scene",
    "/effect",
    "/identify",
    "/status",
    "/scenes",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("missing '{0}' parameter")]
    MissingParameter(&'static str),
    #[error("invalid '{name}' parameter: {value}")]
    InvalidParameter { name: &'static str, value: String },
    #[error("unknown route {0}")]
    UnknownRoute(String),
    #[error("{0} is not supported by this lamp")]
    Unsupported(&'static str),
}

impl RequestError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownRoute(_) => 404,
            _ => 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Apply(Vec<Intent>),
    Status,
    Scenes,
}

pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

pub fn parse_control_request(
    path: &str,
    params: &HashMap<String, String>,
    capabilities: &Capabilities,
) -> Result<ControlRequest, RequestError> {
    let intents = match path {
        "/status" => return Ok(ControlRequest::Status),
        "/scenes" => return Ok(ControlRequest::Scenes),
        "/lamp" => {
            let on = match required(params, "state")? {
                "1" | "on" | "true" => true,
                "0" | "off" | "false" => false,
                other => {
                    return Err(RequestError::InvalidParameter {
                        name: "state",
                        value: other.to_string(),
                    })
                }
            };
            vec![Intent::SetOn(on)]
        }
        "/brightness" => vec![Intent::SetBrightness(level_param(params, "value")?)],
        "/color" => {
            if !capabilities.supports_color {
                return Err(RequestError::Unsupported("color"));
            }
            let hue = float_param(params, "h")?;
            let saturation = float_param(params, "s")?;
            let brightness = level_param(params, "b")?;
            vec![
                Intent::SetColor { hue, saturation },
                Intent::SetBrightness(brightness),
            ]
        }
        "/scene" => vec![Intent::ApplyScene(id_param(params, "id")?)],
        "/effect" => {
            if !capabilities.supports_effects {
                return Err(RequestError::Unsupported("effects"));
            }
            vec![Intent::SetEffect(id_param(params, "id")?)]
        }
        "/identify" => vec![Intent::Identify],
        other => return Err(RequestError::UnknownRoute(other.to_string())),
    };
    Ok(ControlRequest::Apply(intents))
}

fn required<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, RequestError> {
    params
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or(RequestError::MissingParameter(name))
}

fn id_param(params: &HashMap<String, String>, name: &'static str) -> Result<i64, RequestError> {
    let raw = required(params, name)?;
    raw.parse::<i64>()
        .map_err(|_| RequestError::InvalidParameter {
            name,
            value: raw.to_string(),
        })
}

// Accepts "42" as well as "42.7" (rounded); the broker clamps the range.
fn level_param(params: &HashMap<String, String>, name: &'static str) -> Result<i64, RequestError> {
    let raw = required(params, name)?;
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(value);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(|value| value.round() as i64)
        .ok_or_else(|| RequestError::InvalidParameter {
            name,
            value: raw.to_string(),
        })
}

fn float_param(params: &HashMap<String, String>, name: &'static str) -> Result<f32, RequestError> {
    let raw = required(params, name)?;
    raw.parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| RequestError::InvalidParameter {
            name,
            value: raw.to_string(),
        })
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => decoded.push(b' '),
            b'%' if index + 2 < bytes.len() => {
                let high = char::from(bytes[index + 1]).to_digit(16);
                let low = char::from(bytes[index + 2]).to_digit(16);
                match high.zip(low) {
                    Some((high, low)) => {
                        decoded.push((high * 16 + low) as u8);
                        index += 2;
                    }
                    None => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(query: &str) -> HashMap<String, String> {
        parse_query(query)
    }

    fn color() -> Capabilities {
        Capabilities::color()
    }

    #[test]
    fn query_is_split_and_decoded() {
        let parsed = params("h=120&s=50%2E5&name=reading+lamp&flag");
        assert_eq!(parsed.get("h").map(String::as_str), Some("120"));
        assert_eq!(parsed.get("s").map(String::as_str), Some("50.5"));
        assert_eq!(parsed.get("name").map(String::as_str), Some("reading lamp"));
        assert_eq!(parsed.get("flag").map(String::as_str), Some(""));
        assert!(params("").is_empty());
    }

    #[test]
    fn malformed_escape_is_kept_literally() {
        assert_eq!(
            params("v=100%").get("v").map(String::as_str),
            Some("100%")
        );
        assert_eq!(params("v=%zz").get("v").map(String::as_str), Some("%zz"));
    }

    #[test]
    fn lamp_route_maps_state() {
        assert_eq!(
            parse_control_request("/lamp", &params("state=1"), &color()),
            Ok(ControlRequest::Apply(vec![Intent::SetOn(true)]))
        );
        assert_eq!(
            parse_control_request("/lamp", &params("state=0"), &color()),
            Ok(ControlRequest::Apply(vec![Intent::SetOn(false)]))
        );
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let err = parse_control_request("/lamp", &params(""), &color()).unwrap_err();
        assert_eq!(err, RequestError::MissingParameter("state"));
        assert_eq!(err.status_code(), 400);

        let err = parse_control_request("/color", &params("h=10&s=20"), &color()).unwrap_err();
        assert_eq!(err, RequestError::MissingParameter("b"));

        for path in ["/brightness", "/scene", "/effect"] {
            assert!(parse_control_request(path, &params(""), &color()).is_err());
        }
    }

    #[test]
    fn out_of_range_brightness_is_passed_through_for_clamping() {
        assert_eq!(
            parse_control_request("/brightness", &params("value=150"), &color()),
            Ok(ControlRequest::Apply(vec![Intent::SetBrightness(150)]))
        );
        assert_eq!(
            parse_control_request("/brightness", &params("value=42.6"), &color()),
            Ok(ControlRequest::Apply(vec![Intent::SetBrightness(43)]))
        );
    }

    #[test]
    fn malformed_values_are_invalid() {
        assert_eq!(
            parse_control_request("/brightness", &params("value=max"), &color()),
            Err(RequestError::InvalidParameter {
                name: "value",
                value: "max".to_string()
            })
        );
        assert!(parse_control_request("/lamp", &params("state=2"), &color()).is_err());
        assert!(parse_control_request("/color", &params("h=NaN&s=1&b=1"), &color()).is_err());
    }

    #[test]
    fn ids_must_be_whole_numbers() {
        assert_eq!(
            parse_control_request("/scene", &params("id=2.6"), &color()),
            Err(RequestError::InvalidParameter {
                name: "id",
                value: "2.6".to_string()
            })
        );
        assert!(parse_control_request("/effect", &params("id=1.0"), &color()).is_err());
        assert_eq!(
            parse_control_request("/scene", &params("id=-1"), &color()),
            Ok(ControlRequest::Apply(vec![Intent::ApplyScene(-1)]))
        );
        assert_eq!(
            parse_control_request("/brightness", &params("value=42.7"), &color()),
            Ok(ControlRequest::Apply(vec![Intent::SetBrightness(43)]))
        );
    }

    #[test]
    fn color_route_sets_color_then_brightness() {
        assert_eq!(
            parse_control_request("/color", &params("h=240&s=80&b=60"), &color()),
            Ok(ControlRequest::Apply(vec![
                Intent::SetColor {
                    hue: 240.0,
                    saturation: 80.0
                },
                Intent::SetBrightness(60),
            ]))
        );
    }

    #[test]
    fn capability_routes_are_rejected_on_monochrome() {
        let monochrome = Capabilities::monochrome_with_scenes();
        assert_eq!(
            parse_control_request("/color", &params("h=1&s=1&b=1"), &monochrome),
            Err(RequestError::Unsupported("color"))
        );
        assert_eq!(
            parse_control_request("/effect", &params("id=1"), &monochrome),
            Err(RequestError::Unsupported("effects"))
        );
        assert!(parse_control_request("/scene", &params("id=2"), &monochrome).is_ok());
    }

    #[test]
    fn read_routes_and_unknown_paths() {
        assert_eq!(
            parse_control_request("/status", &params(""), &color()),
            Ok(ControlRequest::Status)
        );
        assert_eq!(
            parse_control_request("/scenes", &params(""), &color()),
            Ok(ControlRequest::Scenes)
        );
        assert_eq!(
            parse_control_request("/identify", &params(""), &color()),
            Ok(ControlRequest::Apply(vec![Intent::Identify]))
        );

        let err = parse_control_request("/reboot", &params(""), &color()).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn every_control_route_is_known() {
        for route in CONTROL_ROUTES {
            let result = parse_control_request(route, &params(""), &color());
            assert!(!matches!(result, Err(RequestError::UnknownRoute(_))), "{route}");
        }
    }
}
