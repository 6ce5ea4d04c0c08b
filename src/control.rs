//! Control-plane dispatcher
//!
//! Thin request/response surface the host process wires to its own RPC
//! channel. Arguments arrive as loosely-typed JSON maps with camelCase keys;
//! this layer validates them and forwards to the engine, nothing more.

use serde_json::Value;

use crate::injector::PhantomEngine;

pub const METHOD_START: &str = "startTtlInjector";
pub const METHOD_STOP: &str = "stopTtlInjector";

/// Control-plane errors, surfaced to the host as structured failures.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("bad_args: {0}")]
    BadArgs(&'static str),

    #[error("method not implemented: {0}")]
    NotImplemented(String),
}

pub type ControlResult<T> = Result<T, ControlError>;

/// Read an integer argument the way a method-channel codec delivers it:
/// any JSON number is accepted, missing or non-numeric becomes 0.
fn int_arg(args: &serde_json::Map<String, Value>, key: &str) -> i64 {
    match args.get(key) {
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        None => 0,
    }
}

fn str_arg<'a>(args: &'a serde_json::Map<String, Value>, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Dispatch one control request against the engine.
pub fn dispatch(
    engine: &PhantomEngine,
    method: &str,
    args: Option<&Value>,
) -> ControlResult<Value> {
    log::debug!("control request: {}", method);
    match method {
        METHOD_START => {
            let args = match args.and_then(Value::as_object) {
                Some(map) => map,
                None => return Err(ControlError::BadArgs("Expected map for startTtlInjector")),
            };
            let server_ip = str_arg(args, "serverIp");
            let server_port = int_arg(args, "serverPort");
            if server_ip.is_empty() || server_port <= 0 || server_port > 65535 {
                return Err(ControlError::BadArgs("Missing serverIp/serverPort"));
            }
            let ok = engine.start(server_ip, server_port as u16);
            log::debug!("startTtlInjector result ok={}", ok);
            Ok(Value::Bool(ok))
        }
        METHOD_STOP => {
            engine.stop();
            Ok(Value::Bool(true))
        }
        other => Err(ControlError::NotImplemented(other.to_string())),
    }
}
