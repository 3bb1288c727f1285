// ABOUTME: The message registry — the set of IDL names a peer is willing to
// ABOUTME: decode as JSON, standing in for `original_source/message.go`'s reflection table.

use std::collections::HashSet;
use std::sync::{OnceLock, RwLock};

fn registry() -> &'static RwLock<HashSet<String>> {
    static REGISTRY: OnceLock<RwLock<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashSet::new()))
}

/// Declare that `idl_name` is a known message type. Rust has no reflection
/// registry to map an IDL name back to a concrete struct (spec §4.1's
/// `Message` kind), so registration only records that the name is expected;
/// callers decode the JSON payload themselves via `serde_json::from_value`
/// against whatever type they already know to expect.
pub fn register_message(idl_name: &str) {
    registry().write().unwrap().insert(idl_name.to_string());
}

pub fn is_registered(idl_name: &str) -> bool {
    registry().read().unwrap().contains(idl_name)
}

/// Decode a message payload into `T`, requiring that `idl_name` was
/// registered first (mirrors `messageNameIDL2Golang` lookup failing with
/// `errBadRequestMessage` before attempting `json.Unmarshal`).
pub fn decode_message<T: serde::de::DeserializeOwned>(
    idl_name: &str,
    data: &[u8],
) -> Result<T, crate::error::RequestError> {
    if !is_registered(idl_name) {
        return Err(crate::error::RequestError::UnknownMessage(idl_name.to_string()));
    }
    serde_json::from_slice(data)
        .map_err(|e| crate::error::RequestError::Message(format!("bad message payload for {idl_name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Quotient {
        q: i64,
        r: i64,
    }

    #[test]
    fn unregistered_message_rejected() {
        let err = decode_message::<Quotient>("Unregistered", b"{}").unwrap_err();
        assert!(matches!(err, crate::error::RequestError::UnknownMessage(_)));
    }

    #[test]
    fn registered_message_decodes() {
        register_message("quotient_test::Quotient");
        let v: Quotient = decode_message("quotient_test::Quotient", br#"{"q":3,"r":1}"#).unwrap();
        assert_eq!(v, Quotient { q: 3, r: 1 });
    }
}
