//! The JSON message contract between VergeDB clients and the sync hub.
//!
//! [`ClientMessage`] and [`ServerMessage`] are the external contract
//! named in the interface spec: adapters (WebSocket, in-process,
//! whatever transport) translate bytes to/from these types but must
//! not rename or restructure the fields.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod messages;

pub use messages::{
    BatchSyncOp, BatchSyncResult, ClientMessage, CrdtSnapshot, ErrorPayload, PresencePayload,
    ServerMessage, SyncChange,
};

#[cfg(test)]
mod tests {
    use super::*;
    use verge_core::Value;

    #[test]
    fn client_message_tags_on_type_snake_case() {
        let msg = ClientMessage::Subscribe { collection: "docs".into() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["collection"], "docs");
    }

    #[test]
    fn server_message_error_round_trips_with_optional_code() {
        let msg = ServerMessage::Error { message: "bad path".into(), code: Some("bad_path".into()) };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("bad_path")),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ping_has_no_extra_fields() {
        let json = serde_json::to_value(&ClientMessage::Ping).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ping"}));
    }

    #[test]
    fn presence_cursor_round_trips_optional_payload() {
        let msg = ClientMessage::PresenceCursor {
            collection: "docs".into(),
            doc_id: "1".into(),
            position: Some(Value::I64(4)),
            selection: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::PresenceCursor { position, selection, .. } => {
                assert_eq!(position, Some(Value::I64(4)));
                assert_eq!(selection, None);
            }
            _ => panic!("wrong variant"),
        }
    }
}
