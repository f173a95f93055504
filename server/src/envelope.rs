//! Application-level message envelope exchanged by race clients.
//!
//! The hub never looks inside these: it forwards frame payloads as opaque
//! bytes. Clients (and tests) use this module to build and read them.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

/// Kind of payload carried by an [`Envelope`]. Serialized as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MsgType {
    Text = 0,
    Connect = 1,
}

impl From<MsgType> for u8 {
    fn from(typ: MsgType) -> Self {
        typ as u8
    }
}

impl TryFrom<u8> for MsgType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MsgType::Text),
            1 => Ok(MsgType::Connect),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message identifier
    pub id: Uuid,
    #[serde(rename = "type")]
    pub typ: MsgType,
    /// Client identifier
    pub user_id: Uuid,
    /// Message body, kept as raw JSON until the receiver asks for a type
    pub payload: Box<RawValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMsg {
    pub display_name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectMsg {
    pub user_id: Uuid,
    pub user_name: String,
}

impl Envelope {
    /// Build an envelope with a fresh id around `payload`.
    pub fn new<T: Serialize>(typ: MsgType, user_id: Uuid, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            typ,
            user_id,
            payload: serde_json::value::to_raw_value(payload)?,
        })
    }

    pub fn set_payload<T: Serialize>(&mut self, payload: &T) -> serde_json::Result<()> {
        self.payload = serde_json::value::to_raw_value(payload)?;
        Ok(())
    }

    /// Decode the payload as `T`.
    pub fn unwrap_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.payload.get())
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_uses_camel_case_and_integer_type() {
        let user = Uuid::now_v7();
        let env = Envelope::new(
            MsgType::Text,
            user,
            &TextMsg {
                display_name: "Lando".into(),
                body: "box box".into(),
            },
        )
        .unwrap();

        let json: serde_json::Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], 0);
        assert_eq!(json["userId"], user.to_string());
        assert_eq!(json["payload"]["displayName"], "Lando");
        assert_eq!(json["payload"]["body"], "box box");
    }

    #[test]
    fn payload_is_decoded_on_demand() {
        let raw = br#"{
            "id": "01890a5d-ac96-774b-bcce-b302099a8057",
            "type": 1,
            "userId": "01890a5d-ac96-774b-bcce-b302099a8058",
            "payload": {"userId": "01890a5d-ac96-774b-bcce-b302099a8058", "userName": "oscar"}
        }"#;

        let env = Envelope::from_slice(raw).unwrap();
        assert_eq!(env.typ, MsgType::Connect);

        let connect: ConnectMsg = env.unwrap_payload().unwrap();
        assert_eq!(connect.user_name, "oscar");
        assert_eq!(connect.user_id, env.user_id);
    }

    #[test]
    fn set_payload_replaces_body() {
        let mut env = Envelope::new(MsgType::Text, Uuid::now_v7(), &serde_json::json!({})).unwrap();
        env.set_payload(&TextMsg {
            display_name: "pit".into(),
            body: "tyres".into(),
        })
        .unwrap();

        let text: TextMsg = env.unwrap_payload().unwrap();
        assert_eq!(text.body, "tyres");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = br#"{"id":"01890a5d-ac96-774b-bcce-b302099a8057","type":7,
            "userId":"01890a5d-ac96-774b-bcce-b302099a8058","payload":null}"#;
        assert!(Envelope::from_slice(raw).is_err());
    }
}
