//! Wire frame definitions.
//!
//! Every frame is a CBOR array whose first element is the frame type tag:
//!
//! | Tag | Frame        | Fields                                      |
//! |-----|--------------|---------------------------------------------|
//! | 0   | IDENTITY     | id, cid                                     |
//! | 1   | PUBSUB       | topic, args                                 |
//! | 2   | RPC          | id, method, target, args                    |
//! | 3   | SETTING      | id, name, {cmd, ...opts}                    |
//! | 4   | RESPONSE     | id, status, payload                         |
//! | 9   | UNREGISTER   | id, cid                                     |
//! | 10  | REGISTER     | id, cid, tenant, public key PEM, version     |
//! | 11  | ATTESTATION  | id, cid, signature                          |
//!
//! Argument lists and payloads are carried in their tagged wire form; see
//! [`crate::table`] for the conversion to application values.

use std::fmt;

use ciborium::Value;
use uuid::Uuid;

use crate::error::{RembusError, Result};
use crate::status::Status;

/// Protocol version announced in REGISTER frames.
pub const PROTOCOL_VERSION: u8 = 1;

/// Length of a correlation id in bytes.
pub const MSG_ID_LENGTH: usize = 16;

/// Number of hexadecimal characters in a provisioning pin.
pub const PIN_LENGTH: usize = 8;

/// CBOR tag JavaScript encoders put around `Uint8Array` values.
const TYPED_ARRAY_TAG: u64 = 64;

/// Wire tag of IDENTITY frames.
pub const TYPE_IDENTITY: u8 = 0;
/// Wire tag of PUBSUB frames.
pub const TYPE_PUBSUB: u8 = 1;
/// Wire tag of RPC frames.
pub const TYPE_RPC: u8 = 2;
/// Wire tag of SETTING frames.
pub const TYPE_SETTING: u8 = 3;
/// Wire tag of RESPONSE frames.
pub const TYPE_RESPONSE: u8 = 4;
/// Wire tag of UNREGISTER frames.
pub const TYPE_UNREGISTER: u8 = 9;
/// Wire tag of REGISTER frames.
pub const TYPE_REGISTER: u8 = 10;
/// Wire tag of ATTESTATION frames.
pub const TYPE_ATTESTATION: u8 = 11;

/// A 128-bit correlation id pairing a request with its response.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgId([u8; MSG_ID_LENGTH]);

impl MsgId {
    /// Generates a random correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Generates a correlation id whose low 4 bytes carry the provisioning pin.
    ///
    /// The pin bytes are written in textual order, so pin `"11223344"` ends
    /// the id with `0x11 0x22 0x33 0x44`.
    pub fn with_pin(pin: &str) -> Result<Self> {
        let pin = parse_pin(pin)?;
        let mut id = Self::new();
        id.0[MSG_ID_LENGTH - 4..].copy_from_slice(&pin);
        Ok(id)
    }

    /// Creates a MsgId from raw bytes.
    pub fn from_bytes(bytes: [u8; MSG_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; MSG_ID_LENGTH] {
        &self.0
    }

    fn to_value(self) -> Value {
        Value::Bytes(self.0.to_vec())
    }

    fn from_value(value: Value) -> Result<Self> {
        let bytes = take_bytes(value, "id")?;
        let bytes: [u8; MSG_ID_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            RembusError::Deserialization(format!(
                "id must be {} bytes, got {}",
                MSG_ID_LENGTH,
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Default for MsgId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

impl fmt::Debug for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgId({})", self)
    }
}

/// Decodes an 8-hex-character provisioning pin into its 4 bytes.
pub fn parse_pin(pin: &str) -> Result<[u8; 4]> {
    if pin.len() != PIN_LENGTH {
        return Err(RembusError::Validation(format!(
            "pin must be {} hexadecimal characters, got {}",
            PIN_LENGTH,
            pin.len()
        )));
    }
    let mut out = [0u8; 4];
    hex::decode_to_slice(pin, &mut out)
        .map_err(|e| RembusError::Validation(format!("invalid pin {:?}: {}", pin, e)))?;
    Ok(out)
}

/// Command carried by a SETTING frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    /// Declare interest in a pub/sub topic.
    Subscribe,
    /// Withdraw interest in a pub/sub topic.
    Unsubscribe,
    /// Declare an RPC method served by this component.
    Expose,
    /// Withdraw an RPC method.
    Unexpose,
    /// Toggle broker-side queuing of pub/sub messages.
    Reactive,
}

impl SettingKind {
    /// Wire name of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            SettingKind::Subscribe => "subscribe",
            SettingKind::Unsubscribe => "unsubscribe",
            SettingKind::Expose => "expose",
            SettingKind::Unexpose => "unexpose",
            SettingKind::Reactive => "reactive",
        }
    }

    /// Parses a wire command name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "subscribe" => Some(SettingKind::Subscribe),
            "unsubscribe" => Some(SettingKind::Unsubscribe),
            "expose" => Some(SettingKind::Expose),
            "unexpose" => Some(SettingKind::Unexpose),
            "reactive" => Some(SettingKind::Reactive),
            _ => None,
        }
    }
}

/// Options map of a SETTING frame: `{cmd, status?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingCommand {
    /// The command.
    pub cmd: SettingKind,
    /// Optional boolean flag (used by `reactive`).
    pub status: Option<bool>,
}

impl SettingCommand {
    /// A command without options.
    pub fn new(cmd: SettingKind) -> Self {
        Self { cmd, status: None }
    }

    /// A command carrying a boolean status.
    pub fn with_status(cmd: SettingKind, status: bool) -> Self {
        Self {
            cmd,
            status: Some(status),
        }
    }

    fn to_value(self) -> Value {
        let mut entries = vec![(Value::from("cmd"), Value::from(self.cmd.as_str()))];
        if let Some(status) = self.status {
            entries.push((Value::from("status"), Value::Bool(status)));
        }
        Value::Map(entries)
    }

    fn from_value(value: Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(RembusError::Deserialization(
                "setting options must be a map".to_string(),
            ));
        };
        let mut cmd = None;
        let mut status = None;
        for (key, value) in entries {
            match (key, value) {
                (Value::Text(k), Value::Text(v)) if k == "cmd" => {
                    cmd = Some(SettingKind::parse(&v).ok_or_else(|| {
                        RembusError::Deserialization(format!("unknown setting command {:?}", v))
                    })?);
                }
                (Value::Text(k), Value::Bool(b)) if k == "status" => status = Some(b),
                _ => {}
            }
        }
        let cmd = cmd.ok_or_else(|| {
            RembusError::Deserialization("setting options lack a cmd".to_string())
        })?;
        Ok(Self { cmd, status })
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Announces the component identity.
    Identity { id: MsgId, cid: String },
    /// Fire-and-forget publication.
    PubSub { topic: String, args: Vec<Value> },
    /// Remote procedure call, optionally aimed at a specific target.
    Rpc {
        id: MsgId,
        method: String,
        target: Option<String>,
        args: Vec<Value>,
    },
    /// Broker-side configuration request.
    Setting {
        id: MsgId,
        name: String,
        command: SettingCommand,
    },
    /// Reply to any request carrying an id.
    Response {
        id: MsgId,
        status: Status,
        payload: Value,
    },
    /// Removes a provisioned identity.
    Unregister { id: MsgId, cid: String },
    /// Provisions an identity with a public key.
    Register {
        id: MsgId,
        cid: String,
        tenant: Option<String>,
        public_key: String,
        version: u8,
    },
    /// Answers an identity challenge.
    Attestation {
        id: MsgId,
        cid: String,
        signature: Vec<u8>,
    },
}

impl Frame {
    /// Returns the frame type tag.
    pub fn type_tag(&self) -> u8 {
        match self {
            Frame::Identity { .. } => TYPE_IDENTITY,
            Frame::PubSub { .. } => TYPE_PUBSUB,
            Frame::Rpc { .. } => TYPE_RPC,
            Frame::Setting { .. } => TYPE_SETTING,
            Frame::Response { .. } => TYPE_RESPONSE,
            Frame::Unregister { .. } => TYPE_UNREGISTER,
            Frame::Register { .. } => TYPE_REGISTER,
            Frame::Attestation { .. } => TYPE_ATTESTATION,
        }
    }

    /// Returns the correlation id, for frames that carry one.
    pub fn id(&self) -> Option<MsgId> {
        match self {
            Frame::PubSub { .. } => None,
            Frame::Identity { id, .. }
            | Frame::Rpc { id, .. }
            | Frame::Setting { id, .. }
            | Frame::Response { id, .. }
            | Frame::Unregister { id, .. }
            | Frame::Register { id, .. }
            | Frame::Attestation { id, .. } => Some(*id),
        }
    }

    /// Converts the frame into its CBOR array form.
    pub fn into_value(self) -> Value {
        let tag = Value::from(self.type_tag());
        let fields = match self {
            Frame::Identity { id, cid } => vec![id.to_value(), Value::Text(cid)],
            Frame::PubSub { topic, args } => vec![Value::Text(topic), Value::Array(args)],
            Frame::Rpc {
                id,
                method,
                target,
                args,
            } => vec![
                id.to_value(),
                Value::Text(method),
                target.map_or(Value::Null, Value::Text),
                Value::Array(args),
            ],
            Frame::Setting { id, name, command } => {
                vec![id.to_value(), Value::Text(name), command.to_value()]
            }
            Frame::Response {
                id,
                status,
                payload,
            } => vec![id.to_value(), Value::from(status.code()), payload],
            Frame::Unregister { id, cid } => vec![id.to_value(), Value::Text(cid)],
            Frame::Register {
                id,
                cid,
                tenant,
                public_key,
                version,
            } => vec![
                id.to_value(),
                Value::Text(cid),
                tenant.map_or(Value::Null, Value::Text),
                Value::Text(public_key),
                Value::from(version),
            ],
            Frame::Attestation { id, cid, signature } => {
                vec![id.to_value(), Value::Text(cid), Value::Bytes(signature)]
            }
        };
        let mut items = Vec::with_capacity(fields.len() + 1);
        items.push(tag);
        items.extend(fields);
        Value::Array(items)
    }

    /// Parses a frame from its CBOR array form.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(RembusError::Deserialization(
                "frame must be an array".to_string(),
            ));
        };
        let mut fields = Fields::new(items);
        let tag = take_u8(fields.next("type")?, "type")?;

        let frame = match tag {
            TYPE_IDENTITY => Frame::Identity {
                id: MsgId::from_value(fields.next("id")?)?,
                cid: take_text(fields.next("cid")?, "cid")?,
            },
            TYPE_PUBSUB => Frame::PubSub {
                topic: take_text(fields.next("topic")?, "topic")?,
                args: take_args(fields.next_or_null())?,
            },
            TYPE_RPC => Frame::Rpc {
                id: MsgId::from_value(fields.next("id")?)?,
                method: take_text(fields.next("method")?, "method")?,
                target: take_optional_text(fields.next_or_null(), "target")?,
                args: take_args(fields.next_or_null())?,
            },
            TYPE_SETTING => Frame::Setting {
                id: MsgId::from_value(fields.next("id")?)?,
                name: take_text(fields.next("name")?, "name")?,
                command: SettingCommand::from_value(fields.next("options")?)?,
            },
            TYPE_RESPONSE => Frame::Response {
                id: MsgId::from_value(fields.next("id")?)?,
                status: Status::from_code(take_u8(fields.next("status")?, "status")?),
                payload: fields.next_or_null(),
            },
            TYPE_UNREGISTER => Frame::Unregister {
                id: MsgId::from_value(fields.next("id")?)?,
                cid: take_text(fields.next("cid")?, "cid")?,
            },
            TYPE_REGISTER => Frame::Register {
                id: MsgId::from_value(fields.next("id")?)?,
                cid: take_text(fields.next("cid")?, "cid")?,
                tenant: take_optional_text(fields.next_or_null(), "tenant")?,
                public_key: take_text(fields.next("public key")?, "public key")?,
                version: take_u8(fields.next("version")?, "version")?,
            },
            TYPE_ATTESTATION => Frame::Attestation {
                id: MsgId::from_value(fields.next("id")?)?,
                cid: take_text(fields.next("cid")?, "cid")?,
                signature: take_bytes(fields.next("signature")?, "signature")?,
            },
            other => {
                return Err(RembusError::Deserialization(format!(
                    "unknown frame type {}",
                    other
                )))
            }
        };
        Ok(frame)
    }

    /// Encodes the frame to CBOR bytes.
    pub fn encode(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(&self.into_value(), &mut out)?;
        Ok(out)
    }

    /// Decodes a frame from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes)?;
        Self::from_value(value)
    }
}

/// Sequential reader over the fields of a frame array.
struct Fields(std::vec::IntoIter<Value>);

impl Fields {
    fn new(items: Vec<Value>) -> Self {
        Self(items.into_iter())
    }

    fn next(&mut self, name: &str) -> Result<Value> {
        self.0
            .next()
            .ok_or_else(|| RembusError::Deserialization(format!("frame lacks {}", name)))
    }

    fn next_or_null(&mut self) -> Value {
        self.0.next().unwrap_or(Value::Null)
    }
}

fn take_u8(value: Value, name: &str) -> Result<u8> {
    match value {
        Value::Integer(i) => u8::try_from(i)
            .map_err(|_| RembusError::Deserialization(format!("{} out of range", name))),
        other => Err(RembusError::Deserialization(format!(
            "{} must be an integer, got {:?}",
            name, other
        ))),
    }
}

fn take_text(value: Value, name: &str) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(RembusError::Deserialization(format!(
            "{} must be text, got {:?}",
            name, other
        ))),
    }
}

fn take_optional_text(value: Value, name: &str) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        other => take_text(other, name).map(Some),
    }
}

/// Extracts a byte string, unwrapping the typed-array tag if present.
pub fn take_bytes(value: Value, name: &str) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b),
        Value::Tag(TYPED_ARRAY_TAG, inner) => take_bytes(*inner, name),
        other => Err(RembusError::Deserialization(format!(
            "{} must be a byte string, got {:?}",
            name, other
        ))),
    }
}

fn take_args(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(args) => Ok(args),
        Value::Null => Ok(Vec::new()),
        other => Err(RembusError::Deserialization(format!(
            "args must be an array, got {:?}",
            other
        ))),
    }
}
