//! Wire protocol types.
//!
//! Every transport message is one UTF-8 JSON document discriminated by
//! `MessageType`. Schema validation of incoming messages is left to the
//! server; here we only need types whose `serde` shape matches the
//! documented fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol version this client advertises during the handshake.
pub const PROTOCOL_VERSION: &str = "0.1";

/// Feed arguments: a string-to-string mapping. `BTreeMap` gives us
/// deterministic iteration order for free, which is what the canonical
/// serial encoding in `FeedIdentity::serial` depends on.
pub type FeedArgs = BTreeMap<String, String>;

/// A feed's identity: name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedIdentity {
    pub name: String,
    pub args: FeedArgs,
}

impl FeedIdentity {
    pub fn new(name: impl Into<String>, args: FeedArgs) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Deterministic, injective string encoding used as the feed's table
    /// key everywhere in `Session`/`Client` ("feed serial").
    ///
    /// `BTreeMap`'s `Serialize` impl always emits keys in sorted order, so
    /// two identities with the same name and the same argument mapping
    /// always produce identical JSON here regardless of insertion order.
    pub fn serial(&self) -> String {
        serde_json::to_string(&(&self.name, &self.args))
            .expect("FeedIdentity serialization cannot fail: all fields are strings")
    }
}

/// A single delta operation: an `Operation` tag plus operation-specific
/// fields. See `delta.rs` for application semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Operation", rename_all = "PascalCase")]
pub enum Delta {
    Set {
        #[serde(rename = "Path")]
        path: Vec<String>,
        #[serde(rename = "Value")]
        value: Value,
    },
    Delete {
        #[serde(rename = "Path")]
        path: Vec<String>,
    },
    DeleteValue {
        #[serde(rename = "Path")]
        path: Vec<String>,
        #[serde(rename = "Value")]
        value: Value,
    },
    Prepend {
        #[serde(rename = "Path")]
        path: Vec<String>,
        #[serde(rename = "Value")]
        value: Value,
    },
    Append {
        #[serde(rename = "Path")]
        path: Vec<String>,
        #[serde(rename = "Value")]
        value: Value,
    },
    Insert {
        #[serde(rename = "Path")]
        path: Vec<String>,
        #[serde(rename = "Index")]
        index: i64,
        #[serde(rename = "Value")]
        value: Value,
    },
    ToggleBoolean {
        #[serde(rename = "Path")]
        path: Vec<String>,
    },
}

/// Messages the client sends to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "MessageType")]
pub enum ClientMessage {
    Handshake {
        #[serde(rename = "Versions")]
        versions: Vec<String>,
    },
    Action {
        #[serde(rename = "ActionName")]
        action_name: String,
        #[serde(rename = "ActionArgs")]
        action_args: Value,
        #[serde(rename = "CallbackId")]
        callback_id: String,
    },
    FeedOpen {
        #[serde(rename = "FeedName")]
        feed_name: String,
        #[serde(rename = "FeedArgs")]
        feed_args: FeedArgs,
    },
    FeedClose {
        #[serde(rename = "FeedName")]
        feed_name: String,
        #[serde(rename = "FeedArgs")]
        feed_args: FeedArgs,
    },
}

/// Messages the client receives from the server. Fields that only appear
/// depending on `Success` (e.g. `ActionResponse`'s data/error fields) are
/// modeled as `Option`s and validated by hand in `session/mod.rs`, keeping
/// header fields separate from the success-dependent payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "MessageType")]
pub enum ServerMessage {
    HandshakeResponse {
        #[serde(rename = "Success")]
        success: bool,
        #[serde(rename = "Version")]
        version: Option<String>,
    },
    ViolationResponse {
        #[serde(rename = "Diagnostics")]
        diagnostics: Value,
    },
    ActionResponse {
        #[serde(rename = "CallbackId")]
        callback_id: String,
        #[serde(rename = "Success")]
        success: bool,
        #[serde(rename = "ActionData")]
        action_data: Option<Value>,
        #[serde(rename = "ErrorCode")]
        error_code: Option<String>,
        #[serde(rename = "ErrorData")]
        error_data: Option<Value>,
    },
    FeedOpenResponse {
        #[serde(rename = "FeedName")]
        feed_name: String,
        #[serde(rename = "FeedArgs")]
        feed_args: FeedArgs,
        #[serde(rename = "Success")]
        success: bool,
        #[serde(rename = "FeedData")]
        feed_data: Option<Value>,
        #[serde(rename = "ErrorCode")]
        error_code: Option<String>,
        #[serde(rename = "ErrorData")]
        error_data: Option<Value>,
    },
    FeedCloseResponse {
        #[serde(rename = "FeedName")]
        feed_name: String,
        #[serde(rename = "FeedArgs")]
        feed_args: FeedArgs,
    },
    FeedAction {
        #[serde(rename = "FeedName")]
        feed_name: String,
        #[serde(rename = "FeedArgs")]
        feed_args: FeedArgs,
        #[serde(rename = "ActionName")]
        action_name: String,
        #[serde(rename = "ActionData")]
        action_data: Value,
        #[serde(rename = "FeedDeltas")]
        feed_deltas: Vec<Delta>,
        #[serde(rename = "FeedMd5")]
        feed_md5: Option<String>,
    },
    ActionRevelation {
        #[serde(rename = "FeedName")]
        feed_name: String,
        #[serde(rename = "FeedArgs")]
        feed_args: FeedArgs,
        #[serde(rename = "ActionName")]
        action_name: String,
        #[serde(rename = "ActionData")]
        action_data: Value,
        #[serde(rename = "FeedDeltas")]
        feed_deltas: Vec<Delta>,
        #[serde(rename = "FeedMd5")]
        feed_md5: Option<String>,
    },
    FeedTermination {
        #[serde(rename = "FeedName")]
        feed_name: String,
        #[serde(rename = "FeedArgs")]
        feed_args: FeedArgs,
        #[serde(rename = "ErrorCode")]
        error_code: String,
        #[serde(rename = "ErrorData")]
        error_data: Value,
    },
}

impl ServerMessage {
    pub fn feed_identity(&self) -> Option<FeedIdentity> {
        match self {
            ServerMessage::FeedOpenResponse {
                feed_name, feed_args, ..
            }
            | ServerMessage::FeedCloseResponse {
                feed_name, feed_args, ..
            }
            | ServerMessage::FeedAction {
                feed_name, feed_args, ..
            }
            | ServerMessage::ActionRevelation {
                feed_name, feed_args, ..
            }
            | ServerMessage::FeedTermination {
                feed_name, feed_args, ..
            } => Some(FeedIdentity::new(feed_name.clone(), feed_args.clone())),
            _ => None,
        }
    }
}
