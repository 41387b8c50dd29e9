//! JSON-RPC envelopes exchanged with the upstream service.

use fleetsync_core::{EntityId, FeedError, FeedKind, FeedStart, FeedToken};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Error name the service uses when its database is temporarily offline.
pub(crate) const UNAVAILABLE_ERROR: &str = "DbUnavailableException";

#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a> {
    pub(crate) method: &'a str,
    pub(crate) params: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcResponse<T> {
    #[serde(default = "Option::default")]
    pub(crate) result: Option<T>,
    #[serde(default)]
    pub(crate) error: Option<RpcError>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RpcError {
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) errors: Vec<RpcErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RpcErrorDetail {
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) message: String,
}

/// Session credentials returned by `Authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Credentials {
    pub(crate) database: String,
    pub(crate) session_id: String,
    pub(crate) user_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthenticateResult {
    pub(crate) credentials: Credentials,
    #[serde(default)]
    pub(crate) path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedResult<T> {
    #[serde(default = "Vec::new")]
    pub(crate) data: Vec<T>,
    #[serde(deserialize_with = "deserialize_version")]
    pub(crate) to_version: FeedToken,
}

/// Versions travel as hexadecimal strings, occasionally as plain numbers.
fn deserialize_version<'de, D>(deserializer: D) -> Result<FeedToken, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Text(String),
        Number(u64),
    }

    match Version::deserialize(deserializer)? {
        Version::Number(value) => Ok(FeedToken::new(value)),
        Version::Text(text) => u64::from_str_radix(text.trim(), 16)
            .map(FeedToken::new)
            .map_err(|err| de::Error::custom(format!("invalid version {text:?}: {err}"))),
    }
}

pub(crate) fn version_param(token: FeedToken) -> String {
    format!("{:016x}", token.value())
}

pub(crate) fn feed_params(
    kind: FeedKind,
    start: FeedStart,
    limit: usize,
    credentials: &Credentials,
) -> Value {
    let mut params = Map::new();
    params.insert("typeName".to_owned(), json!(kind.type_name()));
    params.insert("resultsLimit".to_owned(), json!(limit));
    params.insert("credentials".to_owned(), json!(credentials));
    match start {
        FeedStart::Token(token) if token.is_zero() => {}
        FeedStart::Token(token) => {
            params.insert("fromVersion".to_owned(), json!(version_param(token)));
        }
        FeedStart::Since(from) => {
            params.insert(
                "search".to_owned(),
                json!({ "fromDate": from.to_rfc3339_opts(chrono::SecondsFormat::Millis, true) }),
            );
        }
    }
    Value::Object(params)
}

pub(crate) fn get_params(
    type_name: &str,
    id: Option<&EntityId>,
    credentials: &Credentials,
) -> Value {
    let mut params = Map::new();
    params.insert("typeName".to_owned(), json!(type_name));
    params.insert("credentials".to_owned(), json!(credentials));
    if let Some(id) = id {
        params.insert("search".to_owned(), json!({ "id": id }));
    }
    Value::Object(params)
}

/// Map a JSON-RPC error onto the feed error taxonomy.
pub(crate) fn classify(method: &'static str, error: RpcError) -> FeedError {
    let unavailable = error.name.contains(UNAVAILABLE_ERROR)
        || error
            .errors
            .iter()
            .any(|detail| detail.name.contains(UNAVAILABLE_ERROR));
    if unavailable {
        return FeedError::Unavailable {
            method,
            message: error.message,
        };
    }
    let detail = error
        .errors
        .into_iter()
        .find(|detail| !detail.name.is_empty());
    let (name, message) = match detail {
        Some(detail) if error.message.is_empty() => (detail.name, detail.message),
        Some(detail) => (detail.name, error.message),
        None => (error.name, error.message),
    };
    FeedError::Rejected {
        method,
        name,
        message,
    }
}
