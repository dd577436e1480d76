//! Shareable room links
//!
//! A call is entered through `/call?callType=..&roomId=..&userId=..&userName=..`
//! with one `receiverId` pair per invited participant. Parsing the same link
//! always yields the same `roomId` and `callType`; only absent values are
//! generated.

use crate::identity::{CallKind, LocalIdentity};
use crate::{Error, Result};
use rand::Rng;
use tracing::warn;
use url::Url;

const CALL_PATH: &str = "call";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ANONYMOUS: &str = "Anonymous";

/// Call parameters carried by a room link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    pub room_id: String,
    pub call_kind: CallKind,
    pub user_id: String,
    pub user_name: String,
    pub receiver_ids: Vec<String>,
}

impl RoomLink {
    /// Start a new call: fresh room and user identifiers
    ///
    /// `receivers` is the comma-separated invite list; blanks are dropped.
    pub fn new_call(user_name: &str, call_kind: CallKind, receivers: &str) -> Result<Self> {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return Err(Error::InvalidLink("Please enter your name".to_string()));
        }

        Ok(Self {
            room_id: generate_room_id(),
            call_kind,
            user_id: generate_user_id(),
            user_name: user_name.to_string(),
            receiver_ids: split_receivers(receivers),
        })
    }

    /// Parse an absolute link or a bare `/call?...` path
    pub fn parse(link: &str) -> Result<Self> {
        let url = match Url::parse(link) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost/")
                .and_then(|base| base.join(link))
                .map_err(|e| Error::InvalidLink(format!("Failed to parse link: {}", e)))?,
            Err(e) => return Err(Error::InvalidLink(format!("Failed to parse link: {}", e))),
        };

        Self::from_query_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())))
    }

    /// Build from decoded query pairs, defaulting missing values
    pub fn from_query_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut room_id = None;
        let mut call_kind = None;
        let mut user_id = None;
        let mut user_name = None;
        let mut receiver_ids = Vec::new();

        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "roomId" => room_id = Some(value),
                "callType" => call_kind = Some(call_kind_param(&value)),
                "userId" => user_id = Some(value),
                "userName" => user_name = Some(value),
                "receiverId" => receiver_ids.push(value),
                _ => {}
            }
        }

        Ok(Self {
            room_id: room_id.unwrap_or_else(generate_room_id),
            call_kind: call_kind.unwrap_or(CallKind::Audio),
            user_id: user_id.unwrap_or_else(generate_user_id),
            user_name: user_name.unwrap_or_else(|| ANONYMOUS.to_string()),
            receiver_ids,
        })
    }

    /// Render the link against the application's base URL
    pub fn to_url(&self, base_url: &str) -> Result<String> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::InvalidLink(format!("Invalid base URL {}: {}", base_url, e)))?;
        let mut url = base
            .join(CALL_PATH)
            .map_err(|e| Error::InvalidLink(format!("Invalid base URL {}: {}", base_url, e)))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("callType", self.call_kind.as_str())
                .append_pair("roomId", &self.room_id)
                .append_pair("userId", &self.user_id)
                .append_pair("userName", &self.user_name);
            for id in &self.receiver_ids {
                query.append_pair("receiverId", id);
            }
        }

        Ok(url.to_string())
    }

    pub fn identity(&self) -> LocalIdentity {
        LocalIdentity::new(self.user_id.clone(), self.user_name.clone())
    }

    /// More than one invited participant
    pub fn is_group(&self) -> bool {
        self.receiver_ids.len() > 1
    }

    /// Heading shown for the call, e.g. "Group Video Call"
    pub fn title(&self) -> String {
        let scope = if self.is_group() { "Group" } else { "1-to-1" };
        let kind = match self.call_kind {
            CallKind::Video => "Video",
            CallKind::Audio => "Audio",
        };
        format!("{} {} Call", scope, kind)
    }
}

/// `room-<unix millis>`
/// Anything other than `video` joins as an audio call
fn call_kind_param(value: &str) -> CallKind {
    value.parse::<CallKind>().unwrap_or_else(|_| {
        warn!("Unknown callType '{}'; joining as audio", value);
        CallKind::Audio
    })
}

pub fn generate_room_id() -> String {
    format!("room-{}", chrono::Utc::now().timestamp_millis())
}

/// `user-` followed by nine random base36 characters
pub fn generate_user_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("user-{}", suffix)
}

fn split_receivers(receivers: &str) -> Vec<String> {
    receivers
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
