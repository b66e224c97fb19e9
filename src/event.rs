//! Nostr event model and query filters.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Public long-form article kind.
pub const KIND_ARTICLE: u32 = 30023;
/// Public wiki-style topic kind.
pub const KIND_TOPIC: u32 = 30818;
/// Draft wrapper kind. A transport detail: the wrapped payload carries the
/// real kind, so this number never appears on a resolved note.
pub const KIND_DRAFT: u32 = 31234;
/// Delete request kind.
pub const KIND_DELETE: u32 = 5;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and
/// the following elements hold data. The tags this crate interprets:
///
/// - `d` – unique identifier for addressable events
/// - `title` – human-readable note title
/// - `private` – marks the wrapped inner event as private
/// - `a` – backreference to another addressable event
/// - `k` – kind number wrapped inside a draft event
/// - `e` – event id targeted by a delete request
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a `[name, value]` tag.
    pub fn pair(name: impl Into<String>, value: impl Into<String>) -> Self {
        Tag(vec![name.into(), value.into()])
    }

    /// The tag name, i.e. the first element.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(|s| s.as_str())
    }

    /// The tag value, i.e. the second element.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(|s| s.as_str())
    }
}

/// Raw Nostr event as exchanged with relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "b0a1...",
///   "kind": 30023,
///   "created_at": 1700000000,
///   "tags": [["d", "slug"], ["title", "Slug"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
///
/// `id` and `sig` default to empty so that an unsigned inner event (the
/// payload of a draft wrapper) survives a JSON round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    #[serde(default)]
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `30023` or `31234`.
    pub kind: u32,
    /// Unix timestamp of creation. Doubles as the version marker for
    /// addressable events: the greatest `created_at` wins.
    pub created_at: u64,
    /// Arbitrary tags such as `d` (identifier) or `title`.
    pub tags: Vec<Tag>,
    /// Event content body, possibly encrypted ciphertext.
    pub content: String,
    /// Schnorr signature over the event hash.
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// Value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(|t| t.value())
    }

    /// The addressable `d` tag value, if any.
    pub fn d_tag(&self) -> Option<&str> {
        self.tag_value("d")
    }

    /// Whether any tag named `name` is present, regardless of value.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name() == Some(name))
    }
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(ev: &Event) -> anyhow::Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Relay query filter shared by the cache and the relay client.
///
/// Serializes to the wire filter object used in `REQ` messages; tag filters
/// keep their `#`-prefixed names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(rename = "#d", skip_serializing_if = "Option::is_none")]
    pub d: Option<Vec<String>>,
    #[serde(rename = "#a", skip_serializing_if = "Option::is_none")]
    pub a: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Parse the `kind:pubkey:identifier` address form into a filter.
    ///
    /// Returns `None` unless the kind parses as a number and the pubkey is
    /// plausible hex. The identifier part is optional.
    pub fn from_address(addr: &str) -> Option<Filter> {
        let mut parts = addr.splitn(3, ':');
        let kind: u32 = parts.next()?.parse().ok()?;
        let pubkey = parts.next()?;
        if pubkey.is_empty() || !pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let mut filter = Filter {
            authors: Some(vec![pubkey.to_string()]),
            kinds: Some(vec![kind]),
            ..Filter::default()
        };
        if let Some(identifier) = parts.next() {
            filter.d = Some(vec![identifier.to_string()]);
        }
        Some(filter)
    }
}
