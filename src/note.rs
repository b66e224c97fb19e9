//! Logical note model.
//!
//! A [`Note`] is one resolved version of a document: the decoded, decrypted
//! form of either a public addressable event or the payload hidden inside a
//! draft wrapper. Decoding runs as two explicit stages, unwrap then
//! decode-inner, so a decryption failure and a validation failure stay
//! distinguishable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::cipher::{CipherError, SelfCipher};
use crate::event::{unix_now, Event, Filter, Tag, KIND_ARTICLE, KIND_DRAFT, KIND_TOPIC};

/// Kinds a note lookup must consider: both public classes plus the wrapper.
pub const NOTE_QUERY_KINDS: [u32; 3] = [KIND_TOPIC, KIND_ARTICLE, KIND_DRAFT];

/// Public document class. The draft wrapper kind is deliberately not
/// representable here; it is a transport envelope, not a document class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteKind {
    Topic,
    Article,
}

impl NoteKind {
    /// The wire kind number.
    pub fn number(self) -> u32 {
        match self {
            NoteKind::Topic => KIND_TOPIC,
            NoteKind::Article => KIND_ARTICLE,
        }
    }

    /// Map a wire kind number back to a document class.
    pub fn from_number(kind: u32) -> Option<Self> {
        match kind {
            KIND_TOPIC => Some(NoteKind::Topic),
            KIND_ARTICLE => Some(NoteKind::Article),
            _ => None,
        }
    }
}

/// Visibility classification of a note version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Published,
    Draft,
    Private,
}

impl Visibility {
    /// Whether the encoded form is a draft wrapper. Private always wraps.
    pub fn is_wrapped(self) -> bool {
        !matches!(self, Visibility::Published)
    }
}

/// Structural rules a note must satisfy before it is accepted anywhere.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("note title must not be empty")]
    EmptyTitle,
    #[error("event carries no title tag")]
    MissingTitle,
    #[error("kind {0} is not a note kind")]
    UnknownKind(u32),
    #[error("topics cannot be private")]
    PrivateTopic,
}

/// Failure decoding or encoding a note.
///
/// `Validation` and `Decryption` are the two independently testable stages
/// of the decode pipeline; `MalformedPayload` sits between them (the wrapper
/// decrypted fine but did not contain an event).
#[derive(Debug, Error)]
pub enum NoteError {
    #[error("invalid note: {0}")]
    Validation(#[from] ValidationError),
    #[error("cannot unwrap payload: {0}")]
    Decryption(#[from] CipherError),
    #[error("wrapped payload is not an event: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Partial update applied through [`Note::update`].
#[derive(Debug, Default, Clone)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub visibility: Option<Visibility>,
}

/// One resolved version of a logical document.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub kind: NoteKind,
    pub visibility: Visibility,
    pub title: String,
    pub content: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Version marker; greatest wins among editions of one document.
    pub created_at: u64,
    /// Network id currently representing this version. For wrapped notes
    /// this is the wrapper's id, so delete requests target the wrapper
    /// rather than the hidden inner event.
    pub event_id: String,
}

/// Deterministic slug for a title: lowercased, every character outside
/// `[a-z0-9_]` replaced by a hyphen. Lossy on purpose; two titles that
/// differ only in punctuation share an address.
pub fn dtag_for(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect()
}

/// Addressable key for the draft wrapper of a title: hex SHA-256 of the
/// public slug, so a draft and its published counterpart never collide in
/// an index even though they are editions of the same document.
pub fn draft_dtag_for(title: &str) -> String {
    hex::encode(Sha256::digest(dtag_for(title).as_bytes()))
}

/// Fully qualified `kind:pubkey:slug` address, usable cross-author.
pub fn address_for(kind: NoteKind, pubkey: &str, title: &str) -> String {
    format!("{}:{}:{}", kind.number(), pubkey, dtag_for(title))
}

/// Public handle for a note. When the author is the domain-linked identity
/// the handle degrades to the bare slug for pretty URLs; otherwise it is the
/// full address.
pub fn handle_for(kind: NoteKind, pubkey: &str, title: &str, dnslink: Option<&str>) -> String {
    if dnslink == Some(pubkey) {
        dtag_for(title)
    } else {
        address_for(kind, pubkey, title)
    }
}

/// Lookup filter resolving a title to either its public or its draft
/// edition. Carries two `#d` values, so the event cache will decline it and
/// the query falls through to the network.
pub fn note_filter_for_title(title: &str, author: &str) -> Filter {
    Filter {
        authors: Some(vec![author.to_string()]),
        kinds: Some(NOTE_QUERY_KINDS.to_vec()),
        d: Some(vec![dtag_for(title), draft_dtag_for(title)]),
        ..Filter::default()
    }
}

impl Note {
    /// Author a fresh note. `created_at` starts at the current time and the
    /// note has no network id until it is encoded and signed.
    pub fn from_content(
        kind: NoteKind,
        visibility: Visibility,
        title: impl Into<String>,
        content: impl Into<String>,
        pubkey: impl Into<String>,
    ) -> Result<Note, NoteError> {
        let note = Note {
            kind,
            visibility,
            title: title.into(),
            content: content.into(),
            pubkey: pubkey.into(),
            created_at: unix_now(),
            event_id: String::new(),
        };
        validate(&note)?;
        Ok(note)
    }

    /// Decode a raw network event into a note, unwrapping the draft envelope
    /// when necessary.
    ///
    /// Visibility comes from the envelope: a direct event is `Published`; a
    /// wrapper decodes to `Private` when the inner event carries a `private`
    /// tag and `Draft` otherwise. A direct event can therefore never be
    /// `Private`, which keeps the private-implies-wrapped invariant
    /// structural rather than checked.
    pub fn from_event(ev: &Event, cipher: &dyn SelfCipher) -> Result<Note, NoteError> {
        if ev.kind == KIND_DRAFT {
            let inner = unwrap_draft(ev, cipher)?;
            let visibility = if inner.has_tag("private") {
                Visibility::Private
            } else {
                Visibility::Draft
            };
            decode_inner(&inner, visibility, ev.id.clone())
        } else {
            decode_inner(ev, Visibility::Published, ev.id.clone())
        }
    }

    /// Encode for publishing. Published notes become a plain addressable
    /// event; draft and private notes are serialized, encrypted to the
    /// author, and wrapped in a draft-kind envelope whose `d` tag is the
    /// draft slug. `backrefs` are addresses of documents this note links to.
    ///
    /// The returned event is unsigned; run it through a signer before
    /// handing it to the network.
    pub fn to_event(
        &self,
        backrefs: &[String],
        cipher: &dyn SelfCipher,
    ) -> Result<Event, NoteError> {
        validate(self)?;
        let mut tags = vec![
            Tag::pair("d", self.dtag()),
            Tag::pair("title", self.title.clone()),
            Tag::pair("published_at", self.created_at.to_string()),
        ];
        if self.visibility == Visibility::Private {
            tags.push(Tag::pair("private", "true"));
        }
        for backref in backrefs {
            tags.push(Tag::pair("a", backref.clone()));
        }
        let inner = Event {
            id: String::new(),
            pubkey: self.pubkey.clone(),
            kind: self.kind.number(),
            created_at: self.created_at,
            tags,
            content: self.content.clone(),
            sig: String::new(),
        };
        if !self.visibility.is_wrapped() {
            return Ok(inner);
        }
        let payload = serde_json::to_string(&inner)?;
        let sealed = cipher.encrypt(&payload)?;
        Ok(Event {
            id: String::new(),
            pubkey: self.pubkey.clone(),
            kind: KIND_DRAFT,
            // mirrored so the wrapper competes correctly in the cache index
            created_at: self.created_at,
            tags: vec![
                Tag::pair("d", self.draft_dtag()),
                Tag::pair("k", self.kind.number().to_string()),
            ],
            content: sealed,
            sig: String::new(),
        })
    }

    /// Apply a partial edit. The candidate is validated with `created_at`
    /// bumped to the current time (always strictly past the previous
    /// version); on any violation the note is left unchanged.
    pub fn update(&mut self, patch: NotePatch) -> Result<(), NoteError> {
        let mut next = self.clone();
        if let Some(title) = patch.title {
            next.title = title;
        }
        if let Some(content) = patch.content {
            next.content = content;
        }
        if let Some(visibility) = patch.visibility {
            next.visibility = visibility;
        }
        next.created_at = unix_now().max(self.created_at + 1);
        validate(&next)?;
        *self = next;
        Ok(())
    }

    /// Public addressable slug.
    pub fn dtag(&self) -> String {
        dtag_for(&self.title)
    }

    /// Addressable slug of the draft wrapper.
    pub fn draft_dtag(&self) -> String {
        draft_dtag_for(&self.title)
    }

    /// Identity of the logical document, stable across public, draft, and
    /// private editions of the same kind.
    pub fn database_id(&self) -> String {
        format!("{}:{}", self.kind.number(), self.dtag())
    }

    /// Fully qualified cross-author address.
    pub fn address(&self) -> String {
        address_for(self.kind, &self.pubkey, &self.title)
    }

    /// Public handle, degrading to the bare slug for the domain-linked
    /// author.
    pub fn handle(&self, dnslink: Option<&str>) -> String {
        handle_for(self.kind, &self.pubkey, &self.title, dnslink)
    }

    /// Flatten for the snapshot store.
    pub fn to_plain(&self) -> PlainNote {
        PlainNote {
            id: self.event_id.clone(),
            private: self.visibility == Visibility::Private,
            draft: self.visibility.is_wrapped(),
            kind: self.kind.number(),
            title: self.title.clone(),
            content: self.content.clone(),
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
        }
    }

    /// Rebuild from a snapshot record, re-running validation so a damaged
    /// snapshot cannot smuggle in an illegal note.
    pub fn from_plain(plain: PlainNote) -> Result<Note, NoteError> {
        let kind = NoteKind::from_number(plain.kind)
            .ok_or(ValidationError::UnknownKind(plain.kind))?;
        let visibility = if plain.private {
            Visibility::Private
        } else if plain.draft {
            Visibility::Draft
        } else {
            Visibility::Published
        };
        let note = Note {
            kind,
            visibility,
            title: plain.title,
            content: plain.content,
            pubkey: plain.pubkey,
            created_at: plain.created_at,
            event_id: plain.id,
        };
        validate(&note)?;
        Ok(note)
    }
}

/// Stage one of decoding: decrypt a wrapper's content and parse the inner
/// event. Fails with [`NoteError::Decryption`] for foreign or corrupt
/// ciphertext and [`NoteError::MalformedPayload`] for non-event plaintext.
fn unwrap_draft(outer: &Event, cipher: &dyn SelfCipher) -> Result<Event, NoteError> {
    let plain = cipher.decrypt(&outer.content)?;
    Ok(serde_json::from_str(&plain)?)
}

/// Stage two of decoding: extract fields from the (possibly unwrapped)
/// event and validate. `physical_id` is always the outer event's id.
fn decode_inner(
    inner: &Event,
    visibility: Visibility,
    physical_id: String,
) -> Result<Note, NoteError> {
    let kind =
        NoteKind::from_number(inner.kind).ok_or(ValidationError::UnknownKind(inner.kind))?;
    let title = inner
        .tag_value("title")
        .ok_or(ValidationError::MissingTitle)?;
    let note = Note {
        kind,
        visibility,
        title: title.to_string(),
        content: inner.content.clone(),
        pubkey: inner.pubkey.clone(),
        created_at: inner.created_at,
        event_id: physical_id,
    };
    validate(&note)?;
    Ok(note)
}

/// The closed rule set every note must pass. Kind legality is already
/// carried by the types; what remains is the title and the one forbidden
/// kind/visibility combination.
fn validate(note: &Note) -> Result<(), ValidationError> {
    if note.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    match (note.kind, note.visibility) {
        (NoteKind::Topic, Visibility::Private) => Err(ValidationError::PrivateTopic),
        (NoteKind::Topic, _) | (NoteKind::Article, _) => Ok(()),
    }
}

/// Flat snapshot record, one per logical document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlainNote {
    pub id: String,
    pub private: bool,
    pub draft: bool,
    pub kind: u32,
    pub title: String,
    pub content: String,
    pub pubkey: String,
    pub created_at: u64,
}
