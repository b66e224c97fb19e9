//! Explicit per-user session context.
//!
//! Nothing in this crate is global: the session owns one cache, one store,
//! one signer, and one cipher, is created on connect and dropped on
//! disconnect, and is passed to whatever needs it.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::EventCache;
use crate::cipher::SelfCipher;
use crate::config::Settings;
use crate::event::{unix_now, Event, Filter, Tag, KIND_DELETE};
use crate::note::{self, Note, NoteKind, NOTE_QUERY_KINDS};
use crate::relay::{Network, RelayPool};
use crate::signer::Signer;
use crate::store::NoteStore;

/// One user's connected session over the relay network.
pub struct Session {
    settings: Settings,
    cache: EventCache,
    store: NoteStore,
    signer: Arc<dyn Signer>,
    cipher: Arc<dyn SelfCipher>,
}

impl Session {
    /// Connect over the configured relay pool and warm-start from the
    /// owner's snapshot.
    pub fn connect(
        settings: Settings,
        signer: Arc<dyn Signer>,
        cipher: Arc<dyn SelfCipher>,
    ) -> Result<Self> {
        let pool = RelayPool::new(
            settings.relays.clone(),
            settings.tor_socks.clone(),
            settings.quiet,
        );
        Self::with_network(settings, Arc::new(pool), signer, cipher)
    }

    /// Construct over any network implementation; tests inject fakes here.
    pub fn with_network(
        settings: Settings,
        network: Arc<dyn Network>,
        signer: Arc<dyn Signer>,
        cipher: Arc<dyn SelfCipher>,
    ) -> Result<Self> {
        let cache = EventCache::new(network);
        let mut store = NoteStore::new(settings.snapshot_root.clone(), signer.pubkey());
        let restored = store.pull_state().context("reading snapshot")?;
        if restored > 0 {
            tracing::debug!(restored, "warm start from snapshot");
        }
        Ok(Self {
            settings,
            cache,
            store,
            signer,
            cipher,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    pub fn cache(&self) -> &EventCache {
        &self.cache
    }

    /// Hex public key of the session owner.
    pub fn pubkey(&self) -> String {
        self.signer.pubkey()
    }

    /// Encode, sign, and broadcast a note, folding it into the local store
    /// first so this session sees its own write immediately. The note's
    /// physical id is updated to the freshly signed event id. A network
    /// failure propagates after the local state is already saved; retrying
    /// is the caller's decision.
    pub async fn publish_note(&mut self, note: &mut Note, backrefs: &[String]) -> Result<Event> {
        let mut event = note.to_event(backrefs, self.cipher.as_ref())?;
        self.signer.sign(&mut event)?;
        note.event_id = event.id.clone();
        self.store.add_note(note.clone());
        self.store.push_state()?;
        self.cache.publish(&event).await?;
        Ok(event)
    }

    /// Pull every note this identity has on the relays into the store.
    /// Duplicates between cache replay and the live stream converge through
    /// the store's merge rule. Returns how many events decoded.
    pub async fn sync(&mut self) -> Result<usize> {
        let filter = Filter {
            authors: Some(vec![self.pubkey()]),
            kinds: Some(NOTE_QUERY_KINDS.to_vec()),
            ..Filter::default()
        };
        let mut rx = self.cache.subscribe(&filter);
        let mut decoded = 0;
        while let Some(event) = rx.recv().await {
            if self
                .store
                .add_from_event(&event, self.cipher.as_ref())
                .is_some()
            {
                decoded += 1;
            }
        }
        Ok(decoded)
    }

    /// Resolve an identifier, either a `kind:pubkey:slug` address or a title
    /// (slug or plain) looked up against this session's own identity, to
    /// the newest decodable version. Own notes found this way are folded
    /// into the store.
    pub async fn resolve(&mut self, identifier: &str) -> Result<Option<Note>> {
        let filter = Filter::from_address(identifier).unwrap_or_else(|| {
            note::note_filter_for_title(&identifier.replace('-', " "), &self.pubkey())
        });
        let events = self.cache.fetch_events(&filter).await?;
        let mut best: Option<Note> = None;
        for event in &events {
            match Note::from_event(event, self.cipher.as_ref()) {
                Ok(candidate) => {
                    if best
                        .as_ref()
                        .map_or(true, |b| candidate.created_at >= b.created_at)
                    {
                        best = Some(candidate);
                    }
                }
                Err(e) => {
                    tracing::debug!(id = %event.id, error = %e, "skipping unresolvable event")
                }
            }
        }
        if let Some(found) = &best {
            if found.pubkey == self.pubkey() {
                self.store.add_note(found.clone());
                self.store.push_state()?;
            }
        }
        Ok(best)
    }

    /// Remove a note locally and broadcast a delete request targeting its
    /// current physical id (the wrapper id for drafts). Returns the removed
    /// note, or `None` when nothing matched locally.
    pub async fn delete_note(&mut self, identifier: &str) -> Result<Option<Note>> {
        let Some(found) = self.find_local(identifier) else {
            return Ok(None);
        };
        let mut request = Event {
            id: String::new(),
            pubkey: self.pubkey(),
            kind: KIND_DELETE,
            created_at: unix_now(),
            tags: vec![Tag::pair("e", found.event_id.clone())],
            content: String::new(),
            sig: String::new(),
        };
        self.signer.sign(&mut request)?;
        self.store.delete_note(&found.database_id())?;
        self.cache.del(&request).await?;
        Ok(Some(found))
    }

    /// Persist a final snapshot and end the session.
    pub fn disconnect(self) -> Result<()> {
        self.store.push_state()
    }

    /// Match an identifier against the local store: database id, physical
    /// event id, or a title in either document class.
    fn find_local(&self, identifier: &str) -> Option<Note> {
        if let Some(found) = self.store.get(identifier) {
            return Some(found.clone());
        }
        let title = identifier.replace('-', " ");
        for kind in [NoteKind::Topic, NoteKind::Article] {
            let db_id = format!("{}:{}", kind.number(), note::dtag_for(&title));
            if let Some(found) = self.store.get(&db_id) {
                return Some(found.clone());
            }
        }
        None
    }
}
