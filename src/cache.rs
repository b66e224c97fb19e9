//! In-process cache of raw network events with cache-first resolution.
//!
//! A generic index over addressable events, not note-aware, so it can serve
//! any kind. Reads try the local indexes first and fall through to the
//! network collaborator on a miss; every network answer is folded back in
//! before being returned, so the cache is strictly additive.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::event::{Event, Filter};
use crate::relay::{Network, NetworkError};

/// Tag names duplicated into the tag index. Bounded on purpose; `d` is never
/// listed here since it already is the primary key.
const INDEXED_TAGS: [&str; 1] = ["a"];

/// Address of one cached event: `(kind, author, d-tag)`.
type PrimaryKey = (u32, String, String);
/// Address of one tag-index bucket: `(kind, author, tag name, tag value)`.
type TagKey = (u32, String, String, String);

#[derive(Default)]
struct Indexes {
    primary: HashMap<PrimaryKey, Event>,
    tags: HashMap<TagKey, HashSet<PrimaryKey>>,
}

/// Cache-first view of the event network.
///
/// Cheap to clone; clones share the same indexes and network handle. All
/// mutation goes through the internal mutex because the async runtime may
/// run callers in parallel.
#[derive(Clone)]
pub struct EventCache {
    network: Arc<dyn Network>,
    indexes: Arc<Mutex<Indexes>>,
}

impl EventCache {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            network,
            indexes: Arc::new(Mutex::new(Indexes::default())),
        }
    }

    /// Fold one event into the indexes.
    ///
    /// Addressable upsert is last-writer-wins on `created_at`; a tie keeps
    /// the existing entry so duplicate delivery is a no-op. Events without a
    /// `d` tag have no address and are not cached.
    pub fn write(&self, ev: &Event) {
        let Some(dtag) = ev.d_tag() else { return };
        let key: PrimaryKey = (ev.kind, ev.pubkey.clone(), dtag.to_string());
        let mut ix = self.indexes.lock().unwrap();
        let superseded = ix
            .primary
            .get(&key)
            .map_or(true, |existing| existing.created_at < ev.created_at);
        if superseded {
            ix.primary.insert(key.clone(), ev.clone());
        }
        for tag in &ev.tags {
            let (Some(name), Some(value)) = (tag.name(), tag.value()) else {
                continue;
            };
            if !INDEXED_TAGS.contains(&name) {
                continue;
            }
            ix.tags
                .entry((ev.kind, ev.pubkey.clone(), name.to_string(), value.to_string()))
                .or_default()
                .insert(key.clone());
        }
    }

    /// Serve a filter from the indexes alone.
    ///
    /// Only filters shaped as exactly one author, one or more kinds, and
    /// exactly one of `#d`/`#a` with exactly one value can be answered; any
    /// other shape returns empty (never an error), signaling the caller to
    /// fall through to the network. Results are freshest-first.
    pub fn read_by_filter(&self, filter: &Filter) -> Vec<Event> {
        let (Some(authors), Some(kinds)) = (&filter.authors, &filter.kinds) else {
            return vec![];
        };
        if authors.len() != 1 || kinds.is_empty() {
            return vec![];
        }
        let mut given: Vec<(&str, &Vec<String>)> = vec![];
        if let Some(d) = &filter.d {
            given.push(("d", d));
        }
        if let Some(a) = &filter.a {
            given.push(("a", a));
        }
        if given.len() != 1 {
            return vec![];
        }
        let (tag_name, values) = given[0];
        if values.len() != 1 {
            return vec![];
        }
        let author = &authors[0];
        let value = &values[0];

        let ix = self.indexes.lock().unwrap();
        let mut events = vec![];
        for &kind in kinds {
            if tag_name == "d" {
                if let Some(ev) = ix.primary.get(&(kind, author.clone(), value.clone())) {
                    events.push(ev.clone());
                }
            } else if let Some(keys) = ix.tags.get(&(
                kind,
                author.clone(),
                tag_name.to_string(),
                value.clone(),
            )) {
                for key in keys {
                    if let Some(ev) = ix.primary.get(key) {
                        events.push(ev.clone());
                    }
                }
            }
        }
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        events
    }

    /// Cache-first single-event lookup: the freshest cached match, or the
    /// freshest network result after writing everything back.
    pub async fn fetch_event(&self, filter: &Filter) -> Result<Option<Event>, NetworkError> {
        if let Some(hit) = self.read_by_filter(filter).into_iter().next() {
            return Ok(Some(hit));
        }
        let events = self.network.fetch_events(filter).await?;
        for ev in &events {
            self.write(ev);
        }
        Ok(events.into_iter().max_by_key(|e| e.created_at))
    }

    /// Cache-first multi-event lookup with network write-through on a miss.
    pub async fn fetch_events(&self, filter: &Filter) -> Result<Vec<Event>, NetworkError> {
        let cached = self.read_by_filter(filter);
        if !cached.is_empty() {
            return Ok(cached);
        }
        let events = self.network.fetch_events(filter).await?;
        for ev in &events {
            self.write(ev);
        }
        Ok(events)
    }

    /// Live subscription combining cache replay and the network stream.
    ///
    /// Currently cached matches are replayed on the channel immediately so
    /// callers render without waiting, then live events follow, each written
    /// into the cache first. The same logical note may therefore arrive
    /// twice, once from replay and once live, and callers de-duplicate
    /// downstream by identity and version.
    pub fn subscribe(&self, filter: &Filter) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(64);
        let cached = self.read_by_filter(filter);
        let cache = self.clone();
        let filter = filter.clone();
        tokio::spawn(async move {
            for ev in cached {
                if tx.send(ev).await.is_err() {
                    return;
                }
            }
            let (net_tx, mut net_rx) = mpsc::channel(64);
            let network = cache.network.clone();
            let live = tokio::spawn(async move { network.subscribe(filter, net_tx).await });
            while let Some(ev) = net_rx.recv().await {
                cache.write(&ev);
                if tx.send(ev).await.is_err() {
                    break;
                }
            }
            match live.await {
                Ok(Err(e)) => tracing::warn!(error = %e, "live subscription failed"),
                Err(e) => tracing::warn!(error = %e, "subscription task panicked"),
                Ok(Ok(())) => {}
            }
        });
        rx
    }

    /// Optimistic publish: the event is visible locally before the network
    /// broadcast resolves. A broadcast failure propagates, but the local
    /// write stands.
    pub async fn publish(&self, event: &Event) -> Result<(), NetworkError> {
        self.write(event);
        self.network.publish(event).await
    }

    /// Optimistic delete: scrub every event the request `e`-references from
    /// the indexes, then broadcast the request.
    pub async fn del(&self, delete_request: &Event) -> Result<(), NetworkError> {
        {
            let mut ix = self.indexes.lock().unwrap();
            for tag in &delete_request.tags {
                if tag.name() == Some("e") {
                    if let Some(id) = tag.value() {
                        remove_by_id(&mut ix, id);
                    }
                }
            }
        }
        self.network.publish(delete_request).await
    }
}

/// Drop the event with the given id from the primary index and every
/// tag-index bucket pointing at it.
fn remove_by_id(ix: &mut Indexes, id: &str) {
    let key = ix
        .primary
        .iter()
        .find(|(_, ev)| ev.id == id)
        .map(|(k, _)| k.clone());
    let Some(key) = key else { return };
    ix.primary.remove(&key);
    for bucket in ix.tags.values_mut() {
        bucket.remove(&key);
    }
    ix.tags.retain(|_, bucket| !bucket.is_empty());
}
