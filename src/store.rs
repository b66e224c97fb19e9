//! Per-user store of resolved notes.
//!
//! The authoritative collection for one session owner: last-writer-wins
//! merging across every physical encoding of a document, word-prefix title
//! search, and a flat JSON snapshot so a warm start works without the
//! network. Entries are authoritative until superseded or explicitly
//! deleted; absence from a query result never evicts anything.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::to_writer;

use crate::cipher::SelfCipher;
use crate::event::Event;
use crate::note::{Note, PlainNote};

/// Snapshot file payload: one record per logical document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    notes: Vec<PlainNote>,
}

/// Resolved notes owned by one user, keyed by logical document identity.
pub struct NoteStore {
    /// Hex pubkey of the owning user; scopes the snapshot file.
    owner: String,
    /// Directory snapshots are written under.
    root: PathBuf,
    /// `database_id` → the single retained version of that document.
    notes: BTreeMap<String, Note>,
    /// Every physical network id ever observed → `database_id`. A wrapper's
    /// outer id differs from the public edition's id, and both must resolve
    /// to the same logical note.
    event_ids: HashMap<String, String>,
    /// Lowercase title word → documents whose title contains it. Range
    /// scans over the sorted keys give prefix search.
    title_index: BTreeMap<String, BTreeSet<String>>,
}

impl NoteStore {
    /// Create an empty store for `owner` rooted at `root`.
    pub fn new(root: PathBuf, owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            root,
            notes: BTreeMap::new(),
            event_ids: HashMap::new(),
            title_index: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Number of logical documents currently retained.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Look up by database id or by any observed physical id.
    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes
            .get(id)
            .or_else(|| self.event_ids.get(id).and_then(|db| self.notes.get(db)))
    }

    /// All retained notes in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    /// Decode a raw event and merge it in.
    ///
    /// A malformed or foreign-encrypted event from a relay must never crash
    /// note loading: decode failures are logged and the event discarded.
    /// Returns the decoded note (whether or not it superseded the stored
    /// version) so callers can count progress.
    pub fn add_from_event(&mut self, ev: &Event, cipher: &dyn SelfCipher) -> Option<Note> {
        let note = match Note::from_event(ev, cipher) {
            Ok(note) => note,
            Err(e) => {
                tracing::warn!(id = %ev.id, error = %e, "discarding undecodable event");
                return None;
            }
        };
        self.add_note(note.clone());
        if let Err(e) = self.push_state() {
            tracing::warn!(error = %e, "snapshot write failed");
        }
        Some(note)
    }

    /// Merge one resolved note. This is the single point enforcing
    /// last-writer-wins: the stored version is replaced only when the
    /// incoming `created_at` is greater or equal, so re-delivering the same
    /// version converges and a stale version can never overwrite a newer
    /// one. Title words are indexed only the first time a document is seen,
    /// keeping search results stable across versions.
    pub fn add_note(&mut self, note: Note) {
        let db_id = note.database_id();
        if !note.event_id.is_empty() {
            self.event_ids.insert(note.event_id.clone(), db_id.clone());
        }
        if !self.notes.contains_key(&db_id) {
            self.index_title(&note.title, &db_id);
        }
        let supersedes = self
            .notes
            .get(&db_id)
            .map_or(true, |existing| note.created_at >= existing.created_at);
        if supersedes {
            self.notes.insert(db_id, note);
        }
    }

    /// Remove a document and persist the shrunken snapshot. Returns the
    /// removed note, if any.
    pub fn delete_note(&mut self, database_id: &str) -> Result<Option<Note>> {
        let removed = self.notes.remove(database_id);
        if removed.is_some() {
            self.event_ids.retain(|_, db| db != database_id);
            self.push_state()?;
        }
        Ok(removed)
    }

    /// Word-prefix search over titles.
    ///
    /// An empty word list returns every note with non-empty content;
    /// otherwise the union of prefix matches across the given words,
    /// filtered the same way. Newest first; ties keep index order.
    pub fn search(&self, words: &[String]) -> Vec<&Note> {
        let mut ids: Vec<&str> = vec![];
        let mut seen = BTreeSet::new();
        if words.iter().all(|w| w.is_empty()) {
            ids.extend(self.notes.keys().map(String::as_str));
        } else {
            for word in words {
                let prefix = word.to_lowercase();
                for (indexed, bucket) in self.title_index.range(prefix.clone()..) {
                    if !indexed.starts_with(&prefix) {
                        break;
                    }
                    for id in bucket {
                        if seen.insert(id.as_str()) {
                            ids.push(id.as_str());
                        }
                    }
                }
            }
        }
        let mut notes: Vec<&Note> = ids
            .into_iter()
            .filter_map(|id| self.notes.get(id))
            .filter(|note| !note.content.is_empty())
            .collect();
        notes.sort_by_key(|note| std::cmp::Reverse(note.created_at));
        notes
    }

    /// Persist the full notes map as a flat snapshot, written atomically.
    pub fn push_state(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let snapshot = Snapshot {
            notes: self.notes.values().map(Note::to_plain).collect(),
        };
        let tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        to_writer(&tmp, &snapshot)?;
        tmp.persist(self.snapshot_path())?;
        Ok(())
    }

    /// Warm-start from the snapshot, re-running `add_note` per record so the
    /// id map and search index are rebuilt under the same invariants as
    /// network ingestion. Invalid records are skipped, not fatal. Returns
    /// how many records were restored.
    pub fn pull_state(&mut self) -> Result<usize> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(0);
        }
        let data = fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&data)?;
        let mut restored = 0;
        for plain in snapshot.notes {
            match Note::from_plain(plain) {
                Ok(note) => {
                    self.add_note(note);
                    restored += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping invalid snapshot record"),
            }
        }
        Ok(restored)
    }

    /// Snapshot file for this owner.
    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(format!("database-{}.json", self.owner))
    }

    fn index_title(&mut self, title: &str, db_id: &str) {
        for word in title.split_whitespace() {
            self.title_index
                .entry(word.to_lowercase())
                .or_default()
                .insert(db_id.to_string());
        }
    }
}

/// Convenience used by tests and tooling: whether a snapshot exists for an
/// owner under a root.
pub fn snapshot_exists(root: &Path, owner: &str) -> bool {
    root.join(format!("database-{owner}.json")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesSelfCipher;
    use crate::note::{NoteKind, Visibility};
    use tempfile::TempDir;

    fn cipher() -> AesSelfCipher {
        AesSelfCipher::new(b"store-secret")
    }

    fn store(dir: &TempDir) -> NoteStore {
        NoteStore::new(dir.path().to_path_buf(), "owner")
    }

    fn note(title: &str, created_at: u64, event_id: &str) -> Note {
        Note {
            kind: NoteKind::Article,
            visibility: Visibility::Published,
            title: title.into(),
            content: format!("body of {title}"),
            pubkey: "owner".into(),
            created_at,
            event_id: event_id.into(),
        }
    }

    #[test]
    fn add_note_is_last_writer_wins_out_of_order() {
        let dir = TempDir::new().unwrap();
        let mut forward = store(&dir);
        forward.add_note(note("Garden", 50, "aa"));
        forward.add_note(note("Garden", 80, "bb"));

        let mut backward = store(&dir);
        backward.add_note(note("Garden", 80, "bb"));
        backward.add_note(note("Garden", 50, "aa"));

        for s in [&forward, &backward] {
            assert_eq!(s.len(), 1);
            let kept = s.get("30023:garden").unwrap();
            assert_eq!(kept.created_at, 80);
            assert_eq!(kept.event_id, "bb");
        }
    }

    #[test]
    fn equal_timestamp_replaces_for_duplicate_convergence() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.add_note(note("Garden", 50, "aa"));
        let mut again = note("Garden", 50, "aa");
        again.content = "revised body".into();
        s.add_note(again);
        assert_eq!(s.get("30023:garden").unwrap().content, "revised body");
    }

    #[test]
    fn every_physical_id_resolves_to_the_logical_note() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        // draft wrapper observed first, public edition later
        let mut draft = note("Garden", 50, "wrap1");
        draft.visibility = Visibility::Draft;
        s.add_note(draft);
        s.add_note(note("Garden", 80, "pub1"));

        let by_db = s.get("30023:garden").unwrap();
        assert_eq!(by_db.created_at, 80);
        assert_eq!(by_db.visibility, Visibility::Published);
        assert_eq!(s.get("wrap1").unwrap().event_id, "pub1");
        assert_eq!(s.get("pub1").unwrap().event_id, "pub1");
    }

    #[test]
    fn wrapper_then_public_supersession_via_events() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let cipher = cipher();

        let mut draft = note("Foo", 50, "");
        draft.visibility = Visibility::Draft;
        let mut w1 = draft.to_event(&[], &cipher).unwrap();
        w1.id = "w1".into();

        let public = note("Foo", 80, "");
        let mut w2 = public.to_event(&[], &cipher).unwrap();
        w2.id = "w2".into();

        s.add_from_event(&w1, &cipher).unwrap();
        s.add_from_event(&w2, &cipher).unwrap();

        assert_eq!(s.len(), 1);
        let kept = s.get("30023:foo").unwrap();
        assert_eq!(kept.created_at, 80);
        assert_eq!(kept.visibility, Visibility::Published);
        // the wrapper's physical id still resolves
        assert_eq!(s.get("w1").unwrap().created_at, 80);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let cipher = cipher();
        let mut ev = note("Garden", 50, "").to_event(&[], &cipher).unwrap();
        ev.id = "aa11".into();

        s.add_from_event(&ev, &cipher).unwrap();
        let after_first: Vec<Note> = s.iter().cloned().collect();
        s.add_from_event(&ev, &cipher).unwrap();
        let after_second: Vec<Note> = s.iter().cloned().collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn undecodable_events_are_discarded_silently() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let cipher = cipher();

        // titleless public event
        let mut bad = note("Garden", 50, "").to_event(&[], &cipher).unwrap();
        bad.tags.retain(|t| t.name() != Some("title"));
        bad.id = "bad1".into();
        assert!(s.add_from_event(&bad, &cipher).is_none());

        // draft sealed under someone else's key
        let theirs = AesSelfCipher::new(b"not-ours");
        let mut draft = note("Secret", 60, "");
        draft.visibility = Visibility::Draft;
        let mut foreign = draft.to_event(&[], &theirs).unwrap();
        foreign.id = "bad2".into();
        assert!(s.add_from_event(&foreign, &cipher).is_none());

        assert!(s.is_empty());
    }

    #[test]
    fn search_empty_words_lists_all_nonblank_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.add_note(note("Old Garden", 10, "aa"));
        s.add_note(note("New Orchard", 20, "bb"));
        let mut blank = note("Placeholder", 30, "cc");
        blank.content = String::new();
        s.add_note(blank);

        let all = s.search(&[]);
        let titles: Vec<&str> = all.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["New Orchard", "Old Garden"]);
    }

    #[test]
    fn search_is_prefix_union_over_words() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.add_note(note("Garden Notes", 10, "aa"));
        s.add_note(note("Gardening Tips", 20, "bb"));
        s.add_note(note("Orchard Plan", 30, "cc"));

        let hits = s.search(&["garden".into()]);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Gardening Tips"); // newest first

        let union = s.search(&["garden".into(), "orchard".into()]);
        assert_eq!(union.len(), 3);
        assert_eq!(union[0].title, "Orchard Plan");

        assert!(s.search(&["nonexistentword".into()]).is_empty());
    }

    #[test]
    fn search_matches_are_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.add_note(note("Garden Notes", 10, "aa"));
        assert_eq!(s.search(&["GARDEN".into()]).len(), 1);
        assert_eq!(s.search(&["noTes".into()]).len(), 1);
    }

    #[test]
    fn snapshot_round_trip_rebuilds_indexes() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        let mut private = note("Secret Plans", 40, "dd");
        private.visibility = Visibility::Private;
        s.add_note(note("Garden Notes", 10, "aa"));
        s.add_note(private);
        s.push_state().unwrap();
        assert!(snapshot_exists(dir.path(), "owner"));

        let mut warm = store(&dir);
        assert_eq!(warm.pull_state().unwrap(), 2);
        assert_eq!(warm.len(), 2);
        // search index and physical-id map were rebuilt through add_note
        assert_eq!(warm.search(&["secret".into()]).len(), 1);
        assert_eq!(warm.get("aa").unwrap().title, "Garden Notes");
        assert_eq!(
            warm.get("dd").unwrap().visibility,
            Visibility::Private
        );
    }

    #[test]
    fn snapshot_skips_invalid_records() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let payload = serde_json::json!({
            "notes": [
                {"id": "aa", "private": false, "draft": false, "kind": 30023,
                 "title": "Kept", "content": "x", "pubkey": "owner", "createdAt": 1},
                {"id": "bb", "private": false, "draft": false, "kind": 30023,
                 "title": "", "content": "x", "pubkey": "owner", "createdAt": 2}
            ]
        });
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(s.snapshot_path(), payload.to_string()).unwrap();

        let mut warm = store(&dir);
        assert_eq!(warm.pull_state().unwrap(), 1);
        assert_eq!(warm.iter().next().unwrap().title, "Kept");
    }

    #[test]
    fn pull_state_without_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        assert_eq!(s.pull_state().unwrap(), 0);
        assert!(s.is_empty());
    }

    #[test]
    fn delete_note_removes_and_persists() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.add_note(note("Garden", 10, "aa"));
        s.add_note(note("Orchard", 20, "bb"));
        s.push_state().unwrap();

        let removed = s.delete_note("30023:garden").unwrap().unwrap();
        assert_eq!(removed.title, "Garden");
        assert!(s.get("aa").is_none());

        let mut warm = store(&dir);
        assert_eq!(warm.pull_state().unwrap(), 1);
        assert!(warm.get("30023:garden").is_none());
        assert!(warm.get("30023:orchard").is_some());

        // deleting something unknown is a quiet no-op
        assert!(s.delete_note("30023:garden").unwrap().is_none());
    }

    #[test]
    fn title_words_indexed_once_per_document() {
        let dir = TempDir::new().unwrap();
        let mut s = store(&dir);
        s.add_note(note("Garden Notes", 10, "aa"));
        // newer version with the same identity but shoutier title
        s.add_note(note("GARDEN NOTES", 20, "bb"));
        assert_eq!(s.len(), 1);
        let hits = s.search(&["garden".into()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].created_at, 20);
    }
}
