use std::collections::HashMap;

use anyhow::{bail, Result};
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{Source, SourceId, UploadedFile};

const URL_PREFIX: &str = "blob:lexscan/";

/// In-memory bytes behind each live object URL.
#[derive(Default)]
struct BlobStore {
    blobs: HashMap<String, Bytes>,
    released: usize,
}

impl BlobStore {
    fn create_url(&mut self, bytes: Bytes) -> String {
        let url = format!("{URL_PREFIX}{}", Uuid::new_v4());
        self.blobs.insert(url.clone(), bytes);
        url
    }

    /// Drop the bytes behind `url`. Returns false if it was already released.
    fn revoke(&mut self, url: &str) -> bool {
        if self.blobs.remove(url).is_some() {
            self.released += 1;
            debug!(url, "released object url");
            true
        } else {
            warn!(url, "object url already released");
            false
        }
    }
}

/// Uploaded documents and the one currently shown in the viewer.
///
/// Append-only, except that a highlighted copy may supersede the upload it
/// was made from. Every object URL is released exactly once: when its source
/// is superseded, or on teardown.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
    selected: Option<SourceId>,
    store: BlobStore,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under a fresh object URL and build a source for them.
    /// The source is not listed until passed to `add_sources` or `supersede`.
    pub fn register_bytes(&mut self, name: &str, bytes: Bytes, highlighted: bool) -> Source {
        let url = self.store.create_url(bytes);
        Source {
            id: SourceId::new(),
            name: name.to_string(),
            upload_time: Utc::now(),
            url,
            highlighted,
        }
    }

    /// Register and list a raw upload in one step.
    pub fn register_upload(&mut self, file: &UploadedFile) -> Source {
        let source = self.register_bytes(&file.name, file.bytes.clone(), false);
        self.add_sources(vec![source.clone()], false);
        source
    }

    /// Append sources. With `replace_last`, the most recently added entry is
    /// dropped first and its bytes released.
    pub fn add_sources(&mut self, new_sources: Vec<Source>, replace_last: bool) {
        if replace_last {
            if let Some(last) = self.sources.pop() {
                self.store.revoke(&last.url);
                if self.selected == Some(last.id) {
                    self.selected = new_sources.first().map(|s| s.id);
                }
            }
        }
        for source in new_sources {
            if self.sources.iter().any(|s| s.id == source.id) {
                warn!(id = %source.id, "duplicate source id ignored");
                continue;
            }
            self.sources.push(source);
        }
    }

    /// Replace `original` in place with `replacement`, releasing the original's
    /// bytes. Selection follows the replacement.
    pub fn supersede(&mut self, original: SourceId, replacement: Source) -> Result<()> {
        if self.sources.iter().any(|s| s.id == replacement.id) {
            bail!("source {} already registered", replacement.id);
        }
        let Some(pos) = self.sources.iter().position(|s| s.id == original) else {
            bail!("unknown source {original}");
        };
        let old = std::mem::replace(&mut self.sources[pos], replacement);
        self.store.revoke(&old.url);
        if self.selected == Some(old.id) {
            self.selected = Some(self.sources[pos].id);
        }
        Ok(())
    }

    /// Set the viewed document. `None` shows nothing.
    pub fn select_source(&mut self, id: Option<SourceId>) -> Result<()> {
        if let Some(id) = id {
            if self.get(id).is_none() {
                bail!("unknown source {id}");
            }
        }
        self.selected = id;
        Ok(())
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, id: SourceId) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn selected(&self) -> Option<&Source> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Bytes behind a listed source, for the viewer.
    pub fn bytes(&self, id: SourceId) -> Option<Bytes> {
        let source = self.get(id)?;
        self.store.blobs.get(&source.url).cloned()
    }

    /// Drop bytes registered with `register_bytes` that were never listed.
    pub fn discard(&mut self, source: &Source) {
        if self.get(source.id).is_none() {
            self.store.revoke(&source.url);
        }
    }

    pub fn live_url_count(&self) -> usize {
        self.store.blobs.len()
    }

    pub fn released_url_count(&self) -> usize {
        self.store.released
    }

    /// Release every live object URL. Sources stay listed but lose their bytes.
    pub fn release_all(&mut self) {
        let urls: Vec<String> = self.store.blobs.keys().cloned().collect();
        for url in urls {
            self.store.revoke(&url);
        }
        self.selected = None;
    }
}

impl Drop for SourceRegistry {
    fn drop(&mut self) {
        if !self.store.blobs.is_empty() {
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn upload(name: &str) -> UploadedFile {
        UploadedFile::new(name, Bytes::from_static(b"%PDF-1.7"))
    }

    #[test]
    fn ids_are_unique_across_adds() {
        let mut reg = SourceRegistry::new();
        for i in 0..20 {
            reg.register_upload(&upload(&format!("doc-{i}.pdf")));
        }
        let a = reg.register_bytes("x.pdf", Bytes::new(), false);
        let b = reg.register_bytes("y.pdf", Bytes::new(), false);
        reg.add_sources(vec![a, b], true);

        let ids: HashSet<_> = reg.sources().iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), reg.sources().len());
    }

    #[test]
    fn duplicate_id_is_not_listed_twice() {
        let mut reg = SourceRegistry::new();
        let s = reg.register_upload(&upload("a.pdf"));
        reg.add_sources(vec![s], false);
        assert_eq!(reg.sources().len(), 1);
    }

    #[test]
    fn replace_last_releases_superseded_bytes() {
        let mut reg = SourceRegistry::new();
        let original = reg.register_upload(&upload("contract.pdf"));
        reg.select_source(Some(original.id)).unwrap();

        let highlighted = reg.register_bytes("contract.pdf", Bytes::from_static(b"hl"), true);
        let hl_id = highlighted.id;
        reg.add_sources(vec![highlighted], true);

        assert_eq!(reg.sources().len(), 1);
        assert!(reg.sources()[0].highlighted);
        assert_eq!(reg.released_url_count(), 1);
        assert_eq!(reg.live_url_count(), 1);
        assert_eq!(reg.selected().map(|s| s.id), Some(hl_id));
    }

    #[test]
    fn supersede_keeps_position_and_moves_selection() {
        let mut reg = SourceRegistry::new();
        let first = reg.register_upload(&upload("one.pdf"));
        let second = reg.register_upload(&upload("two.pdf"));
        reg.select_source(Some(first.id)).unwrap();

        let hl = reg.register_bytes("one.pdf", Bytes::from_static(b"hl"), true);
        let hl_id = hl.id;
        reg.supersede(first.id, hl).unwrap();

        assert_eq!(reg.sources()[0].id, hl_id);
        assert_eq!(reg.sources()[1].id, second.id);
        assert_eq!(reg.selected().map(|s| s.id), Some(hl_id));
        assert!(reg.bytes(first.id).is_none());
        assert_eq!(reg.bytes(hl_id).unwrap(), Bytes::from_static(b"hl"));
    }

    #[test]
    fn supersede_unknown_source_fails() {
        let mut reg = SourceRegistry::new();
        let hl = reg.register_bytes("x.pdf", Bytes::new(), true);
        assert!(reg.supersede(SourceId::new(), hl).is_err());
    }

    #[test]
    fn select_unknown_source_fails_and_keeps_selection() {
        let mut reg = SourceRegistry::new();
        let s = reg.register_upload(&upload("a.pdf"));
        reg.select_source(Some(s.id)).unwrap();
        assert!(reg.select_source(Some(SourceId::new())).is_err());
        assert_eq!(reg.selected().map(|x| x.id), Some(s.id));
        reg.select_source(None).unwrap();
        assert!(reg.selected().is_none());
    }

    #[test]
    fn release_all_is_exactly_once() {
        let mut reg = SourceRegistry::new();
        reg.register_upload(&upload("a.pdf"));
        reg.register_upload(&upload("b.pdf"));
        reg.release_all();
        assert_eq!(reg.released_url_count(), 2);
        assert_eq!(reg.live_url_count(), 0);

        reg.release_all();
        assert_eq!(reg.released_url_count(), 2);
    }

    #[test]
    fn discard_only_touches_unlisted_bytes() {
        let mut reg = SourceRegistry::new();
        let listed = reg.register_upload(&upload("a.pdf"));
        let stray = reg.register_bytes("b.pdf", Bytes::new(), true);
        reg.discard(&listed);
        reg.discard(&stray);
        assert_eq!(reg.live_url_count(), 1);
        assert!(reg.bytes(listed.id).is_some());
    }
}
