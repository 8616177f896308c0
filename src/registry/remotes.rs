//! Known peer registries.

use parking_lot::RwLock;

use crate::utils::dedupe;

/// Ordered, duplicate-free list of peer registry dump URLs.
#[derive(Debug, Default)]
pub struct RemoteRegistries {
    list: RwLock<Vec<String>>,
}

impl RemoteRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a peer if it isn't known yet. Returns true if it was added.
    pub fn add(&self, url: &str) -> bool {
        let mut list = self.list.write();
        if list.iter().any(|known| known == url) {
            return false;
        }
        list.push(url.to_string());
        true
    }

    /// Append many peers, keeping first-seen order.
    pub fn extend<I>(&self, urls: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut list = self.list.write();
        let merged = list.drain(..).chain(urls).collect();
        *list = dedupe(merged);
    }

    /// Replace the list with persisted peers.
    pub fn load(&self, urls: Vec<String>) {
        *self.list.write() = dedupe(urls);
    }

    pub fn contains(&self, url: &str) -> bool {
        self.list.read().iter().any(|known| known == url)
    }

    /// Copy of the current list.
    pub fn list(&self) -> Vec<String> {
        self.list.read().clone()
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dedupes() {
        let remotes = RemoteRegistries::new();
        assert!(remotes.add("https://peer.example/api/plain/tweets"));
        assert!(!remotes.add("https://peer.example/api/plain/tweets"));
        assert_eq!(remotes.len(), 1);
    }

    #[test]
    fn test_extend_and_load_keep_order() {
        let remotes = RemoteRegistries::new();
        remotes.add("b");
        remotes.extend(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(remotes.list(), vec!["b", "a", "c"]);

        remotes.load(vec!["z".into(), "z".into(), "y".into()]);
        assert_eq!(remotes.list(), vec!["z", "y"]);
        assert!(remotes.contains("y"));
        assert!(!remotes.contains("b"));
    }
}
