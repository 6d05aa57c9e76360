//! In-memory playlist with a current position.
//!
//! Entries are appended by open and never reordered. The current index only
//! moves by one step at a time and never wraps around.

use crate::media::MediaReference;

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    items: Vec<MediaReference>,
    /// `None` while empty (the `-1` index of the UI layer)
    current: Option<usize>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[MediaReference] {
        &self.items
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&MediaReference> {
        self.current.and_then(|idx| self.items.get(idx))
    }

    /// Append an entry and make it current. Returns its index.
    pub fn push_current(&mut self, media: MediaReference) -> usize {
        self.items.push(media);
        let idx = self.items.len() - 1;
        self.current = Some(idx);
        idx
    }

    /// Undo the last [`push_current`](Self::push_current), restoring the
    /// index that was current before it.
    pub fn rollback_push(&mut self, previous: Option<usize>) {
        if self.items.pop().is_some() {
            self.current = previous.filter(|idx| *idx < self.items.len());
        }
    }

    pub fn has_next(&self) -> bool {
        matches!(self.current, Some(idx) if idx + 1 < self.items.len())
    }

    pub fn has_previous(&self) -> bool {
        matches!(self.current, Some(idx) if idx > 0)
    }

    /// Move to the next entry. No-op at the end.
    pub fn advance(&mut self) -> Option<&MediaReference> {
        if !self.has_next() {
            return None;
        }
        self.current = self.current.map(|idx| idx + 1);
        self.current()
    }

    /// Move to the previous entry. No-op at the start.
    pub fn retreat(&mut self) -> Option<&MediaReference> {
        if !self.has_previous() {
            return None;
        }
        self.current = self.current.map(|idx| idx - 1);
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(n: usize) -> Playlist {
        let mut list = Playlist::new();
        for i in 0..n {
            list.push_current(MediaReference::new(format!("/media/{i}.mp4")));
        }
        list
    }

    #[test]
    fn test_empty() {
        let mut list = Playlist::new();
        assert_eq!(list.current_index(), None);
        assert!(list.current().is_none());
        assert!(list.advance().is_none());
        assert!(list.retreat().is_none());
    }

    #[test]
    fn test_push_sets_current() {
        let list = playlist(3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.current_index(), Some(2));
        assert_eq!(list.current().map(|m| m.locator()), Some("/media/2.mp4"));
    }

    #[test]
    fn test_bounds_clamp() {
        let mut list = playlist(2);
        assert!(list.advance().is_none());
        assert_eq!(list.current_index(), Some(1));

        assert!(list.retreat().is_some());
        assert_eq!(list.current_index(), Some(0));
        assert!(list.retreat().is_none());
        assert_eq!(list.current_index(), Some(0));
    }

    #[test]
    fn test_rollback() {
        let mut list = playlist(2);
        list.retreat();
        list.push_current(MediaReference::new("/media/broken.avi"));
        assert_eq!(list.current_index(), Some(2));

        list.rollback_push(Some(0));
        assert_eq!(list.len(), 2);
        assert_eq!(list.current_index(), Some(0));

        let mut single = Playlist::new();
        single.push_current(MediaReference::new("/media/x.avi"));
        single.rollback_push(None);
        assert!(single.is_empty());
        assert_eq!(single.current_index(), None);
    }
}
