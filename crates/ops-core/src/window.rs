use std::collections::VecDeque;

/// Fixed-capacity, newest-first collection.
///
/// Pushing past capacity evicts the oldest item. `revision` increases on every
/// mutation so views can tell when to repaint.
#[derive(Clone, Debug)]
pub struct RecentWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
    revision: u64,
}

impl<T> RecentWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            revision: 0,
        }
    }

    /// Insert as the newest item, returning the evicted oldest item if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_front(item);
        self.revision = self.revision.wrapping_add(1);
        if self.items.len() > self.capacity {
            self.items.pop_back()
        } else {
            None
        }
    }

    /// Load a snapshot ordered most-recent-first, as the REST endpoints return it.
    pub fn seed<I>(&mut self, newest_first: I)
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: DoubleEndedIterator,
    {
        for item in newest_first.into_iter().rev() {
            self.push(item);
        }
    }

    /// Items in display order, newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Items in the order they were inserted, oldest first.
    pub fn iter_insertion_order(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<&T> {
        self.items.iter().find(|item| predicate(item))
    }

    /// Mutable lookup; bumps the revision only when a match is returned.
    pub fn find_mut(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<&mut T> {
        let found = self.items.iter_mut().find(|item| predicate(item));
        if found.is_some() {
            self.revision = self.revision.wrapping_add(1);
        }
        found
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut window = RecentWindow::new(3);
        assert_eq!(window.push(1), None);
        assert_eq!(window.push(2), None);
        assert_eq!(window.push(3), None);
        assert_eq!(window.push(4), Some(1));
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![4, 3, 2]);
        assert_eq!(
            window.iter_insertion_order().copied().collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn seed_keeps_newest_first_order() {
        let mut window = RecentWindow::new(2);
        window.seed(vec!["c", "b", "a"]);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec!["c", "b"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = RecentWindow::new(0);
        window.push('x');
        window.push('y');
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.newest(), Some(&'y'));
    }

    #[test]
    fn find_mut_only_bumps_revision_on_match() {
        let mut window = RecentWindow::new(4);
        window.push(10);
        let before = window.revision();
        assert!(window.find_mut(|v| *v == 99).is_none());
        assert_eq!(window.revision(), before);
        if let Some(value) = window.find_mut(|v| *v == 10) {
            *value = 11;
        }
        assert_eq!(window.revision(), before + 1);
        assert_eq!(window.newest(), Some(&11));
    }

    proptest! {
        #[test]
        fn holds_the_k_most_recent_in_insertion_order(
            capacity in 1usize..32,
            items in proptest::collection::vec(any::<u32>(), 0..128),
        ) {
            let mut window = RecentWindow::new(capacity);
            for item in &items {
                window.push(*item);
            }
            let start = items.len().saturating_sub(capacity);
            let expected: Vec<u32> = items[start..].to_vec();
            let actual: Vec<u32> = window.iter_insertion_order().copied().collect();
            prop_assert_eq!(actual, expected);
            prop_assert!(window.len() <= capacity);
        }
    }
}
