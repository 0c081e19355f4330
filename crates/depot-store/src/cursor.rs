use std::fmt;

use crate::error::StoreResult;

type Items<'a, T> = Box<dyn Iterator<Item = StoreResult<T>> + Send + 'a>;
type Release<'a> = Box<dyn FnOnce() + Send + 'a>;

/// A lazy, closeable sequence of store results.
///
/// A cursor reports a size snapshot taken when it was opened (`None` when the
/// size is unknown, as for filtered views), yields elements one at a time
/// without materialising the backing collection, and releases its backend
/// resources exactly once: `close` consumes the cursor, and dropping an
/// unclosed cursor releases them as well.
///
/// Elements are `StoreResult<T>` because a lookup performed lazily can fail
/// after the cursor was handed out.
pub struct ResultCursor<'a, T> {
    size: Option<usize>,
    items: Items<'a, T>,
    release: Option<Release<'a>>,
}

impl<'a, T: 'a> ResultCursor<'a, T> {
    /// A cursor over `items` with the given size snapshot.
    pub fn new(size: Option<usize>, items: impl Iterator<Item = StoreResult<T>> + Send + 'a) -> Self {
        Self {
            size,
            items: Box::new(items),
            release: None,
        }
    }

    /// A cursor with a known size.
    pub fn sized(size: usize, items: impl Iterator<Item = StoreResult<T>> + Send + 'a) -> Self {
        Self::new(Some(size), items)
    }

    /// A cursor whose size is unknown.
    pub fn r#unsized(items: impl Iterator<Item = StoreResult<T>> + Send + 'a) -> Self {
        Self::new(None, items)
    }

    /// A cursor over already-materialised values.
    pub fn from_vec(values: Vec<T>) -> Self
    where
        T: Send,
    {
        let size = values.len();
        Self::sized(size, values.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::sized(0, std::iter::empty())
    }

    /// Register the hook that frees backend iteration resources.
    ///
    /// Replaces any previously registered hook.
    pub fn on_close(mut self, release: impl FnOnce() + Send + 'a) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// Size snapshot taken when the cursor was opened.
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Release the cursor's backend resources.
    pub fn close(mut self) {
        self.release_now();
    }

    /// Keep only the successful elements matching `predicate`.
    ///
    /// The view wraps this cursor lazily; its size is unknown and closing it
    /// closes the underlying cursor.
    pub fn filter_ok(mut self, mut predicate: impl FnMut(&T) -> bool + Send + 'a) -> Self {
        let (items, release) = self.take_parts();
        Self {
            size: None,
            items: Box::new(items.filter(move |item| match item {
                Ok(value) => predicate(value),
                Err(_) => true,
            })),
            release,
        }
    }

    /// Transform every successful element, keeping size and release hook.
    pub fn map_ok<U: 'a>(mut self, mut f: impl FnMut(T) -> U + Send + 'a) -> ResultCursor<'a, U> {
        let size = self.size;
        let (items, release) = self.take_parts();
        ResultCursor {
            size,
            items: Box::new(items.map(move |item| item.map(&mut f))),
            release,
        }
    }

    /// Drain the cursor into a vector, stopping at the first error, then
    /// close it.
    pub fn collect_all(mut self) -> StoreResult<Vec<T>> {
        let mut values = Vec::with_capacity(self.size.unwrap_or(0));
        let result = loop {
            match self.items.next() {
                Some(Ok(value)) => values.push(value),
                Some(Err(e)) => break Err(e),
                None => break Ok(values),
            }
        };
        self.release_now();
        result
    }

    fn take_parts(&mut self) -> (Items<'a, T>, Option<Release<'a>>) {
        let items = std::mem::replace(&mut self.items, Box::new(std::iter::empty()));
        (items, self.release.take())
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<'a, T> Iterator for ResultCursor<'a, T> {
    type Item = StoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

impl<'a, T> Drop for ResultCursor<'a, T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<'a, T> fmt::Debug for ResultCursor<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("size", &self.size)
            .field("open", &self.release.is_some())
            .finish()
    }
}
