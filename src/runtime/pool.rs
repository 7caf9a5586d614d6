/// Recycles the short-lived vectors a runtime hands out on every step.
///
/// Each runtime owns its pools, so two playthroughs never share a buffer.
#[derive(Debug)]
pub struct VecPool<T> {
    free: Vec<Vec<T>>,
    limit: usize,
}

impl<T> VecPool<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            free: Vec::new(),
            limit,
        }
    }
    /// An empty vector, reusing a returned allocation when one is available.
    pub fn take(&mut self) -> Vec<T> {
        self.free.pop().unwrap_or_default()
    }
    pub fn give(&mut self, mut items: Vec<T>) {
        items.clear();
        if self.free.len() < self.limit && items.capacity() > 0 {
            self.free.push(items);
        }
    }
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn returned_vectors_come_back_empty() {
        let mut pool = VecPool::new(1);
        let mut items = pool.take();
        items.extend([1, 2, 3]);
        let capacity = items.capacity();
        pool.give(items);
        pool.give(vec![4]);
        assert_eq!(pool.available(), 1);

        let items = pool.take();
        assert!(items.is_empty());
        assert_eq!(items.capacity(), capacity);
        assert_eq!(pool.available(), 0);
    }
}
