/// 固定容量环形缓冲区
///
/// 按槽位索引，追加与淘汰均为 O(1)；满时覆盖最旧的元素。
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// 最旧元素所在槽位
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// 创建指定容量的缓冲区，容量为 0 时按 1 处理
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// 追加元素，缓冲区已满时返回被淘汰的最旧元素
    pub fn push(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        if self.len < capacity {
            let slot = (self.head + self.len) % capacity;
            self.slots[slot] = Some(item);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// 最新元素
    pub fn last(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let slot = (self.head + self.len - 1) % self.capacity();
        self.slots[slot].as_ref()
    }

    /// 按插入顺序（旧到新）遍历
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }

    /// 最近的 n 个元素（旧到新）
    pub fn iter_recent(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        self.iter().skip(self.len.saturating_sub(n))
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut ring = RingBuffer::with_capacity(3);
        assert!(ring.is_empty());

        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.last(), Some(&2));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_eviction_keeps_order() {
        let mut ring = RingBuffer::with_capacity(3);
        for i in 1..=3 {
            ring.push(i);
        }
        assert!(ring.is_full());

        // 满后淘汰最旧元素
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ring.last(), Some(&5));
    }

    #[test]
    fn test_iter_recent() {
        let mut ring = RingBuffer::with_capacity(4);
        for i in 0..10 {
            ring.push(i);
        }

        assert_eq!(ring.iter_recent(2).copied().collect::<Vec<_>>(), vec![8, 9]);
        assert_eq!(ring.iter_recent(100).count(), 4);
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::with_capacity(2);
        ring.push("a");
        ring.push("b");
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.last(), None);
    }
}
