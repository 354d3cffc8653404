use std::mem::MaybeUninit;

/// A slab of connection slots.
///
/// A `Slab` stores values of type `T` in a contiguous array and hands out
/// small indices that are recycled after removal. The reactor uses it as its
/// connection table: the slot index is the low half of a connection token.
///
/// Internally, it keeps track of:
/// - initialized slots,
/// - free indices,
/// - the number of live values.
///
/// # Safety
///
/// This type uses `unsafe` internally. Every access goes through the `used`
/// bitmap first, so the public API is safe.
pub(crate) struct Slab<T> {
    /// Storage for items (may contain uninitialized slots).
    items: Vec<MaybeUninit<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    /// Marks whether a slot is currently initialized.
    used: Vec<bool>,
    /// Number of initialized slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with `size` pre-allocated slots.
    ///
    /// Free indices are handed out lowest first.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| MaybeUninit::<T>::uninit()).collect();
        let free = (0..size).rev().collect();
        let used = vec![false; size];

        Self {
            items,
            free,
            used,
            len: 0,
        }
    }

    /// Inserts a value into the slab and returns its index.
    ///
    /// If a free slot is available, it is reused.
    /// Otherwise, the slab doubles its size.
    pub(crate) fn insert(&mut self, item: T) -> usize {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let len = self.items.len();
                let new_len = if len == 0 { 1 } else { 2 * len };

                self.items
                    .extend((len..new_len).map(|_| MaybeUninit::<T>::uninit()));
                self.free.extend(((len + 1)..new_len).rev());
                self.used.resize(new_len, false);

                len
            }
        };

        self.items[index] = MaybeUninit::new(item);
        self.used[index] = true;
        self.len += 1;

        index
    }

    /// Returns the index the next [`insert`](Self::insert) will use.
    pub(crate) fn vacant_key(&self) -> usize {
        self.free.last().copied().unwrap_or(self.items.len())
    }

    /// Removes and returns the value stored at `index`.
    ///
    /// The slot becomes free and may be reused by future insertions.
    ///
    /// # Panics
    ///
    /// Panics if the slot is out of range or not in use.
    pub(crate) fn remove(&mut self, index: usize) -> T {
        assert!(index < self.items.len(), "Index out of range");
        assert!(self.used[index], "Item is not set");

        self.free.push(index);
        self.used[index] = false;
        self.len -= 1;

        let item = unsafe { self.items[index].assume_init_read() };
        self.items[index] = MaybeUninit::uninit();

        item
    }

    /// Returns `true` if `index` holds a value.
    fn contains(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(false)
    }

    /// Returns a shared reference to the value at `index`.
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        if !self.contains(index) {
            return None;
        }

        Some(unsafe { self.items[index].assume_init_ref() })
    }

    /// Number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Indices of all live values, in slot order.
    pub(crate) fn indices(&self) -> Vec<usize> {
        self.used
            .iter()
            .enumerate()
            .filter_map(|(i, &used)| used.then_some(i))
            .collect()
    }
}

impl<T> Drop for Slab<T> {
    /// Drops all initialized elements stored in the slab.
    fn drop(&mut self) {
        for (slot, &used) in self.items.iter_mut().zip(self.used.iter()) {
            if used {
                unsafe {
                    slot.assume_init_drop();
                }
            }
        }
    }
}
