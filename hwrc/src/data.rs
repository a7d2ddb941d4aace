use crate::error::RcError;

/// Fixed-capacity rolling window of samples.
///
/// `pos` is the next write slot and `len` the number of valid samples.
/// Once `len == capacity` every write replaces the oldest sample.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    len: usize,
    pos: usize,
    val: Vec<i32>,
}

/// Allocates a zero-filled vector, reporting allocation failure instead of aborting.
pub(crate) fn zeroed<T: Copy + Default>(capacity: usize) -> Result<Vec<T>, RcError> {
    let mut val = Vec::new();
    val.try_reserve_exact(capacity)
        .map_err(|_| RcError::MemoryError)?;
    val.resize(capacity, T::default());
    Ok(val)
}

impl CircularBuffer {
    pub fn new(capacity: usize) -> Result<Self, RcError> {
        if capacity == 0 {
            return Err(RcError::InvalidArgument(
                "circular buffer capacity must be > 0".to_owned(),
            ));
        }
        Ok(Self {
            len: 0,
            pos: 0,
            val: zeroed(capacity)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.val.len()
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

    pub fn reset(&mut self) {
        self.len = 0;
        self.pos = 0;
        self.val.fill(0);
    }

    pub fn update(&mut self, value: i32) {
        self.val[self.pos] = value;
        self.pos += 1;
        if self.pos == self.capacity() {
            self.pos = 0;
        }
        if self.len < self.capacity() {
            self.len += 1;
        }
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<i32> {
        self.recent().next()
    }

    /// Samples from newest to oldest.
    pub fn recent(&self) -> impl Iterator<Item = i32> + '_ {
        let cap = self.capacity();
        (1..=self.len).map(move |k| self.val[(self.pos + cap - k) % cap])
    }

    /// Mean of the newest `min(window, len)` samples scaled by `num / denom`.
    ///
    /// The scale is applied to the sum before dividing so fractional parts
    /// survive until the final truncation. Returns 0 without samples.
    pub fn average(&self, window: usize, num: i32, denom: i32) -> i32 {
        let count = window.min(self.len);
        if count == 0 || denom == 0 {
            return 0;
        }
        let sum: i128 = self.recent().take(count).map(i128::from).sum();
        let avg = sum * num as i128 / (count as i128 * denom as i128);
        avg.clamp(i32::MIN as i128, i32::MAX as i128) as i32
    }
}
