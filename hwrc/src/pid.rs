use crate::data::zeroed;
use crate::error::RcError;

/// Proportional-integral-derivative corrector over the last `len` errors.
///
/// `p` is the newest error, `i` the sum of the newest `len` errors and `d`
/// the difference between the two newest errors. The integral is kept
/// incrementally: the error leaving the window is subtracted as the new one
/// enters, so it always equals a fresh sum over the window.
#[derive(Debug, Clone)]
pub struct PidCtx {
    p: i64,
    i: i64,
    d: i64,
    coef_p: i32,
    coef_i: i32,
    coef_d: i32,
    div: i32,
    count: u64,
    history: Vec<i32>,
    pos: usize,
    filled: usize,
}

fn check_param(div: i32, len: usize) -> Result<(), RcError> {
    if div <= 0 {
        return Err(RcError::InvalidArgument(format!("pid divisor {div} must be > 0")));
    }
    if len == 0 {
        return Err(RcError::InvalidArgument("pid window must be > 0".to_owned()));
    }
    Ok(())
}

impl PidCtx {
    pub fn new(coef_p: i32, coef_i: i32, coef_d: i32, div: i32, len: usize) -> Result<Self, RcError> {
        check_param(div, len)?;
        Ok(Self {
            p: 0,
            i: 0,
            d: 0,
            coef_p,
            coef_i,
            coef_d,
            div,
            count: 0,
            history: zeroed(len)?,
            pos: 0,
            filled: 0,
        })
    }

    pub fn reset(&mut self) {
        self.p = 0;
        self.i = 0;
        self.d = 0;
        self.count = 0;
        self.pos = 0;
        self.filled = 0;
        self.history.fill(0);
    }

    /// Replaces the tunables. A new window length keeps the newest errors
    /// that still fit and re-sums the integral over them.
    pub fn set_param(
        &mut self,
        coef_p: i32,
        coef_i: i32,
        coef_d: i32,
        div: i32,
        len: usize,
    ) -> Result<(), RcError> {
        check_param(div, len)?;
        self.coef_p = coef_p;
        self.coef_i = coef_i;
        self.coef_d = coef_d;
        self.div = div;

        if len != self.history.len() {
            let mut kept: Vec<i32> = self.recent().take(len).collect();
            kept.reverse();
            let mut history = zeroed(len)?;
            history[..kept.len()].copy_from_slice(&kept);
            self.filled = kept.len();
            self.pos = kept.len() % len;
            self.i = kept.iter().map(|&e| e as i64).sum();
            self.history = history;
        }
        Ok(())
    }

    fn recent(&self) -> impl Iterator<Item = i32> + '_ {
        let cap = self.history.len();
        (1..=self.filled).map(move |k| self.history[(self.pos + cap - k) % cap])
    }

    pub fn update(&mut self, error: i32) {
        let cap = self.history.len();
        let previous = self.recent().next();

        if self.filled == cap {
            self.i -= self.history[self.pos] as i64;
        } else {
            self.filled += 1;
        }
        self.history[self.pos] = error;
        self.pos = (self.pos + 1) % cap;

        self.p = error as i64;
        self.i += error as i64;
        self.d = previous.map_or(0, |prev| error as i64 - prev as i64);
        self.count += 1;
    }

    /// `(coef_p * p + coef_i * i + coef_d * d) / div`, truncated toward zero.
    pub fn calc(&self) -> i32 {
        let acc = self.coef_p as i128 * self.p as i128
            + self.coef_i as i128 * self.i as i128
            + self.coef_d as i128 * self.d as i128;
        (acc / self.div as i128).clamp(i32::MIN as i128, i32::MAX as i128) as i32
    }

    pub fn window(&self) -> usize {
        self.history.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// The integral and derivative cover a full window once this is true.
    pub fn is_settled(&self) -> bool {
        self.count >= self.history.len() as u64
    }

    pub fn terms(&self) -> (i64, i64, i64) {
        (self.p, self.i, self.d)
    }
}
