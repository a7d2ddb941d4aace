use crate::data::zeroed;
use crate::error::RcError;

/// Window size used by the rate controller for its quantizer model.
pub const LINEAR_MODEL_STATISTIC_COUNT: usize = 15;

/// Rolling least-squares model of bits against quantizer step.
///
/// Each sample keeps the quantizer step `x`, the produced bits `r` and
/// `y = x * x * r`. Bits follow `r = a / x + b / (x * x)`, which is the
/// straight line `y = a * x + b`, so the window is refitted with ordinary
/// least squares after every insert. Sums are taken in `i128` and the
/// coefficients saturate into `i64`.
#[derive(Debug, Clone)]
pub struct LinReg {
    n: usize,
    i: usize,
    a: i64,
    b: i64,
    x: Vec<i32>,
    r: Vec<i32>,
    y: Vec<i64>,
}

fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn derive_y(x: i32, r: i32) -> i64 {
    saturate(x as i128 * x as i128 * r as i128)
}

impl LinReg {
    pub fn new(capacity: usize) -> Result<Self, RcError> {
        if capacity == 0 {
            return Err(RcError::InvalidArgument(
                "linear regression capacity must be > 0".to_owned(),
            ));
        }
        Ok(Self {
            n: 0,
            i: 0,
            a: 0,
            b: 0,
            x: zeroed(capacity)?,
            r: zeroed(capacity)?,
            y: zeroed(capacity)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.x.len()
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn coefficients(&self) -> (i64, i64) {
        (self.a, self.b)
    }

    pub fn reset(&mut self) {
        self.n = 0;
        self.i = 0;
        self.a = 0;
        self.b = 0;
    }

    pub fn update(&mut self, x: i32, r: i32) {
        self.x[self.i] = x;
        self.r[self.i] = r;
        self.i = (self.i + 1) % self.capacity();
        if self.n < self.capacity() {
            self.n += 1;
        }
        self.fit();
        log::trace!(
            "linreg x {} r {} -> a {} b {} over {} samples",
            x,
            r,
            self.a,
            self.b,
            self.n
        );
    }

    fn fit(&mut self) {
        let cap = self.capacity();
        let mut sx: i128 = 0;
        let mut sxx: i128 = 0;
        let mut sy: i128 = 0;
        let mut sxy: i128 = 0;

        for k in 1..=self.n {
            let idx = (self.i + cap - k) % cap;
            let y = derive_y(self.x[idx], self.r[idx]);
            self.y[idx] = y;

            let x = self.x[idx] as i128;
            let y = y as i128;
            sx += x;
            sxx += x * x;
            sy += y;
            sxy = sxy.saturating_add(x * y);
        }

        let n = self.n as i128;
        let den = (n * sxx).saturating_sub(sx * sx);
        if den == 0 {
            self.a = 0;
            self.b = saturate(sy / n);
            return;
        }

        let num = n.saturating_mul(sxy).saturating_sub(sx.saturating_mul(sy));
        let a = num / den;
        self.a = saturate(a);
        self.b = saturate(sy.saturating_sub(a.saturating_mul(sx)) / n);
    }

    /// Quantizer step predicted to produce `r` bits.
    ///
    /// Solves `r * x * x - a * x - b = 0` for the positive root. Returns 0
    /// for an empty model or a non-positive bit count.
    pub fn calc(&self, r: i32) -> i32 {
        if self.n == 0 || r <= 0 {
            return 0;
        }
        let a = self.a as i128;
        let b = self.b as i128;
        let r = r as i128;

        let disc = (a * a).saturating_add(4 * r * b);
        let root = if disc > 0 { (disc as u128).isqrt() as i128 } else { 0 };
        let x = (a + root) / (2 * r);
        x.clamp(0, i32::MAX as i128) as i32
    }
}
