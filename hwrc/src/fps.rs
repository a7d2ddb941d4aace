use crate::error::RcError;

/// Frame rate as a reduced ratio, `num / den` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fps {
    pub num: u32,
    pub den: u32,
}

impl Fps {
    pub fn new(num: u32, den: u32) -> Result<Self, RcError> {
        if num == 0 {
            return Err(RcError::InvalidArgument("fps num must be > 0".to_owned()));
        }
        if den == 0 {
            return Err(RcError::InvalidArgument("fps den must be > 0".to_owned()));
        }
        let g = gcd(num, den);
        Ok(Self {
            num: num / g,
            den: den / g,
        })
    }

    pub fn from_int(fps: u32) -> Result<Self, RcError> {
        Self::new(fps, 1)
    }

    /// Frames per second rounded up, never below 1.
    pub fn ceil(self) -> u32 {
        self.num.div_ceil(self.den).max(1)
    }

    /// `true` when `frames` is strictly less than one second of frames.
    pub fn exceeds(self, frames: i64) -> bool {
        (frames as i128) * (self.den as i128) < self.num as i128
    }

    /// Bits per frame for a bitrate, truncated and saturated into `i64`.
    pub fn bits_per_frame(self, bps: i64) -> i64 {
        let bits = bps as i128 * self.den as i128 / self.num as i128;
        bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl Default for Fps {
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

impl std::fmt::Display for Fps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

const fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    if a == 0 { 1 } else { a }
}
