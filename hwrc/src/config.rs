use crate::error::RcError;
use crate::fps::Fps;

pub const DEFAULT_BPS: i32 = 2_000_000;
pub const DEFAULT_FPS: i32 = 30;
pub const DEFAULT_GOP: i32 = 60;
pub const DEFAULT_QP: i32 = 26;
pub const DEFAULT_WIDTH: i32 = 1280;
pub const DEFAULT_HEIGHT: i32 = 720;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RcMode {
    /// Fixed quantizer, no bit allocation.
    Cqp,
    Vbr,
    #[default]
    Cbr,
}

impl RcMode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Cqp),
            1 => Some(Self::Vbr),
            2 => Some(Self::Cbr),
            _ => None,
        }
    }
}

/// Rate control settings as seen by the engine. The engine keeps the last
/// snapshot it was given and compares by value to detect changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcConfig {
    pub mode: RcMode,
    pub bps_min: i32,
    pub bps_target: i32,
    pub bps_max: i32,
    pub fps_in: Fps,
    pub fps_out: Fps,
    pub gop: i32,
    pub skip_cnt: i32,
}

impl Default for RcConfig {
    fn default() -> Self {
        Self::with_bitrate(DEFAULT_BPS)
    }
}

impl RcConfig {
    /// CBR at `bps` with a ±25% band, 30 fps, GOP 60.
    pub fn with_bitrate(bps: i32) -> Self {
        let (bps_min, bps_max) = band(bps);
        Self {
            mode: RcMode::Cbr,
            bps_min,
            bps_target: bps,
            bps_max,
            fps_in: Fps::default(),
            fps_out: Fps::default(),
            gop: DEFAULT_GOP,
            skip_cnt: 0,
        }
    }

    pub fn validate(&self) -> Result<(), RcError> {
        if self.bps_target <= 0 {
            return Err(RcError::InvalidArgument(format!(
                "invalid bit rate {}",
                self.bps_target
            )));
        }
        if self.bps_min < 0 || self.bps_max < 0 {
            return Err(RcError::InvalidArgument(format!(
                "invalid bit rate range [{} : {}]",
                self.bps_min, self.bps_max
            )));
        }
        if self.bps_min > self.bps_target || (self.bps_max != 0 && self.bps_max < self.bps_target) {
            return Err(RcError::InvalidArgument(format!(
                "bit rate {} outside [{} : {}]",
                self.bps_target, self.bps_min, self.bps_max
            )));
        }
        if self.gop < 0 {
            return Err(RcError::InvalidArgument(format!("invalid gop {}", self.gop)));
        }
        Ok(())
    }
}

fn band(bps: i32) -> (i32, i32) {
    let bps = bps as i64;
    let min = bps * 3 / 4;
    let max = (bps * 5 / 4).min(i32::MAX as i64);
    (min as i32, max as i32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    #[default]
    Yuv420sp,
    Yuv420p,
}

/// Picture pre-processing settings. Carried for the hardware layer only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepConfig {
    pub width: i32,
    pub height: i32,
    pub hor_stride: i32,
    pub ver_stride: i32,
    pub format: FrameFormat,
    pub rotation: i32,
    pub mirroring: bool,
    pub denoise: bool,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            hor_stride: DEFAULT_WIDTH,
            ver_stride: DEFAULT_HEIGHT,
            format: FrameFormat::Yuv420sp,
            rotation: 0,
            mirroring: false,
            denoise: false,
        }
    }
}

/// Configuration owned by the encoder pipeline and read by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncCfgSet {
    pub prep: PrepConfig,
    pub rc: RcConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum H264Profile {
    Baseline = 66,
    Main = 77,
    High = 100,
}

impl H264Profile {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            66 => Some(Self::Baseline),
            77 => Some(Self::Main),
            100 => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum H264Level {
    L1_0 = 10,
    L1b = 99,
    L1_1 = 11,
    L1_2 = 12,
    L1_3 = 13,
    L2_0 = 20,
    L2_1 = 21,
    L2_2 = 22,
    L3_0 = 30,
    L3_1 = 31,
    L3_2 = 32,
    L4_0 = 40,
    L4_1 = 41,
    L4_2 = 42,
    L5_0 = 50,
    L5_1 = 51,
}

impl H264Level {
    const ALL: [H264Level; 16] = [
        Self::L1_0,
        Self::L1b,
        Self::L1_1,
        Self::L1_2,
        Self::L1_3,
        Self::L2_0,
        Self::L2_1,
        Self::L2_2,
        Self::L3_0,
        Self::L3_1,
        Self::L3_2,
        Self::L4_0,
        Self::L4_1,
        Self::L4_2,
        Self::L5_0,
        Self::L5_1,
    ];

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|&l| l as i32 == value)
    }
}

/// Encoder settings as supplied by the user, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncUserConfig {
    pub profile: i32,
    pub level: i32,
    pub width: i32,
    pub height: i32,
    pub hor_stride: i32,
    pub ver_stride: i32,
    pub fps_in: i32,
    pub fps_out: i32,
    pub gop: i32,
    pub rc_mode: i32,
    pub qp: i32,
    pub bps: i32,
}

impl Default for EncUserConfig {
    fn default() -> Self {
        Self {
            profile: H264Profile::Baseline as i32,
            level: H264Level::L4_0 as i32,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            hor_stride: DEFAULT_WIDTH,
            ver_stride: DEFAULT_HEIGHT,
            fps_in: DEFAULT_FPS,
            fps_out: DEFAULT_FPS,
            gop: DEFAULT_GOP,
            rc_mode: RcMode::Cbr as i32,
            qp: DEFAULT_QP,
            bps: DEFAULT_BPS,
        }
    }
}

impl EncUserConfig {
    /// Clamps recoverable fields to their defaults and rejects the rest.
    pub fn sanitize(&mut self) -> Result<(), RcError> {
        if H264Profile::from_i32(self.profile).is_none() {
            log::warn!("invalid profile {} set to default baseline", self.profile);
            self.profile = H264Profile::Baseline as i32;
        }

        if H264Level::from_i32(self.level).is_none() {
            log::warn!("invalid level {} set to default 4.0", self.level);
            self.level = H264Level::L4_0 as i32;
        }

        if self.fps_in <= 0 {
            log::warn!("invalid input fps {} set to default {}", self.fps_in, DEFAULT_FPS);
            self.fps_in = DEFAULT_FPS;
        }

        if self.fps_out <= 0 {
            log::warn!("invalid output fps {} set to fps_in {}", self.fps_out, self.fps_in);
            self.fps_out = self.fps_in;
        }

        if self.gop <= 0 {
            log::warn!("invalid gop {} set to fps_out {}", self.gop, self.fps_out);
            self.gop = self.fps_out;
        }

        if RcMode::from_i32(self.rc_mode).is_none() {
            log::error!("invalid rc_mode {}", self.rc_mode);
            return Err(RcError::InvalidArgument(format!("invalid rc_mode {}", self.rc_mode)));
        }

        if self.qp <= 0 || self.qp > 51 {
            log::warn!("invalid qp {} set to default {}", self.qp, DEFAULT_QP);
            self.qp = DEFAULT_QP;
        }

        if self.bps <= 0 {
            log::error!("invalid bit rate {}", self.bps);
            return Err(RcError::InvalidArgument(format!("invalid bit rate {}", self.bps)));
        }

        if self.width <= 0 || self.height <= 0 {
            log::error!("invalid width {} height {}", self.width, self.height);
            return Err(RcError::InvalidArgument(format!(
                "invalid width {} height {}",
                self.width, self.height
            )));
        }

        if self.hor_stride <= 0 {
            log::warn!("invalid hor_stride {} set to {}", self.hor_stride, self.width);
            self.hor_stride = self.width;
        }

        if self.ver_stride <= 0 {
            log::warn!("invalid ver_stride {} set to {}", self.ver_stride, self.height);
            self.ver_stride = self.height;
        }

        Ok(())
    }
}

impl TryFrom<&EncUserConfig> for RcConfig {
    type Error = RcError;

    fn try_from(c: &EncUserConfig) -> Result<Self, RcError> {
        let mode = RcMode::from_i32(c.rc_mode)
            .ok_or_else(|| RcError::InvalidArgument(format!("invalid rc_mode {}", c.rc_mode)))?;
        let fps = |v: i32| {
            u32::try_from(v)
                .map_err(|_| RcError::InvalidArgument(format!("invalid fps {v}")))
                .and_then(Fps::from_int)
        };
        let (bps_min, bps_max) = band(c.bps);
        let cfg = Self {
            mode,
            bps_min,
            bps_target: c.bps,
            bps_max,
            fps_in: fps(c.fps_in)?,
            fps_out: fps(c.fps_out)?,
            gop: c.gop,
            skip_cnt: 0,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

impl From<&EncUserConfig> for PrepConfig {
    fn from(c: &EncUserConfig) -> Self {
        Self {
            width: c.width,
            height: c.height,
            hor_stride: c.hor_stride,
            ver_stride: c.ver_stride,
            ..Default::default()
        }
    }
}
