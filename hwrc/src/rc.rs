use crate::config::{RcConfig, RcMode};
use crate::data::CircularBuffer;
use crate::error::RcError;
use crate::fps::Fps;
use crate::linreg::{LINEAR_MODEL_STATISTIC_COUNT, LinReg};
use crate::pid::PidCtx;
use crate::syntax::{FrameType, RcHalResult, RcSyntax};

pub const INTRA_RATIO_SMALL_GOP: i64 = 3;
pub const INTRA_RATIO_LARGE_GOP: i64 = 2;

const DEFAULT_WINDOW: usize = 60;
const MAX_WINDOW: usize = 300;
const INTRA_HISTORY: usize = 8;

/// Window-average gap folded into the rate drift per frame, as a divisor.
const RATE_DRIFT_DIV: i64 = 32;
/// Drift bound in pictures; caps the rate term at a quarter picture.
const RATE_DRIFT_LIMIT: i64 = 8;

const PID_INTER: (i32, i32, i32, i32, usize) = (4, 1, 2, 32, 8);
const PID_INTRA: (i32, i32, i32, i32, usize) = (4, 1, 2, 32, 4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GopMode {
    /// gop == 0
    AllInter,
    /// gop == 1
    AllIntra,
    /// gop < fps
    Small,
    /// gop >= fps
    Large,
}

impl GopMode {
    pub fn classify(gop: i32, fps: Fps) -> Self {
        match gop {
            i32::MIN..=0 => GopMode::AllInter,
            1 => GopMode::AllIntra,
            g if fps.exceeds(g as i64) => GopMode::Small,
            _ => GopMode::Large,
        }
    }

    /// Intra frame size in multiples of the average picture size. An intra
    /// frame never takes more than the GOP can give up.
    pub fn intra_ratio(self, gop: i32) -> i64 {
        let ratio = match self {
            GopMode::AllIntra => return 1,
            GopMode::AllInter | GopMode::Large => INTRA_RATIO_LARGE_GOP,
            GopMode::Small => INTRA_RATIO_SMALL_GOP,
        };
        if gop > 1 {
            ratio.min(gop as i64 - 1)
        } else {
            ratio
        }
    }
}

fn window_for(gop: i32, fps: Fps) -> usize {
    let len = if gop > 1 { gop as usize } else { fps.ceil() as usize };
    len.clamp(1, MAX_WINDOW)
}

fn to_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// `a * b / c` without intermediate overflow, saturated into `i64`.
fn mul_div(a: i64, b: i64, c: i64) -> i64 {
    let v = a as i128 * b as i128 / c as i128;
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Frame-level rate control.
///
/// Translates the user bitrate, frame rate and GOP into per-frame bit
/// budgets and folds the hardware feedback back in. Call
/// [`update_user_cfg`](Self::update_user_cfg) at least once, then alternate
/// [`bits_allocation`](Self::bits_allocation) and
/// [`update_hw_result`](Self::update_hw_result) once per frame.
#[derive(Debug)]
pub struct RateControl {
    cfg: Option<RcConfig>,

    gop_mode: GopMode,
    bits_per_pic: i64,
    bits_per_intra: i64,
    bits_per_inter: i64,
    inter_remainder: i64,
    window_len: usize,
    intra_to_inter_rate: i64,

    acc_intra_bits: i64,
    acc_inter_bits: i64,
    acc_total_bits: i64,
    acc_intra_count: i64,
    acc_inter_count: i64,
    acc_total_count: i64,
    acc_time: i64,
    /// Integral of the gap between the window average and `bits_per_pic`.
    drift: i64,

    cur_frmtype: FrameType,
    pre_frmtype: FrameType,
    gop_pos: i64,
    idr_request: u32,

    intra: CircularBuffer,
    gop_bits: CircularBuffer,
    pid_intra: PidCtx,
    pid_inter: PidCtx,
    linreg: LinReg,

    bits_target: i32,
    planned: Option<(FrameType, i64)>,
}

impl RateControl {
    pub fn new() -> Result<Self, RcError> {
        let (p, i, d, div, len) = PID_INTRA;
        let pid_intra = PidCtx::new(p, i, d, div, len)?;
        let (p, i, d, div, len) = PID_INTER;
        let pid_inter = PidCtx::new(p, i, d, div, len)?;

        Ok(Self {
            cfg: None,
            gop_mode: GopMode::Large,
            bits_per_pic: 0,
            bits_per_intra: 0,
            bits_per_inter: 0,
            inter_remainder: 0,
            window_len: DEFAULT_WINDOW,
            intra_to_inter_rate: 0,
            acc_intra_bits: 0,
            acc_inter_bits: 0,
            acc_total_bits: 0,
            acc_intra_count: 0,
            acc_inter_count: 0,
            acc_total_count: 0,
            acc_time: 0,
            drift: 0,
            cur_frmtype: FrameType::InterP,
            pre_frmtype: FrameType::InterP,
            gop_pos: 0,
            idr_request: 0,
            intra: CircularBuffer::new(INTRA_HISTORY)?,
            gop_bits: CircularBuffer::new(DEFAULT_WINDOW)?,
            pid_intra,
            pid_inter,
            linreg: LinReg::new(LINEAR_MODEL_STATISTIC_COUNT)?,
            bits_target: 0,
            planned: None,
        })
    }

    /// Applies a configuration snapshot. Returns `Ok(false)` when it matches
    /// the current one and nothing was recomputed.
    pub fn update_user_cfg(&mut self, cfg: &RcConfig) -> Result<bool, RcError> {
        if self.cfg.as_ref() == Some(cfg) {
            return Ok(false);
        }
        cfg.validate()?;

        let gop = cfg.gop as i64;
        let fps = cfg.fps_out;
        let bits_per_pic = fps
            .bits_per_frame(cfg.bps_target as i64)
            .clamp(1, i32::MAX as i64);
        let gop_mode = GopMode::classify(cfg.gop, fps);
        let ratio = gop_mode.intra_ratio(cfg.gop);
        let bits_per_intra = bits_per_pic * ratio;
        let (bits_per_inter, inter_remainder) = if gop > 1 {
            let inter_total = bits_per_pic * gop - bits_per_intra;
            (inter_total / (gop - 1), inter_total % (gop - 1))
        } else {
            (bits_per_pic, 0)
        };

        let window_len = window_for(cfg.gop, fps);
        if window_len != self.gop_bits.capacity() {
            self.gop_bits = CircularBuffer::new(window_len)?;
        } else {
            self.gop_bits.reset();
        }
        self.intra.reset();
        self.pid_intra.reset();
        self.pid_inter.reset();

        self.acc_intra_bits = 0;
        self.acc_inter_bits = 0;
        self.acc_total_bits = 0;
        self.acc_intra_count = 0;
        self.acc_inter_count = 0;
        self.acc_total_count = 0;
        self.acc_time = 0;
        self.drift = 0;
        self.planned = None;

        if self.cfg.is_none_or(|old| old.gop != cfg.gop) {
            self.gop_pos = 0;
        }

        self.gop_mode = gop_mode;
        self.bits_per_pic = bits_per_pic;
        self.bits_per_intra = bits_per_intra;
        self.bits_per_inter = bits_per_inter;
        self.inter_remainder = inter_remainder;
        self.window_len = window_len;
        self.intra_to_inter_rate = ratio;
        self.cfg = Some(*cfg);

        log::debug!(
            "rc cfg bps {} [{} : {}] fps {} gop {} {:?}: pic {} intra {} inter {} (+{}) window {}",
            cfg.bps_target,
            cfg.bps_min,
            cfg.bps_max,
            fps,
            cfg.gop,
            gop_mode,
            bits_per_pic,
            bits_per_intra,
            bits_per_inter,
            inter_remainder,
            window_len
        );
        Ok(true)
    }

    /// Forces the next allocated frame to be intra.
    pub fn request_idr(&mut self) {
        self.idr_request += 1;
    }

    pub fn idr_pending(&self) -> u32 {
        self.idr_request
    }

    fn next_frame_type(&mut self, gop: i64) -> (FrameType, i64) {
        let idr = self.idr_request > 0;
        if idr {
            self.idr_request -= 1;
        }

        let intra = idr || self.gop_mode == GopMode::AllIntra || (gop > 1 && self.gop_pos == 0);
        if intra {
            self.gop_pos = 0;
        }
        let pos = self.gop_pos;
        self.gop_pos = if gop > 1 { (pos + 1) % gop } else { pos + 1 };

        let frame_type = if intra {
            FrameType::Intra
        } else {
            FrameType::InterP
        };
        (frame_type, pos)
    }

    /// Bits planned for a frame before feedback correction.
    fn planned_bits(&self, frame_type: FrameType, pos: i64, gop: i64) -> i64 {
        if frame_type.is_intra() {
            return self.bits_per_intra;
        }

        let mut bits = self.bits_per_inter;
        if gop > 1 {
            if (1..=self.inter_remainder).contains(&pos) {
                bits += 1;
            }
            if let Some(last_intra) = self.intra.last() {
                let overshoot = last_intra as i64 - self.bits_per_intra;
                bits -= overshoot / (gop - 1);
            }
        }
        bits
    }

    /// Bit budget for the next frame.
    pub fn bits_allocation(&mut self) -> Result<RcSyntax, RcError> {
        let cfg = self
            .cfg
            .ok_or(RcError::InvalidStatus("rate control not configured"))?;
        let gop = cfg.gop as i64;

        let (frame_type, pos) = self.next_frame_type(gop);
        self.pre_frmtype = self.cur_frmtype;
        self.cur_frmtype = frame_type;

        if cfg.mode == RcMode::Cqp {
            self.bits_target = 0;
            self.planned = None;
            return Ok(RcSyntax {
                frame_type,
                ..Default::default()
            });
        }

        let nominal = if frame_type.is_intra() {
            self.bits_per_intra
        } else {
            self.bits_per_inter
        }
        .max(1);
        let planned = self.planned_bits(frame_type, pos, gop);
        let pid = if frame_type.is_intra() {
            &self.pid_intra
        } else {
            &self.pid_inter
        };
        let correction = pid.calc() as i64;
        let rate = mul_div(self.drift / RATE_DRIFT_DIV, nominal, self.bits_per_pic);

        let limit_min = mul_div(nominal, cfg.bps_min as i64, cfg.bps_target as i64);
        let limit_max = if cfg.bps_max > 0 {
            mul_div(nominal, cfg.bps_max as i64, cfg.bps_target as i64)
        } else {
            i64::MAX
        };

        let target = (planned - correction - rate)
            .clamp((nominal / 4).max(1), nominal * 4)
            .clamp(limit_min, limit_max);
        let band = match cfg.mode {
            RcMode::Vbr => target / 4,
            _ => target / 8,
        };

        let syntax = RcSyntax {
            frame_type,
            bit_target: to_i32(target),
            bit_max: to_i32((target + band).min(limit_max)),
            bit_min: to_i32((target - band).max(limit_min)),
        };

        self.bits_target = syntax.bit_target;
        self.planned = Some((frame_type, planned));

        log::debug!(
            "alloc {} pos {} planned {} corr {} rate {} -> target {} [{} : {}]",
            frame_type.as_str(),
            pos,
            planned,
            correction,
            rate,
            syntax.bit_target,
            syntax.bit_min,
            syntax.bit_max
        );
        Ok(syntax)
    }

    /// Folds one frame of hardware feedback into the statistics.
    pub fn update_hw_result(&mut self, result: &RcHalResult) {
        let Some(cfg) = self.cfg else {
            log::warn!("hw result {:?} before rate control was configured", result);
            return;
        };

        let intra = result.frame_type.is_intra();
        let bits = result.bits as i64;
        let nominal = if intra {
            self.bits_per_intra
        } else {
            self.bits_per_inter
        };
        let planned = match self.planned.take() {
            Some((requested, planned)) if requested.is_intra() == intra => planned,
            Some((requested, _)) => {
                log::warn!(
                    "hw produced {} frame for a {} allocation",
                    result.frame_type.as_str(),
                    requested.as_str()
                );
                nominal
            }
            None => nominal,
        };
        let error = to_i32(bits - planned);

        if intra {
            self.acc_intra_bits += bits;
            self.acc_intra_count += 1;
            self.intra.update(result.bits);
        } else {
            self.acc_inter_bits += bits;
            self.acc_inter_count += 1;
        }
        self.acc_total_bits += bits;
        self.acc_total_count += 1;
        self.acc_time += result.time as i64;
        self.gop_bits.update(result.bits);

        if cfg.mode != RcMode::Cqp {
            if intra {
                self.pid_intra.update(error);
            } else {
                self.pid_inter.update(error);
            }
            if self.gop_bits.is_full() {
                let gap = self.gop_bits.average(self.window_len, 1, 1) as i64 - self.bits_per_pic;
                let limit = self.bits_per_pic * RATE_DRIFT_LIMIT;
                self.drift = (self.drift + gap).clamp(-limit, limit);
            }
        }

        if !intra && result.qstep > 0 && result.bits > 0 {
            self.linreg.update(result.qstep, result.bits);
        }

        log::debug!(
            "hw result {} bits {} planned {} error {} time {}",
            result.frame_type.as_str(),
            result.bits,
            planned,
            error,
            result.time
        );
    }

    /// Quantizer step the fitted model expects to produce `bits`, 0 when the
    /// model has no samples yet.
    pub fn predict_qstep(&self, bits: i32) -> i32 {
        self.linreg.calc(bits)
    }

    pub fn set_pid_param(
        &mut self,
        frame_type: FrameType,
        coef_p: i32,
        coef_i: i32,
        coef_d: i32,
        div: i32,
        len: usize,
    ) -> Result<(), RcError> {
        let pid = if frame_type.is_intra() {
            &mut self.pid_intra
        } else {
            &mut self.pid_inter
        };
        pid.set_param(coef_p, coef_i, coef_d, div, len)
    }

    pub fn is_configured(&self) -> bool {
        self.cfg.is_some()
    }

    pub fn config(&self) -> Option<&RcConfig> {
        self.cfg.as_ref()
    }

    pub fn gop_mode(&self) -> GopMode {
        self.gop_mode
    }

    pub fn bits_per_pic(&self) -> i64 {
        self.bits_per_pic
    }

    pub fn bits_per_intra(&self) -> i64 {
        self.bits_per_intra
    }

    pub fn bits_per_inter(&self) -> i64 {
        self.bits_per_inter
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn intra_to_inter_rate(&self) -> i64 {
        self.intra_to_inter_rate
    }

    pub fn bits_target(&self) -> i32 {
        self.bits_target
    }

    pub fn cur_frmtype(&self) -> FrameType {
        self.cur_frmtype
    }

    pub fn pre_frmtype(&self) -> FrameType {
        self.pre_frmtype
    }

    /// Bits per frame currently withheld (positive) or added (negative) to
    /// pull the window average back to `bits_per_pic`.
    pub fn rate_drift(&self) -> i64 {
        self.drift / RATE_DRIFT_DIV
    }

    pub fn acc_total_bits(&self) -> i64 {
        self.acc_total_bits
    }

    pub fn acc_total_count(&self) -> i64 {
        self.acc_total_count
    }

    pub fn acc_intra(&self) -> (i64, i64) {
        (self.acc_intra_bits, self.acc_intra_count)
    }

    pub fn acc_inter(&self) -> (i64, i64) {
        (self.acc_inter_bits, self.acc_inter_count)
    }

    pub fn stats(&self) -> RateControlStats {
        let (target_bitrate, window_bitrate) = match &self.cfg {
            Some(cfg) => {
                let avg = self.gop_bits.average(self.window_len, 1, 1) as i64;
                (
                    cfg.bps_target,
                    avg * cfg.fps_out.num as i64 / cfg.fps_out.den as i64,
                )
            }
            None => (0, 0),
        };
        let per_frame = |total: i64| {
            if self.acc_total_count > 0 {
                total / self.acc_total_count
            } else {
                0
            }
        };
        RateControlStats {
            target_bitrate,
            frames: self.acc_total_count,
            avg_frame_bits: per_frame(self.acc_total_bits),
            window_bitrate,
            avg_time: per_frame(self.acc_time),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateControlStats {
    pub target_bitrate: i32,
    pub frames: i64,
    pub avg_frame_bits: i64,
    /// Bitrate achieved over the statistics window.
    pub window_bitrate: i64,
    pub avg_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(bps: i32, fps: u32, gop: i32) -> RcConfig {
        RcConfig {
            fps_in: Fps::from_int(fps).unwrap(),
            fps_out: Fps::from_int(fps).unwrap(),
            gop,
            ..RcConfig::with_bitrate(bps)
        }
    }

    fn configured(bps: i32, fps: u32, gop: i32) -> RateControl {
        let mut rc = RateControl::new().unwrap();
        assert!(rc.update_user_cfg(&cfg(bps, fps, gop)).unwrap());
        rc
    }

    fn feed_exact(rc: &mut RateControl, syntax: &RcSyntax) {
        rc.update_hw_result(&RcHalResult {
            frame_type: syntax.frame_type,
            time: 1_000,
            bits: syntax.bit_target,
            qstep: 0,
        });
    }

    #[test]
    fn gop_classification() {
        let fps = Fps::from_int(30).unwrap();
        assert_eq!(GopMode::classify(0, fps), GopMode::AllInter);
        assert_eq!(GopMode::classify(1, fps), GopMode::AllIntra);
        assert_eq!(GopMode::classify(2, fps), GopMode::Small);
        assert_eq!(GopMode::classify(29, fps), GopMode::Small);
        assert_eq!(GopMode::classify(30, fps), GopMode::Large);
        assert_eq!(GopMode::classify(300, fps), GopMode::Large);
    }

    #[test]
    fn intra_ratio_never_exceeds_gop() {
        assert_eq!(GopMode::AllIntra.intra_ratio(1), 1);
        assert_eq!(GopMode::Small.intra_ratio(2), 1);
        assert_eq!(GopMode::Small.intra_ratio(10), INTRA_RATIO_SMALL_GOP);
        assert_eq!(GopMode::Large.intra_ratio(2), 1);
        assert_eq!(GopMode::Large.intra_ratio(60), INTRA_RATIO_LARGE_GOP);
    }

    #[test]
    fn allocation_before_config_is_invalid_status() {
        let mut rc = RateControl::new().unwrap();
        assert!(matches!(rc.bits_allocation(), Err(RcError::InvalidStatus(_))));
    }

    #[test]
    fn feedback_before_config_is_ignored() {
        let mut rc = RateControl::new().unwrap();
        rc.update_hw_result(&RcHalResult {
            frame_type: FrameType::Intra,
            time: 0,
            bits: 1_000,
            qstep: 0,
        });
        assert_eq!(rc.acc_total_count(), 0);
    }

    #[test]
    fn same_config_is_a_no_op() {
        let mut rc = configured(2_000_000, 30, 30);
        let syntax = rc.bits_allocation().unwrap();
        feed_exact(&mut rc, &syntax);
        assert!(!rc.update_user_cfg(&cfg(2_000_000, 30, 30)).unwrap());
        assert_eq!(rc.acc_total_count(), 1);
    }

    #[test]
    fn derived_parameters_for_large_gop() {
        let rc = configured(2_000_000, 30, 30);
        assert_eq!(rc.gop_mode(), GopMode::Large);
        assert_eq!(rc.bits_per_pic(), 66_666);
        assert_eq!(rc.bits_per_intra(), 133_332);
        assert_eq!(rc.bits_per_inter(), 64_367);
        assert_eq!(rc.window_len(), 30);
        assert_eq!(rc.intra_to_inter_rate(), 2);
    }

    #[test]
    fn all_inter_window_is_one_second() {
        let rc = configured(1_000_000, 25, 0);
        assert_eq!(rc.gop_mode(), GopMode::AllInter);
        assert_eq!(rc.bits_per_inter(), rc.bits_per_pic());
        assert_eq!(rc.window_len(), 25);
    }

    #[test]
    fn gop_targets_sum_to_ideal() {
        for (bps, fps, gop) in [(2_000_000, 30, 30), (1_234_567, 25, 7), (800_000, 24, 2), (5_000_000, 60, 250)] {
            let mut rc = configured(bps, fps, gop);
            let mut sum = 0i64;
            for n in 0..gop {
                let syntax = rc.bits_allocation().unwrap();
                assert_eq!(syntax.frame_type.is_intra(), n == 0);
                sum += syntax.bit_target as i64;
            }
            let ideal = rc.bits_per_pic() * gop as i64;
            assert!((sum - ideal).abs() <= rc.bits_per_pic(), "gop {} sum {} ideal {}", gop, sum, ideal);
        }
    }

    #[test]
    fn all_intra_gop_is_always_intra() {
        let mut rc = configured(2_000_000, 30, 1);
        for _ in 0..45 {
            let syntax = rc.bits_allocation().unwrap();
            assert_eq!(syntax.frame_type, FrameType::Intra);
            assert_eq!(syntax.bit_target as i64, rc.bits_per_pic());
            feed_exact(&mut rc, &syntax);
        }
    }

    #[test]
    fn all_inter_gop_only_intra_on_request() {
        let mut rc = configured(2_000_000, 30, 0);
        for n in 0..10 {
            if n == 6 {
                rc.request_idr();
            }
            let syntax = rc.bits_allocation().unwrap();
            assert_eq!(syntax.frame_type.is_intra(), n == 6);
        }
    }

    #[test]
    fn idr_request_restarts_gop() {
        let mut rc = configured(2_000_000, 30, 5);
        let types: Vec<bool> = (0..12)
            .map(|n| {
                if n == 3 {
                    rc.request_idr();
                }
                rc.bits_allocation().unwrap().frame_type.is_intra()
            })
            .collect();
        let expected = [
            true, false, false, true, false, false, false, false, true, false, false, false,
        ];
        assert_eq!(types, expected);
        assert_eq!(rc.idr_pending(), 0);
    }

    #[test]
    fn perfect_feedback_is_stable() {
        let mut rc = configured(2_000_000, 30, 30);
        for _ in 0..30 {
            let syntax = rc.bits_allocation().unwrap();
            feed_exact(&mut rc, &syntax);
        }
        assert_eq!(rc.acc_total_bits() / rc.acc_total_count(), rc.bits_per_pic());
    }

    #[test]
    fn overshoot_lowers_next_target() {
        let mut rc = configured(2_000_000, 30, 30);
        let intra = rc.bits_allocation().unwrap();
        feed_exact(&mut rc, &intra);
        let first = rc.bits_allocation().unwrap();
        rc.update_hw_result(&RcHalResult {
            frame_type: first.frame_type,
            time: 0,
            bits: first.bit_target * 2,
            qstep: 0,
        });
        let second = rc.bits_allocation().unwrap();
        assert!(second.bit_target < first.bit_target);
        assert!(second.bit_min <= second.bit_target && second.bit_target <= second.bit_max);
    }

    #[test]
    fn intra_overshoot_is_recovered_by_inter_frames() {
        let mut rc = configured(2_000_000, 30, 30);
        let intra = rc.bits_allocation().unwrap();
        rc.update_hw_result(&RcHalResult {
            frame_type: FrameType::Intra,
            time: 0,
            bits: intra.bit_target + 29_000,
            qstep: 0,
        });
        let inter = rc.bits_allocation().unwrap();
        assert_eq!(inter.bit_target as i64, rc.bits_per_inter() + 1 - 1_000);
    }

    #[test]
    fn budget_band_respects_bitrate_limits() {
        let mut rc = configured(2_000_000, 30, 30);
        rc.bits_allocation().unwrap();
        let syntax = rc.bits_allocation().unwrap();
        let target = syntax.bit_target;
        assert_eq!(syntax.bit_max, target + target / 8);
        assert_eq!(syntax.bit_min, target - target / 8);

        let mut vbr = RateControl::new().unwrap();
        vbr.update_user_cfg(&RcConfig {
            mode: RcMode::Vbr,
            bps_min: 1_900_000,
            bps_max: 2_100_000,
            ..cfg(2_000_000, 30, 30)
        })
        .unwrap();
        vbr.bits_allocation().unwrap();
        let syntax = vbr.bits_allocation().unwrap();
        let limit_max = vbr.bits_per_inter() * 2_100_000 / 2_000_000;
        let limit_min = vbr.bits_per_inter() * 1_900_000 / 2_000_000;
        assert_eq!(syntax.bit_max as i64, limit_max);
        assert_eq!(syntax.bit_min as i64, limit_min);
    }

    #[test]
    fn cqp_mode_disables_bit_allocation() {
        let mut rc = RateControl::new().unwrap();
        rc.update_user_cfg(&RcConfig {
            mode: RcMode::Cqp,
            ..cfg(2_000_000, 30, 10)
        })
        .unwrap();
        let syntax = rc.bits_allocation().unwrap();
        assert_eq!(syntax.frame_type, FrameType::Intra);
        assert_eq!((syntax.bit_target, syntax.bit_min, syntax.bit_max), (0, 0, 0));
        rc.update_hw_result(&RcHalResult {
            frame_type: FrameType::Intra,
            time: 0,
            bits: 90_000,
            qstep: 0,
        });
        assert_eq!(rc.acc_intra(), (90_000, 1));
    }

    #[test]
    fn mismatched_feedback_type_is_accepted() {
        let mut rc = configured(2_000_000, 30, 30);
        let syntax = rc.bits_allocation().unwrap();
        assert!(syntax.frame_type.is_intra());
        rc.update_hw_result(&RcHalResult {
            frame_type: FrameType::InterP,
            time: 0,
            bits: 50_000,
            qstep: 0,
        });
        assert_eq!(rc.acc_inter(), (50_000, 1));
        assert_eq!(rc.acc_intra(), (0, 0));
        assert!(rc.bits_allocation().is_ok());
    }

    #[test]
    fn allocation_without_feedback_still_succeeds() {
        let mut rc = configured(2_000_000, 30, 30);
        for _ in 0..5 {
            assert!(rc.bits_allocation().is_ok());
        }
        assert_eq!(rc.acc_total_count(), 0);
    }

    #[test]
    fn reconfig_resets_accumulators_and_keeps_gop_position() {
        let mut rc = configured(2_000_000, 30, 30);
        for _ in 0..3 {
            let syntax = rc.bits_allocation().unwrap();
            feed_exact(&mut rc, &syntax);
        }
        rc.update_user_cfg(&cfg(4_000_000, 30, 30)).unwrap();
        assert_eq!(rc.acc_total_count(), 0);
        assert_eq!(rc.bits_per_pic(), 133_333);
        assert!(!rc.bits_allocation().unwrap().frame_type.is_intra());

        rc.update_user_cfg(&cfg(4_000_000, 30, 10)).unwrap();
        assert_eq!(rc.window_len(), 10);
        assert!(rc.bits_allocation().unwrap().frame_type.is_intra());
    }

    #[test]
    fn invalid_config_is_rejected_and_state_kept() {
        let mut rc = configured(2_000_000, 30, 30);
        let err = rc.update_user_cfg(&cfg(0, 30, 30)).unwrap_err();
        assert!(matches!(err, RcError::InvalidArgument(_)));
        assert_eq!(rc.bits_per_pic(), 66_666);
    }

    #[test]
    fn frame_types_are_tracked() {
        let mut rc = configured(2_000_000, 30, 30);
        rc.bits_allocation().unwrap();
        rc.bits_allocation().unwrap();
        assert_eq!(rc.cur_frmtype(), FrameType::InterP);
        assert_eq!(rc.pre_frmtype(), FrameType::Intra);
    }

    #[test]
    fn qstep_feedback_trains_model() {
        let mut rc = configured(2_000_000, 30, 30);
        assert_eq!(rc.predict_qstep(60_000), 0);
        rc.bits_allocation().unwrap();
        rc.bits_allocation().unwrap();
        rc.update_hw_result(&RcHalResult {
            frame_type: FrameType::InterP,
            time: 0,
            bits: 60_000,
            qstep: 32,
        });
        assert_eq!(rc.predict_qstep(60_000), 32);
    }

    #[test]
    fn steady_overshoot_builds_rate_drift() {
        let mut rc = configured(2_000_000, 30, 30);
        let mut last_gop = 0i64;
        for n in 0..600 {
            let syntax = rc.bits_allocation().unwrap();
            let bits = syntax.bit_target * 6 / 5;
            if n >= 570 {
                last_gop += bits as i64;
            }
            rc.update_hw_result(&RcHalResult {
                frame_type: syntax.frame_type,
                time: 0,
                bits,
                qstep: 0,
            });
        }
        assert!(rc.rate_drift() > 0);
        let pic = rc.bits_per_pic();
        assert!((last_gop / 30 - pic).abs() <= pic / 100, "{} vs {}", last_gop / 30, pic);
    }

    #[test]
    fn rate_drift_is_bounded() {
        let mut rc = configured(2_000_000, 30, 30);
        for _ in 0..300 {
            let syntax = rc.bits_allocation().unwrap();
            rc.update_hw_result(&RcHalResult {
                frame_type: syntax.frame_type,
                time: 0,
                bits: i32::MAX,
                qstep: 0,
            });
        }
        assert_eq!(rc.rate_drift(), rc.bits_per_pic() * RATE_DRIFT_LIMIT / RATE_DRIFT_DIV);
        let syntax = rc.bits_allocation().unwrap();
        assert!(syntax.bit_target > 0 && syntax.bit_min <= syntax.bit_target);
    }

    #[test]
    fn extreme_bitrate_does_not_overflow() {
        let slow = Fps::new(1, 2).unwrap();
        let mut rc = RateControl::new().unwrap();
        rc.update_user_cfg(&RcConfig {
            bps_min: 0,
            bps_target: i32::MAX,
            bps_max: i32::MAX,
            fps_in: slow,
            fps_out: slow,
            gop: 30,
            ..RcConfig::default()
        })
        .unwrap();
        assert_eq!(rc.bits_per_pic(), i32::MAX as i64);

        for _ in 0..40 {
            let syntax = rc.bits_allocation().unwrap();
            assert!(syntax.bit_target > 0);
            assert!(syntax.bit_min <= syntax.bit_target && syntax.bit_target <= syntax.bit_max);
            rc.update_hw_result(&RcHalResult {
                frame_type: syntax.frame_type,
                time: 0,
                bits: i32::MAX,
                qstep: 0,
            });
        }
        assert_eq!(rc.acc_total_count(), 40);
    }

    #[test]
    fn pid_tuning_can_disable_correction() {
        assert!(!RateControl::new().unwrap().is_configured());
        let mut rc = configured(2_000_000, 30, 30);
        assert!(rc.is_configured());
        assert_eq!(rc.config().map(|c| c.gop), Some(30));

        assert!(rc.set_pid_param(FrameType::Intra, 4, 1, 2, 0, 4).is_err());
        rc.set_pid_param(FrameType::InterP, 0, 0, 0, 1, 4).unwrap();

        let intra = rc.bits_allocation().unwrap();
        feed_exact(&mut rc, &intra);
        let first = rc.bits_allocation().unwrap();
        rc.update_hw_result(&RcHalResult {
            frame_type: first.frame_type,
            time: 0,
            bits: first.bit_target * 2,
            qstep: 0,
        });
        let second = rc.bits_allocation().unwrap();
        assert_eq!(second.bit_target, first.bit_target);
    }

    #[test]
    fn stats_report_window_bitrate() {
        let mut rc = configured(2_000_000, 30, 30);
        for _ in 0..30 {
            let syntax = rc.bits_allocation().unwrap();
            feed_exact(&mut rc, &syntax);
        }
        let stats = rc.stats();
        assert_eq!(stats.target_bitrate, 2_000_000);
        assert_eq!(stats.frames, 30);
        assert_eq!(stats.avg_frame_bits, 66_666);
        assert_eq!(stats.window_bitrate, 66_666 * 30);
        assert_eq!(stats.avg_time, 1_000);
    }
}
