use std::ptr;

use hwrc::{
    ControlCmd, EncUserConfig, Fps, FrameType, H264eController, HalEncTask, RcConfig, RcError,
    RcHalResult, RcMode,
};

pub const HWRC_FRAME_P: i32 = 0;
pub const HWRC_FRAME_B: i32 = 1;
pub const HWRC_FRAME_I: i32 = 2;

pub struct HwrcController {
    inner: H264eController,
}

#[repr(C)]
pub struct HwrcRcCfg {
    /// 0 = CQP, 1 = VBR, 2 = CBR.
    pub mode: i32,
    pub bps_min: i32,
    pub bps_target: i32,
    pub bps_max: i32,
    pub fps_in_num: u32,
    pub fps_in_den: u32,
    pub fps_out_num: u32,
    pub fps_out_den: u32,
    pub gop: i32,
    pub skip_cnt: i32,
}

#[repr(C)]
pub struct HwrcEncCfg {
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

#[repr(C)]
pub struct HwrcRcSyntax {
    pub frame_type: i32,
    pub bit_target: i32,
    pub bit_max: i32,
    pub bit_min: i32,
}

#[repr(C)]
pub struct HwrcHalResult {
    pub frame_type: i32,
    pub time: i32,
    pub bits: i32,
    pub qstep: i32,
}

fn frame_type_to_c(frame_type: FrameType) -> i32 {
    match frame_type {
        FrameType::InterP => HWRC_FRAME_P,
        FrameType::InterB => HWRC_FRAME_B,
        FrameType::Intra => HWRC_FRAME_I,
    }
}

fn frame_type_from_c(value: i32) -> Option<FrameType> {
    match value {
        HWRC_FRAME_P => Some(FrameType::InterP),
        HWRC_FRAME_B => Some(FrameType::InterB),
        HWRC_FRAME_I => Some(FrameType::Intra),
        _ => None,
    }
}

fn rc_cfg_from_c(cfg: &HwrcRcCfg) -> Result<RcConfig, RcError> {
    let mode = RcMode::from_i32(cfg.mode)
        .ok_or_else(|| RcError::InvalidArgument(format!("invalid rc mode {}", cfg.mode)))?;
    Ok(RcConfig {
        mode,
        bps_min: cfg.bps_min,
        bps_target: cfg.bps_target,
        bps_max: cfg.bps_max,
        fps_in: Fps::new(cfg.fps_in_num, cfg.fps_in_den)?,
        fps_out: Fps::new(cfg.fps_out_num, cfg.fps_out_den)?,
        gop: cfg.gop,
        skip_cnt: cfg.skip_cnt,
    })
}

fn status(ret: Result<(), RcError>) -> i32 {
    match ret {
        Ok(()) => 0,
        Err(e) => {
            log::debug!("hwrc ffi call failed: {e}");
            e.code()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hwrc_controller_new() -> *mut HwrcController {
    match H264eController::new() {
        Ok(inner) => Box::into_raw(Box::new(HwrcController { inner })),
        Err(e) => {
            log::error!("hwrc controller init failed: {e}");
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hwrc_controller_free(ctrl: *mut HwrcController) {
    if !ctrl.is_null() {
        drop(unsafe { Box::from_raw(ctrl) });
    }
}

/// Validates `cfg` in place, clamping recoverable fields.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hwrc_check_enc_cfg(
    ctrl: *mut HwrcController,
    cfg: *mut HwrcEncCfg,
) -> i32 {
    if ctrl.is_null() || cfg.is_null() {
        return RcError::NullArgument.code();
    }

    let ctrl = unsafe { &mut *ctrl };
    let cfg = unsafe { &mut *cfg };

    let mut user = EncUserConfig {
        profile: cfg.profile,
        level: cfg.level,
        width: cfg.width,
        height: cfg.height,
        hor_stride: cfg.hor_stride,
        ver_stride: cfg.ver_stride,
        fps_in: cfg.fps_in,
        fps_out: cfg.fps_out,
        gop: cfg.gop,
        rc_mode: cfg.rc_mode,
        qp: cfg.qp,
        bps: cfg.bps,
    };
    let ret = ctrl.inner.config(ControlCmd::CheckEncCfg(&mut user));

    cfg.profile = user.profile;
    cfg.level = user.level;
    cfg.width = user.width;
    cfg.height = user.height;
    cfg.hor_stride = user.hor_stride;
    cfg.ver_stride = user.ver_stride;
    cfg.fps_in = user.fps_in;
    cfg.fps_out = user.fps_out;
    cfg.gop = user.gop;
    cfg.rc_mode = user.rc_mode;
    cfg.qp = user.qp;
    cfg.bps = user.bps;

    status(ret)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hwrc_controller_set_rc_cfg(
    ctrl: *mut HwrcController,
    cfg: *const HwrcRcCfg,
) -> i32 {
    if ctrl.is_null() || cfg.is_null() {
        return RcError::NullArgument.code();
    }

    let ctrl = unsafe { &mut *ctrl };
    let cfg = unsafe { &*cfg };

    status(rc_cfg_from_c(cfg).and_then(|rc| ctrl.inner.config(ControlCmd::SetRcCfg(rc))))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hwrc_controller_request_idr(ctrl: *mut HwrcController) -> i32 {
    if ctrl.is_null() {
        return RcError::NullArgument.code();
    }

    let ctrl = unsafe { &mut *ctrl };
    status(ctrl.inner.config(ControlCmd::SetIdrFrame))
}

/// Writes the budget for the next frame to `out`. `out` is left untouched
/// on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hwrc_controller_encode(
    ctrl: *mut HwrcController,
    out: *mut HwrcRcSyntax,
) -> i32 {
    if ctrl.is_null() || out.is_null() {
        return RcError::NullArgument.code();
    }

    let ctrl = unsafe { &mut *ctrl };
    let mut task = HalEncTask::default();
    if let Err(e) = ctrl.inner.encode(&mut task) {
        return e.code();
    }
    let Some(syntax) = task.syntax else {
        return RcError::InvalidStatus("no budget produced").code();
    };

    unsafe {
        *out = HwrcRcSyntax {
            frame_type: frame_type_to_c(syntax.frame_type),
            bit_target: syntax.bit_target,
            bit_max: syntax.bit_max,
            bit_min: syntax.bit_min,
        };
    }
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn hwrc_controller_callback(
    ctrl: *mut HwrcController,
    result: *const HwrcHalResult,
) -> i32 {
    if ctrl.is_null() || result.is_null() {
        return RcError::NullArgument.code();
    }

    let ctrl = unsafe { &mut *ctrl };
    let result = unsafe { &*result };

    let Some(frame_type) = frame_type_from_c(result.frame_type) else {
        return RcError::InvalidArgument(format!("invalid frame type {}", result.frame_type))
            .code();
    };
    ctrl.inner.callback(&RcHalResult {
        frame_type,
        time: result.time,
        bits: result.bits,
        qstep: result.qstep,
    });
    0
}
