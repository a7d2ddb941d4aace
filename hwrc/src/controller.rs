use crate::config::{EncCfgSet, EncUserConfig, RcConfig};
use crate::error::RcError;
use crate::rc::{RateControl, RateControlStats};
use crate::syntax::{HalEncTask, RcHalResult, RcSyntax};

/// Commands accepted by [`H264eController::config`].
#[derive(Debug)]
pub enum ControlCmd<'a> {
    /// Validate a user config, clamping recoverable fields in place.
    CheckEncCfg(&'a mut EncUserConfig),
    /// Encode the next frame as IDR.
    SetIdrFrame,
    /// Install rate control settings and mark rate control ready.
    SetRcCfg(RcConfig),
}

/// H.264 control stage: owns the rate control engine and turns pipeline
/// calls into budgets for the hardware layer.
#[derive(Debug)]
pub struct H264eController {
    cfg: EncCfgSet,
    rc_ready: bool,
    rc: RateControl,
    syntax: RcSyntax,
    result: Option<RcHalResult>,
}

impl H264eController {
    /// Starts from 1280x720 YUV420SP and CBR 2 Mbps ±25% at 30 fps, GOP 60.
    /// Encoding is refused until rate control settings are supplied.
    pub fn new() -> Result<Self, RcError> {
        log::trace!("h264e init enter");
        let ctrl = Self {
            cfg: EncCfgSet::default(),
            rc_ready: false,
            rc: RateControl::new()?,
            syntax: RcSyntax::default(),
            result: None,
        };
        log::trace!("h264e init leave");
        Ok(ctrl)
    }

    pub fn cfg(&self) -> &EncCfgSet {
        &self.cfg
    }

    pub fn is_rc_ready(&self) -> bool {
        self.rc_ready
    }

    /// Produces the bit budget for the next frame into `task`.
    ///
    /// On failure the task is marked invalid and the error returned; the
    /// caller decides whether to retry or drop the frame.
    pub fn encode(&mut self, task: &mut HalEncTask) -> Result<(), RcError> {
        task.valid = false;
        task.syntax = None;

        if !self.rc_ready {
            log::error!("encode called before rate control was configured");
            return Err(RcError::InvalidStatus("rate control not ready"));
        }

        self.rc.update_user_cfg(&self.cfg.rc)?;
        self.syntax = self.rc.bits_allocation()?;

        task.syntax = Some(self.syntax);
        task.valid = true;
        Ok(())
    }

    pub fn config(&mut self, cmd: ControlCmd<'_>) -> Result<(), RcError> {
        log::trace!("h264e config enter {:?}", cmd);
        let ret = match cmd {
            ControlCmd::CheckEncCfg(user) => user.sanitize(),
            ControlCmd::SetIdrFrame => {
                self.rc.request_idr();
                Ok(())
            }
            ControlCmd::SetRcCfg(rc) => rc.validate().map(|()| {
                log::info!(
                    "set rc cfg bps {} [{} : {}]",
                    rc.bps_target,
                    rc.bps_min,
                    rc.bps_max
                );
                self.cfg.rc = rc;
                self.rc_ready = true;
            }),
        };
        log::trace!("h264e config leave {:?}", ret);
        ret
    }

    /// Hardware feedback for the most recently encoded frame.
    pub fn callback(&mut self, result: &RcHalResult) {
        self.result = Some(*result);
        self.rc.update_hw_result(result);
    }

    pub fn reset(&mut self) -> Result<(), RcError> {
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RcError> {
        Ok(())
    }

    pub fn syntax(&self) -> &RcSyntax {
        &self.syntax
    }

    pub fn last_result(&self) -> Option<&RcHalResult> {
        self.result.as_ref()
    }

    pub fn rate_control_stats(&self) -> RateControlStats {
        self.rc.stats()
    }

    pub fn predict_qstep(&self, bits: i32) -> i32 {
        self.rc.predict_qstep(bits)
    }
}
