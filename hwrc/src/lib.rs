#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod data;
pub mod error;
pub mod fps;
pub mod linreg;
pub mod pid;
pub mod rc;
pub mod syntax;

pub use config::{EncCfgSet, EncUserConfig, PrepConfig, RcConfig, RcMode};
pub use controller::{ControlCmd, H264eController};
pub use error::RcError;
pub use fps::Fps;
pub use rc::{GopMode, RateControl, RateControlStats};
pub use syntax::{FrameType, HalEncTask, RcHalResult, RcSyntax};

/// Runs `frames` frames through a controller, encoding each with `hal`.
///
/// `hal` receives the budget for each frame and returns the feedback the
/// hardware would report. Frames whose encode call fails are skipped.
pub fn simulate<F>(
    ctrl: &mut H264eController,
    frames: usize,
    mut hal: F,
) -> Vec<(RcSyntax, RcHalResult)>
where
    F: FnMut(usize, &RcSyntax) -> RcHalResult,
{
    let mut trace = Vec::with_capacity(frames);
    let mut task = HalEncTask::default();
    for n in 0..frames {
        if let Err(e) = ctrl.encode(&mut task) {
            log::warn!("frame {} dropped: {}", n, e);
            continue;
        }
        let Some(syntax) = task.syntax else {
            continue;
        };
        let result = hal(n, &syntax);
        ctrl.callback(&result);
        trace.push((syntax, result));
    }
    trace
}
