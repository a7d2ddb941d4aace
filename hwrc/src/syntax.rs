#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    #[default]
    InterP,
    InterB,
    Intra,
}

impl FrameType {
    pub fn is_intra(self) -> bool {
        self == FrameType::Intra
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::InterP => "P",
            FrameType::InterB => "B",
            FrameType::Intra => "I",
        }
    }
}

/// Bit budget handed to the hardware for one frame. A zero target means
/// rate control is disabled for the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RcSyntax {
    pub frame_type: FrameType,
    pub bit_target: i32,
    pub bit_max: i32,
    pub bit_min: i32,
}

/// Feedback from the hardware after a frame has been encoded.
///
/// `time` is the encode time in microseconds. `qstep` is the average
/// quantizer step the hardware used, 0 when not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RcHalResult {
    pub frame_type: FrameType,
    pub time: i32,
    pub bits: i32,
    pub qstep: i32,
}

/// Work item passed from the controller to the hardware layer.
#[derive(Debug, Clone, Default)]
pub struct HalEncTask {
    pub valid: bool,
    pub syntax: Option<RcSyntax>,
}
