#![forbid(unsafe_code)]

use std::env;
use std::process;

use hwrc::{
    ControlCmd, Fps, FrameType, H264eController, HalEncTask, RcConfig, RcHalResult, RcMode,
    RcSyntax,
};

/// Bits times quantizer step of an average inter frame at complexity 100.
const INTER_ACTIVITY: i64 = 1_000_000_000;
const INTRA_ACTIVITY_SCALE: i64 = 4;
const DEFAULT_QSTEP: i32 = 32;
const MAX_QSTEP: i32 = 4096;
const WOBBLE: [i64; 8] = [100, 104, 97, 110, 92, 101, 99, 95];

struct CliArgs {
    rc: RcConfig,
    frames: usize,
    idr: Vec<usize>,
    complexity: i64,
}

fn parse_bitrate(s: &str) -> Result<i32, String> {
    let (num, mult) = if let Some(n) = s.strip_suffix('k').or_else(|| s.strip_suffix('K')) {
        (n, 1_000u64)
    } else if let Some(n) = s.strip_suffix('m').or_else(|| s.strip_suffix('M')) {
        (n, 1_000_000u64)
    } else {
        (s, 1u64)
    };
    num.parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(mult))
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| format!("invalid bitrate: {s}"))
}

fn parse_fps(s: &str) -> Result<Fps, String> {
    let (num, den) = match s.split_once('/') {
        Some((n, d)) => (n, d),
        None => (s, "1"),
    };
    let num = num.parse::<u32>().map_err(|_| format!("invalid fps: {s}"))?;
    let den = den.parse::<u32>().map_err(|_| format!("invalid fps: {s}"))?;
    Fps::new(num, den).map_err(|e| e.to_string())
}

fn parse_mode(s: &str) -> Result<RcMode, String> {
    match s {
        "cbr" => Ok(RcMode::Cbr),
        "vbr" => Ok(RcMode::Vbr),
        "cqp" => Ok(RcMode::Cqp),
        _ => Err(format!("invalid rc mode: {s}")),
    }
}

fn parse_num<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid {flag} value: {value}");
        process::exit(1);
    })
}

fn parse_cli() -> CliArgs {
    let mut rc = RcConfig::default();
    let mut bitrate: Option<i32> = None;
    let mut frames = 300usize;
    let mut idr = Vec::new();
    let mut complexity = 100i64;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bitrate" => {
                let value = args.next().unwrap_or_default();
                bitrate = Some(parse_bitrate(&value).unwrap_or_else(|e| {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }));
            }
            "--fps" => {
                let value = args.next().unwrap_or_default();
                let fps = parse_fps(&value).unwrap_or_else(|e| {
                    eprintln!("Error: {e}");
                    process::exit(1);
                });
                rc.fps_in = fps;
                rc.fps_out = fps;
            }
            "--gop" => {
                let value = args.next().unwrap_or_default();
                rc.gop = parse_num("--gop", &value);
            }
            "--frames" => {
                let value = args.next().unwrap_or_default();
                frames = parse_num("--frames", &value);
            }
            "--mode" => {
                let value = args.next().unwrap_or_default();
                rc.mode = parse_mode(&value).unwrap_or_else(|e| {
                    eprintln!("Error: {e}");
                    process::exit(1);
                });
            }
            "--idr" => {
                let value = args.next().unwrap_or_default();
                idr.push(parse_num("--idr", &value));
            }
            "--complexity" => {
                let value = args.next().unwrap_or_default();
                complexity = parse_num("--complexity", &value);
                if complexity <= 0 {
                    eprintln!("Error: --complexity must be positive");
                    process::exit(1);
                }
            }
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            _ => {
                eprintln!("Error: unknown argument: {arg}");
                print_usage();
                process::exit(1);
            }
        }
    }

    if let Some(bps) = bitrate {
        rc = RcConfig {
            mode: rc.mode,
            fps_in: rc.fps_in,
            fps_out: rc.fps_out,
            gop: rc.gop,
            ..RcConfig::with_bitrate(bps)
        };
    }

    CliArgs {
        rc,
        frames,
        idr,
        complexity,
    }
}

fn print_usage() {
    eprintln!("Usage: hwrc [options]");
    eprintln!();
    eprintln!("Runs the rate controller against a synthetic encoder and prints the");
    eprintln!("budget and feedback of every frame.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --bitrate <N>           Target bitrate (e.g. 500k, 2M, default=2M)");
    eprintln!("  --fps <N|N/D>           Frame rate (default=30)");
    eprintln!("  --gop <N>               GOP length, 0 = no periodic intra (default=60)");
    eprintln!("  --frames <N>            Frames to simulate (default=300)");
    eprintln!("  --mode <cbr|vbr|cqp>    Rate control mode (default=cbr)");
    eprintln!("  --idr <N>               Force an IDR at frame N (repeatable)");
    eprintln!("  --complexity <N>        Scene complexity in percent (default=100)");
}

/// Bits the synthetic encoder spends on frame `n` at quantizer step `qstep`.
fn synthetic_bits(n: usize, frame_type: FrameType, complexity: i64, qstep: i32) -> i32 {
    let mut activity = INTER_ACTIVITY * complexity / 100 * WOBBLE[n % WOBBLE.len()] / 100;
    if frame_type.is_intra() {
        activity *= INTRA_ACTIVITY_SCALE;
    }
    (activity / qstep.max(1) as i64).clamp(1, i32::MAX as i64) as i32
}

fn pick_qstep(ctrl: &H264eController, syntax: &RcSyntax) -> i32 {
    if syntax.bit_target <= 0 {
        return DEFAULT_QSTEP;
    }
    match ctrl.predict_qstep(syntax.bit_target) {
        0 => DEFAULT_QSTEP,
        q => q.clamp(1, MAX_QSTEP),
    }
}

fn main() {
    env_logger::init();

    let cli = parse_cli();
    let mut ctrl = H264eController::new().unwrap_or_else(|e| {
        eprintln!("Error creating controller: {e}");
        process::exit(1);
    });
    ctrl.config(ControlCmd::SetRcCfg(cli.rc)).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        process::exit(1);
    });
    log::info!(
        "simulating {} frames: {:?} {} bps at {} fps, gop {}",
        cli.frames,
        cli.rc.mode,
        cli.rc.bps_target,
        cli.rc.fps_out,
        cli.rc.gop
    );

    let mut task = HalEncTask::default();
    let mut total_bits = 0i64;
    let mut encoded = 0i64;

    for n in 0..cli.frames {
        if cli.idr.contains(&n) {
            ctrl.config(ControlCmd::SetIdrFrame).unwrap_or_else(|e| {
                eprintln!("Error: {e}");
                process::exit(1);
            });
        }

        if let Err(e) = ctrl.encode(&mut task) {
            eprintln!("Error encoding frame {n}: {e}");
            process::exit(1);
        }
        let Some(syntax) = task.syntax else {
            continue;
        };

        let qstep = pick_qstep(&ctrl, &syntax);
        let bits = synthetic_bits(n, syntax.frame_type, cli.complexity, qstep);
        ctrl.callback(&RcHalResult {
            frame_type: syntax.frame_type,
            time: 2_000 + bits / 64,
            bits,
            qstep,
        });
        total_bits += bits as i64;
        encoded += 1;

        eprintln!(
            "frame {:>4}  {:>1}  target {:>8} [{:>8} : {:>8}]  q {:>4}  {:>8} bits",
            n,
            syntax.frame_type.as_str(),
            syntax.bit_target,
            syntax.bit_min,
            syntax.bit_max,
            qstep,
            bits
        );
    }

    if encoded == 0 {
        eprintln!("Error: no frames encoded");
        process::exit(1);
    }

    let stats = ctrl.rate_control_stats();
    let fps = cli.rc.fps_out;
    let achieved = total_bits * fps.num as i64 / (encoded * fps.den as i64);
    eprintln!();
    eprintln!(
        "Encoded {} frames (target={}kbps, achieved={}kbps, window={}kbps, avg={} bits/frame, avg_time={}us, gop={})",
        encoded,
        stats.target_bitrate / 1000,
        achieved / 1000,
        stats.window_bitrate / 1000,
        stats.avg_frame_bits,
        stats.avg_time,
        cli.rc.gop
    );
}
