use std::time::Duration;
use std::time::Instant;

use bevy_math::Mat4;
use eyre::Result;
use frame_pacer::CameraInput;
use frame_pacer::FlyCamera;
use frame_pacer::FramePacer;
use frame_pacer::PacerConfig;
use frame_pacer::Projection;
use frame_pacer::StepTimer;
use frame_pacer::config::parse_number;
use frame_pacer::config::split_switch;
use frame_pacer::headless::SimulatedGpu;
use tracing::debug;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct SimOptions {
    frames: u64,
    gpu_latency: Duration,
    resize_at: Option<u64>,
}

impl SimOptions {
    fn from_args(args: &[String]) -> Result<Self> {
        let mut options = SimOptions {
            frames: 240,
            gpu_latency: Duration::from_millis(4),
            resize_at: None,
        };
        for arg in args {
            let Some((name, value)) = split_switch(arg) else {
                continue;
            };
            match name.as_str() {
                "frames" => options.frames = parse_number(&name, value)?,
                "gpu-latency-ms" => {
                    options.gpu_latency = Duration::from_millis(parse_number(&name, value)?)
                }
                "resize-at" => options.resize_at = Some(parse_number(&name, value)?),
                _ => {}
            }
        }
        Ok(options)
    }
}

struct RunSummary {
    signals: usize,
    blocking_waits: usize,
    frames_per_second: u32,
    elapsed: Duration,
}

fn run(config: PacerConfig, options: &SimOptions) -> Result<RunSummary> {
    let gpu = SimulatedGpu::new();
    let timeline = gpu.timeline();
    // declared before the pacer so it is still completing signals when the
    // pacer drains on drop, including on early returns
    let worker = timeline.spawn_worker(options.gpu_latency);
    let mut pacer = FramePacer::new(&gpu, config)?;

    let window_size = (1280, 720);
    let projection = Projection::default().matrix(window_size.0, window_size.1);
    let mut camera = FlyCamera::default();
    let mut timer = StepTimer::new();

    let started = Instant::now();
    let mut frame_index = 0u64;
    for frame in 0..options.frames {
        timer.tick(|step| {
            // strafe and turn slowly, as if D were held with a drifting mouse
            let input = CameraInput::from_keys(false, false, false, true, 4.0, 0.0);
            camera.update(input, step.elapsed_seconds);
        });
        if timer.frame_count() == 0 {
            continue;
        }

        if options.resize_at == Some(frame) {
            info!(frame, "window resized, frame index restarts at zero");
            frame_index = 0;
        }

        let slot = pacer.begin_frame(frame_index)?;
        pacer.write_constants(slot, &camera.constants(Mat4::IDENTITY, projection))?;
        let address = pacer.address_of(slot)?;
        debug!(frame_index, slot, address = %format!("{address:#x}"), "recorded frame");
        pacer.end_frame(frame_index)?;

        frame_index += 1;
    }

    pacer.drain()?;
    drop(pacer);
    worker.stop();

    Ok(RunSummary {
        signals: timeline.signal_count(),
        blocking_waits: timeline.blocking_waits(),
        frames_per_second: timer.frames_per_second(),
        elapsed: started.elapsed(),
    })
}

pub fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_env_filter(EnvFilter::from_default_env())
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = PacerConfig::from_args(&args)?;
    let options = SimOptions::from_args(&args)?;
    info!(?config, frames = options.frames, latency = ?options.gpu_latency, "starting headless frame pacer");

    let summary = run(config, &options)?;
    info!(
        frames = options.frames,
        signals = summary.signals,
        blocking_waits = summary.blocking_waits,
        fps = summary.frames_per_second,
        elapsed = ?summary.elapsed,
        "done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sim_options_default_without_switches() {
        let options = SimOptions::from_args(&args(&["frame_pacer_sim"])).unwrap();
        assert_eq!(options.frames, 240);
        assert_eq!(options.gpu_latency, Duration::from_millis(4));
        assert_eq!(options.resize_at, None);
    }

    #[test]
    fn sim_options_share_the_pacer_argument_list() {
        let list = args(&["frame_pacer_sim", "-frames=10", "/gpu-latency-ms=0", "-resize-at=5", "-buffers=3"]);
        let options = SimOptions::from_args(&list).unwrap();
        assert_eq!(options.frames, 10);
        assert_eq!(options.gpu_latency, Duration::ZERO);
        assert_eq!(options.resize_at, Some(5));
        assert_eq!(PacerConfig::from_args(&list).unwrap().back_buffer_count, 3);
    }

    #[test]
    fn short_run_signals_every_rendered_frame() {
        let options = SimOptions {
            frames: 6,
            gpu_latency: Duration::ZERO,
            resize_at: Some(3),
        };
        let summary = run(PacerConfig::default(), &options).unwrap();
        assert_eq!(summary.signals, 6);
    }
}
