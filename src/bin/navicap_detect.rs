//! navicap_detect - per-frame obstacle fusion
//!
//! This process:
//! 1. Verifies the model resources exist (fatal otherwise)
//! 2. Captures frames and runs the detector backend on each
//! 3. Samples the range sensor and fuses distance, traffic-light color and primary obstacle
//! 4. Writes the obstacle document whenever the debouncer allows
//!
//! A failed frame read closes the camera, waits and reopens it.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use navicap::detect::ClassNames;
use navicap::fusion::NoEchoSensor;
use navicap::{
    append_error_log, DetectorBackend, FrameSource, FusionEngine, NavicapConfig,
    ObstacleProducer, RangeSensor, StubBackend, StubFrameSource,
};

const REOPEN_DELAY: Duration = Duration::from_millis(200);
const DEBUG_DETECTIONS: usize = 5;

#[derive(Parser, Debug)]
#[command(author, version, about = "NaviCap obstacle detection and fusion loop")]
struct Args {
    /// Stop after this many frames (bring-up and soak tests).
    #[arg(long, env = "NAVICAP_MAX_FRAMES")]
    max_frames: Option<u64>,

    /// Do not append pushed events to the obstacle history log.
    #[arg(long)]
    no_history: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = NavicapConfig::load()?;

    let result = run(&args, &cfg);
    if let Err(e) = &result {
        log::error!("navicap_detect stopped: {:#}", e);
        if let Err(log_err) = append_error_log(&cfg.error_log_path, e) {
            log::warn!(
                "could not write {}: {}",
                cfg.error_log_path.display(),
                log_err
            );
        }
    }
    result
}

fn run(args: &Args, cfg: &NavicapConfig) -> Result<()> {
    cfg.model.verify()?;
    let classes = ClassNames::load(&cfg.model.names)?;
    log::info!(
        "{} classes loaded from {}",
        classes.len(),
        cfg.model.names.display()
    );

    let mut backend = StubBackend::new(classes);
    backend.warm_up()?;
    log::info!("detector backend: {}", backend.name());

    let mut source = StubFrameSource::new(cfg.camera.index, cfg.camera.width, cfg.camera.height);
    source
        .open()
        .with_context(|| format!("failed to open camera {}", source.name()))?;
    log::info!(
        "camera {} open ({}x{} @ {} fps)",
        source.name(),
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.fps
    );

    let mut sensor = NoEchoSensor;
    let mut engine = FusionEngine::new(cfg.fusion.clone());
    let params = engine.detect_params(cfg.camera.input_size);
    let mut producer = ObstacleProducer::new(&cfg.obstacle_path);
    if !args.no_history {
        producer = producer.with_history_log(&cfg.obstacle_log_path);
    }
    log::info!("publishing obstacles to {}", cfg.obstacle_path.display());

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("error setting Ctrl-C handler")?;

    let mut frames: u64 = 0;
    while running.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("frame read failed, reopening camera: {:#}", e);
                source.close();
                std::thread::sleep(REOPEN_DELAY);
                if let Err(e) = source.open() {
                    log::warn!("camera reopen failed: {:#}", e);
                }
                continue;
            }
        };

        let detections = backend.detect(&frame, &params)?;
        for (i, det) in detections.iter().take(DEBUG_DETECTIONS).enumerate() {
            log::debug!("[det] {}: {} conf={:.2}", i, det.label, det.confidence);
        }

        let readings: Vec<Option<f64>> = (0..engine.distance_filter().samples())
            .map(|_| sensor.sample())
            .collect();
        let outcome = engine.process(&frame, &detections, &readings, Instant::now());
        if let Some(reason) = outcome.publish {
            let event = producer.push(
                &outcome.event.obstacle,
                outcome.event.distance_m,
                outcome.event.traffic,
            )?;
            log::debug!(
                "pushed {} {:?} {} ({:?})",
                event.obstacle,
                event.distance_m,
                event.traffic,
                reason
            );
        }

        frames += 1;
        if args.max_frames.is_some_and(|max| frames >= max) {
            log::info!("frame limit {} reached", frames);
            break;
        }
        std::thread::sleep(engine.tunables().loop_sleep);
    }

    source.close();
    log::info!("navicap_detect exiting after {} frames", frames);
    Ok(())
}
