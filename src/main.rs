use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kws_brightness::*;

/// Control screen brightness by saying "increase" or "decrease".
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keyword model (ONNX).
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Input device name.
    #[arg(short, long)]
    device: Option<String>,

    /// Confidence a command must exceed to fire.
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Brightness change per command, in percent.
    #[arg(long)]
    step: Option<u8>,

    /// Minimum milliseconds between two commands (0 disables).
    #[arg(long)]
    refractory_ms: Option<u64>,

    /// Track brightness in memory instead of touching the backlight.
    #[arg(long)]
    dry_run: bool,

    /// List input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Print the effective config and exit.
    #[arg(long)]
    print_config: bool,

    /// Log the confidences of every cycle at info level.
    #[arg(long)]
    log_probabilities: bool,

    /// Debug logging, including per-cycle confidences and suppressed commands.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn resolve_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(model) = &self.model {
            config.model.path = model.clone();
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(threshold) = self.threshold {
            config.detection.threshold = threshold;
        }
        if let Some(step) = self.step {
            config.brightness.step = step;
        }
        if let Some(refractory_ms) = self.refractory_ms {
            config.detection.refractory_ms = refractory_ms;
        }
        if self.log_probabilities {
            config.detection.log_probabilities = true;
        }
        if self.dry_run {
            config.brightness.backend = BacklightBackend::Memory;
        }

        config.validate()?;
        Ok(config)
    }
}

fn build_actuator(config: &BrightnessConfig) -> anyhow::Result<Box<dyn Actuator>> {
    Ok(match config.backend {
        BacklightBackend::Memory => Box::new(MemoryBacklight::new(config.fallback_level as i32)),
        BacklightBackend::Sysfs => Box::new(
            SysfsBacklight::open(SYSFS_BACKLIGHT_ROOT, config.device.as_deref())
                .context("failed to open backlight (try --dry-run)")?,
        ),
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if args.list_devices {
        let devices = list_input_devices()?;
        if devices.is_empty() {
            println!("No audio input devices detected.");
        } else {
            println!("Available audio input devices:");
            for name in devices {
                println!("  {}", name);
            }
        }
        return Ok(());
    }

    let config = args.resolve_config()?;
    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let classifier = OnnxClassifier::load(
        &config.model.path,
        WINDOW_SAMPLES,
        config.label_order()?,
    )
    .with_context(|| format!("failed to load model {}", config.model.path.display()))?;
    let actuator = build_actuator(&config.brightness)?;
    let source = Sampler::new(config.audio.clone());

    signal::install_shutdown_handler().context("failed to install signal handlers")?;

    let mut pipeline = PipelineController::new(
        &config,
        Box::new(source),
        Box::new(classifier),
        actuator,
    );
    pipeline.start().context("failed to start listening")?;
    log::info!("say \"increase\" or \"decrease\"; press Ctrl+C to exit");

    pipeline.wait();
    log::info!("stopping");
    pipeline.stop();
    log::info!("resources released");

    Ok(())
}
