use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facelens::helper::HelperInference;
use facelens::overlay::{self, CaptionFont, OverlayScene};
use facelens::{Config, LoopPhase, OverlayEngine};
use facelens_core::reference::build_matcher;
use facelens_core::{FaceInference, FaceMatcher, Matcher};
use facelens_hw::{Camera, CameraSource, FrameSource, StillSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facelens", about = "Face recognition overlays for a camera or a photo")]
struct Cli {
    /// Config file (defaults to $FACELENS_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recognition on the live camera until Ctrl-C
    Live,
    /// Run recognition once on a photo
    Still {
        /// Image to analyse
        image: PathBuf,
        /// Write the frame with the overlay drawn on it to this PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load the reference faces and report what was found
    References,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::References => {
            let inference = spawn_helper(&config)?;
            let matcher = load_matcher(&config, inference.as_ref()).await?;
            for reference in matcher.references() {
                println!("{}\t{} dims", reference.label, reference.descriptor.len());
            }
        }
        Commands::Still { image, output } => {
            let inference = spawn_helper(&config)?;
            let matcher = load_matcher(&config, inference.as_ref()).await?;
            run_still(&config, inference, &matcher, image, output).await?;
        }
        Commands::Live => {
            let inference = spawn_helper(&config)?;
            let matcher = load_matcher(&config, inference.as_ref()).await?;
            run_live(&config, inference, &matcher).await?;
        }
    }

    Ok(())
}

fn spawn_helper(config: &Config) -> Result<Arc<dyn FaceInference>> {
    let helper = HelperInference::spawn(&config.helper_command)
        .with_context(|| format!("starting vision helper {:?}", config.helper_command))?;
    Ok(Arc::new(helper))
}

/// Reference faces are required before any matching; failures here are fatal.
async fn load_matcher(config: &Config, inference: &dyn FaceInference) -> Result<FaceMatcher> {
    let matcher = build_matcher(
        inference,
        &config.reference_entries(),
        &config.reference_options(),
        config.match_threshold,
    )
    .await
    .context("loading reference faces")?;
    tracing::info!(
        labels = ?matcher.labels().collect::<Vec<_>>(),
        threshold = matcher.threshold(),
        "reference set ready"
    );
    Ok(matcher)
}

async fn run_still(
    config: &Config,
    inference: Arc<dyn FaceInference>,
    matcher: &FaceMatcher,
    image: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut engine = OverlayEngine::new(inference, config.engine_options());
    let source = Arc::new(StillSource::open(&image));
    engine
        .start(source.clone())
        .await
        .with_context(|| format!("opening {}", image.display()))?;
    engine.wait_until_idle().await;

    let snapshot = engine.store().snapshot();
    let scene = OverlayScene::build(&snapshot, Some(matcher as &dyn Matcher), config.still_shrink);
    if scene.is_empty() {
        println!("No faces found");
    }
    for line in scene.summary_lines() {
        println!("{line}");
    }

    if let Some(path) = output {
        let frame = source
            .current_frame()
            .and_then(|f| f.to_rgb_image())
            .context("decoded frame no longer available")?;
        let font = config.caption_font.as_deref().and_then(|path| match CaptionFont::load(path) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!(error = %e, "captions will not be drawn");
                None
            }
        });
        overlay::render_onto_frame(&scene, &frame, font.as_ref())
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Overlay written to {}", path.display());
    }

    engine.stop();
    Ok(())
}

async fn run_live(config: &Config, inference: Arc<dyn FaceInference>, matcher: &FaceMatcher) -> Result<()> {
    let matcher: &dyn Matcher = matcher;
    let mut engine = OverlayEngine::new(inference, config.engine_options());
    let source = Arc::new(CameraSource::new(&config.camera_device, config.camera_resolution));

    // Camera trouble is reported, not fatal to the process.
    if let Err(e) = engine.start(source).await {
        eprintln!("Camera unavailable: {e}");
        return Ok(());
    }
    println!("Camera started on {}; press Ctrl-C to stop", config.camera_device);

    let mut rx = engine.subscribe();
    let mut last_lines: Vec<String> = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.phase == LoopPhase::Idle {
                    println!("Camera stream ended");
                    break;
                }
                let lines = OverlayScene::build(&snapshot, Some(matcher), config.live_shrink)
                    .summary_lines();
                if lines != last_lines {
                    for line in &lines {
                        println!("{line}");
                    }
                    last_lines = lines;
                }
            }
        }
    }

    engine.stop();
    tracing::info!("facelens shutting down");
    Ok(())
}
