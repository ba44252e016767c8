//! CLI for face readings, overlays and coarse face detection.
//!
//! Usage:
//!   palace-face analyze face.json                        # Human-readable reading
//!   palace-face analyze face.json --json                 # JSON reading
//!   palace-face overlay face.json --image 1280x720 --view 390x844 --fit crop --mirror sensor
//!   palace-face faces photo.jpg --model seeta_fd_frontal_v1.0.bin
//!   palace-face demo                                     # Reading of the canonical face

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use image::DynamicImage;
use palace_face::{
    analyze_face, canonical_face, select_face, BoundingBox, DetectionOrchestrator,
    FaceBoxDetector, FaceCandidate, FaceReading, FitMode, ImageSize, LandmarkSet, MirrorState,
    OverlayFrame, PalaceAnalyzer, PipelineConfig, Rotation, SeetaFaceDetector, StrategyAttempt,
    TemplateMeshDetector, ViewSetup,
};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "palace-face")]
#[command(author, version, about = "Twelve-palace face readings from landmarks", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(short, long, global = true)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pipeline configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a face from a landmark set (JSON)
    Analyze {
        /// Landmark set file
        landmarks: PathBuf,
    },
    /// Project a landmark set into a view for drawing
    Overlay {
        /// Landmark set file
        landmarks: PathBuf,
        /// Source image size, WxH
        #[arg(long, value_parser = parse_size)]
        image: ImageSize,
        /// View size, WxH
        #[arg(long, value_parser = parse_size)]
        view: ImageSize,
        /// Content fit: crop or fit
        #[arg(long, default_value = "crop")]
        fit: FitMode,
        /// Mirror state: none, sensor or baked
        #[arg(long, default_value = "none")]
        mirror: MirrorState,
        /// Clockwise rotation in degrees
        #[arg(long, default_value = "0")]
        rotation: f32,
    },
    /// Detect faces in an image and read the best one
    Faces {
        /// Input image file
        image: PathBuf,
        /// SeetaFace detector model path
        #[arg(long, default_value = "seeta_fd_frontal_v1.0.bin")]
        model: PathBuf,
        /// Minimum face size for detection
        #[arg(long, default_value = "20")]
        min_face_size: u32,
    },
    /// Reading of the built-in symmetric face
    Demo,
}

fn parse_size(s: &str) -> Result<ImageSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{}'", s))?;
    let width = w.trim().parse::<u32>().map_err(|e| format!("bad width '{}': {}", w, e))?;
    let height = h.trim().parse::<u32>().map_err(|e| format!("bad height '{}': {}", h, e))?;
    Ok(ImageSize::new(width, height))
}

/// Output of the `faces` subcommand.
#[derive(Serialize)]
struct FacesOutput {
    image: String,
    width: u32,
    height: u32,
    faces_detected: usize,
    boxes: Vec<BoxOutput>,
    /// Index into `boxes` of the selected face
    selected: Option<usize>,
    strategy: Option<String>,
    quality: Option<f32>,
    attempts: Vec<StrategyAttempt>,
    reading: Option<FaceReading>,
}

#[derive(Serialize)]
struct BoxOutput {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    area_percent: f32,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(&args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

async fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let analyzer = PalaceAnalyzer::default();

    let output_str = match &args.command {
        Command::Analyze { landmarks } => {
            let set = load_landmarks(landmarks)?;
            let reading = analyze_face(&set, &analyzer);
            if args.json {
                serde_json::to_string_pretty(&reading)?
            } else {
                format_reading(&reading)
            }
        }
        Command::Overlay {
            landmarks,
            image,
            view,
            fit,
            mirror,
            rotation,
        } => {
            let set = load_landmarks(landmarks)?;
            let setup = ViewSetup {
                image_size: *image,
                view_size: *view,
                fit: *fit,
                mirror: *mirror,
                rotation: Rotation::degrees(*rotation),
            };
            let overlay = OverlayFrame::build(&set, &setup, analyzer.table());
            if !overlay.transform.valid {
                tracing::warn!(
                    image = %image,
                    view = %view,
                    "degenerate sizes, overlay uses the neutral transform"
                );
            }
            // Overlays are for drawing layers: always JSON.
            serde_json::to_string_pretty(&overlay)?
        }
        Command::Faces {
            image,
            model,
            min_face_size,
        } => {
            let output = detect_faces(image, model, *min_face_size, &config, &analyzer).await?;
            if args.json {
                serde_json::to_string_pretty(&output)?
            } else {
                format_faces(&output)
            }
        }
        Command::Demo => {
            let face = canonical_face(BoundingBox::new(100.0, 50.0, 240.0, 300.0));
            let reading = analyze_face(&face, &analyzer);
            if args.json {
                serde_json::to_string_pretty(&reading)?
            } else {
                format_reading(&reading)
            }
        }
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &output_str)?;
        info!(path = %path.display(), "output written");
    } else {
        println!("{}", output_str);
    }

    Ok(())
}

fn load_landmarks(path: &Path) -> Result<LandmarkSet, Box<dyn std::error::Error>> {
    debug!(path = %path.display(), "loading landmark set");
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Face boxes already found on the full-size image, rescaled to whatever
/// resized copy of it a strategy passes in.
struct KnownFaces {
    faces: Vec<FaceCandidate>,
    size: ImageSize,
}

#[async_trait]
impl FaceBoxDetector for KnownFaces {
    fn name(&self) -> &'static str {
        "seetaface"
    }

    async fn detect_faces(&self, image: &DynamicImage) -> palace_face::Result<Vec<FaceCandidate>> {
        if self.size.is_empty() {
            return Ok(Vec::new());
        }
        let sx = image.width() as f32 / self.size.width as f32;
        let sy = image.height() as f32 / self.size.height as f32;
        Ok(self
            .faces
            .iter()
            .map(|c| {
                let b = c.bbox;
                let bbox = BoundingBox::new(b.x * sx, b.y * sy, b.width * sx, b.height * sy);
                FaceCandidate::new(bbox, c.confidence)
            })
            .collect())
    }
}

async fn detect_faces(
    path: &Path,
    model: &Path,
    min_face_size: u32,
    config: &PipelineConfig,
    analyzer: &PalaceAnalyzer,
) -> Result<FacesOutput, Box<dyn std::error::Error>> {
    debug!(model = %model.display(), "loading face detector");
    let seeta = SeetaFaceDetector::load(model)?.with_min_face_size(min_face_size);

    debug!(image = %path.display(), "loading image");
    let img = image::open(path)?;
    let size = ImageSize::new(img.width(), img.height());

    let candidates = seeta.detect_faces(&img).await?;
    let selected = select_face(&candidates, size)
        .and_then(|chosen| candidates.iter().position(|c| *c == chosen));
    info!(faces = candidates.len(), "coarse detection finished");

    let boxes = candidates
        .iter()
        .map(|c| BoxOutput {
            x: c.bbox.x,
            y: c.bbox.y,
            width: c.bbox.width,
            height: c.bbox.height,
            confidence: c.confidence,
            area_percent: c.bbox.area() / size.area() * 100.0,
        })
        .collect();

    // The template mesh reuses the boxes found above instead of running the
    // cascade again.
    let known = KnownFaces {
        faces: candidates.clone(),
        size,
    };
    let orchestrator = DetectionOrchestrator::new(
        Arc::new(TemplateMeshDetector::new(known)),
        config.detection.clone(),
    );

    let mut output = FacesOutput {
        image: path.display().to_string(),
        width: size.width,
        height: size.height,
        faces_detected: candidates.len(),
        boxes,
        selected,
        strategy: None,
        quality: None,
        attempts: Vec::new(),
        reading: None,
    };

    match orchestrator.detect(&img, Rotation::NONE).await {
        Ok(outcome) => {
            output.strategy = Some(outcome.strategy.to_string());
            output.quality = Some(outcome.quality);
            output.reading = outcome.primary_face().map(|f| analyze_face(f, analyzer));
            output.attempts = outcome.attempts;
        }
        Err(palace_face::Error::NoFaceDetected { attempts }) => {
            output.attempts = attempts;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(output)
}

fn format_reading(reading: &FaceReading) -> String {
    let mut s = String::new();

    s.push_str(&format!("Landmarks: {} points\n", reading.landmark_count));
    if let Some(message) = &reading.message {
        s.push_str(&format!("\n{}\n", message));
        return s;
    }

    s.push_str("\nTwelve Palaces:\n");
    for palace in &reading.palaces {
        s.push_str(&format!(
            "\n  {} ({})\n",
            palace.palace.chinese_name(),
            palace.name
        ));
        s.push_str(&format!("    {}\n", palace.description));
        for (feature, value) in &palace.features {
            s.push_str(&format!("      {:<28} {:>8.3}\n", feature, value));
        }
    }

    if let Some(p) = &reading.proportions {
        let c = &p.three_courts;
        s.push_str("\nThree Courts:\n");
        s.push_str(&format!("  Upper (est.): {:.1}%\n", c.upper_ratio * 100.0));
        s.push_str(&format!("  Middle:       {:.1}%\n", c.middle_ratio * 100.0));
        s.push_str(&format!("  Lower:        {:.1}%\n", c.lower_ratio * 100.0));
        s.push_str(&format!("  {}\n", c.description));

        let e = &p.five_eyes;
        s.push_str("\nFive Eyes:\n");
        let parts: Vec<String> = e.ratios.iter().map(|r| format!("{:.1}%", r * 100.0)).collect();
        s.push_str(&format!("  Segments: {}\n", parts.join(" | ")));
        s.push_str(&format!("  Gap/Eye:  {:.2}x\n", e.gap_to_eye));
        s.push_str(&format!("  {}\n", e.description));
    }

    s
}

fn format_faces(output: &FacesOutput) -> String {
    let mut s = String::new();

    s.push_str(&format!(
        "Image: {} ({}x{})\n",
        output.image, output.width, output.height
    ));
    s.push_str(&format!("Faces detected: {}\n", output.faces_detected));

    for (i, b) in output.boxes.iter().enumerate() {
        let marker = if output.selected == Some(i) { " (selected)" } else { "" };
        s.push_str(&format!(
            "  Face {}: {:.0}x{:.0} at ({:.0}, {:.0}), score {:.2}, {:.1}% of image{}\n",
            i + 1,
            b.width,
            b.height,
            b.x,
            b.y,
            b.confidence,
            b.area_percent,
            marker
        ));
    }

    s.push_str("\nStrategies:\n");
    for attempt in &output.attempts {
        s.push_str(&format!(
            "  {:<18} {:?} ({} ms)\n",
            attempt.strategy.name(),
            attempt.outcome,
            attempt.elapsed_ms
        ));
    }
    if let (Some(strategy), Some(quality)) = (&output.strategy, output.quality) {
        s.push_str(&format!("  Used: {} (quality {:.2})\n", strategy, quality));
    }

    match &output.reading {
        Some(reading) => {
            s.push('\n');
            s.push_str(&format_reading(reading));
        }
        None => s.push_str("\nNo face found.\n"),
    }

    s
}
