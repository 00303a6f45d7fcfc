use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use segmask::{
    CancelToken, Color, CommandOutcome, Coordinate, FloodFillSegmenter, MaskManager,
    MaskManagerCommand, PixelBuffer, PixelFormat, RegionSegmenter, RleMaskDecoder,
    io::{load_image, read_recipe_file, save_image},
};
use segmask_cli::SegmaskJob;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job file (TOML or JSON) against its image
    Run {
        /// Path to the job configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Flood-fill a single mask from a seed pixel and save it
    Segment {
        /// Source image
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short)]
        x: i32,
        #[arg(short)]
        y: i32,
        /// Grayscale band half-width around the seed value
        #[arg(short, long, default_value = "10")]
        tolerance: u32,
        /// Output mask image (PNG)
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decode every mask of a recipe into separate mask images
    Decode {
        /// Source image, used for the mask dimensions
        #[arg(short, long)]
        image: PathBuf,
        /// Recipe XML file
        #[arg(short, long)]
        recipe: PathBuf,
        /// Directory for the decoded masks
        #[arg(short, long)]
        output_dir: PathBuf,
    },
    /// Composite all recipe masks into one preview or label image
    Composite {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long)]
        recipe: PathBuf,
        /// Class every recipe mask is assigned to
        #[arg(long)]
        class: Option<String>,
        /// Write class indices instead of colors
        #[arg(long)]
        labels: bool,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List the job commands, or print their JSON schema
    Commands {
        #[arg(long)]
        schema: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { config } => run_job(config).await?,
        Commands::Segment { image, x, y, tolerance, output } => {
            segment(image, Coordinate::new(*x, *y), *tolerance, output)?
        }
        Commands::Decode { image, recipe, output_dir } => decode(image, recipe, output_dir)?,
        Commands::Composite { image, recipe, class, labels, output } => {
            composite(image, recipe, class.as_deref(), *labels, output).await?
        }
        Commands::Commands { schema } => describe_commands(*schema)?,
    }

    Ok(())
}

async fn run_job(config_path: &Path) -> Result<()> {
    let job = SegmaskJob::from_file(config_path)?;
    info!("Job: {:?}", job.image);

    let mut manager = job.build_manager()?;
    for command in job.planned_commands() {
        let name = command.to_string();
        let outcome = manager.execute_async(command).await?;
        info!(command = %name, outcome = %serde_json::to_string(&outcome)?, "command finished");

        if let CommandOutcome::PatchesSaved(report) = &outcome {
            for failure in &report.failures {
                warn!("Failed to write {:?}: {}", failure.path, failure.reason);
            }
        }
    }

    info!(
        masks = manager.masks().len(),
        patches = manager.patches().len(),
        "✅ Job completed"
    );
    Ok(())
}

fn segment(image_path: &Path, seed: Coordinate, tolerance: u32, output: &Path) -> Result<()> {
    let image = load_image(image_path)?;
    let region = FloodFillSegmenter::new(tolerance).segment(&image, seed);
    if region.is_empty() {
        return Err(eyre!("Seed {seed} is outside the {}x{} image", image.width(), image.height()));
    }

    let mut mask = PixelBuffer::new(image.width(), image.height(), PixelFormat::Bgra32);
    mask.paint_points(&region, 0xFFFF_FFFF);
    save_image(&mask, output)?;

    info!("Segmented {} pixels from {} -> {:?}", region.len(), seed, output);
    Ok(())
}

fn decode(image_path: &Path, recipe_path: &Path, output_dir: &Path) -> Result<()> {
    let image = load_image(image_path)?;
    let entries = read_recipe_file(recipe_path)?;
    let decoder = RleMaskDecoder::new(image.width(), image.height(), Color::rgb(255, 255, 255));
    let report = decoder.decode_batch(&entries, &CancelToken::new())?;

    std::fs::create_dir_all(output_dir)?;
    for decoded in &report.decoded {
        let name = match &decoded.entry.guid {
            Some(guid) => format!("{:03}_{guid}.png", decoded.index),
            None => format!("{:03}.png", decoded.index),
        };
        save_image(&decoded.raster, output_dir.join(name))?;
    }
    for skipped in &report.skipped {
        warn!("Skipped recipe entry {} ({:?}): {}", skipped.index, skipped.guid, skipped.reason);
    }

    info!("Decoded {} masks into {:?}", report.decoded.len(), output_dir);
    Ok(())
}

async fn composite(
    image_path: &Path,
    recipe_path: &Path,
    class: Option<&str>,
    labels: bool,
    output: &Path,
) -> Result<()> {
    let mut manager = MaskManager::new();
    manager.load_image(image_path)?;

    let outcome = manager
        .execute_async(MaskManagerCommand::LoadRecipe { path: recipe_path.to_path_buf() })
        .await?;
    let CommandOutcome::RecipeLoaded { created, skipped } = outcome else {
        return Err(eyre!("Unexpected outcome while loading {:?}", recipe_path));
    };
    if !skipped.is_empty() {
        warn!("{} recipe entries skipped", skipped.len());
    }

    let class_id = match class {
        Some(name) => Some(
            manager
                .palette()
                .by_name(name)
                .ok_or_else(|| eyre!("Unknown class '{name}'"))?
                .id,
        ),
        None => None,
    };

    for mask_id in created {
        manager.execute(MaskManagerCommand::SetVisibility { mask_id, visible: true })?;
        if let Some(class_id) = class_id {
            manager.execute(MaskManagerCommand::AssignClass { mask_id, class_id })?;
        }
    }

    if labels {
        manager.execute(MaskManagerCommand::SaveLabelMap { path: output.to_path_buf() })?;
    } else {
        save_image(&*manager.composite_preview()?, output)?;
    }

    info!("Composite written to {:?}", output);
    Ok(())
}

fn describe_commands(schema: bool) -> Result<()> {
    if schema {
        println!("{}", serde_json::to_string_pretty(&MaskManagerCommand::schema())?);
        return Ok(());
    }
    for name in MaskManagerCommand::command_names() {
        let command: MaskManagerCommand = name.parse()?;
        println!("{name:<26} {}", command.description());
    }
    Ok(())
}
