//! audio-diffusion CLI: spectrogram slicing, decoding, and loop extraction.
//!
//! Prints a one-line JSON summary to stdout on success:
//!
//! ```json
//! {"command":"loop","path":"out.wav","samples":180224,"sample_rate":22050}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use std::path::PathBuf;

use audio_diffusion_rs::audio::mel::{AudioSource, Mel};
use audio_diffusion_rs::audio::{WavEncoding, peak_normalize, read_wav_mono, write_wav_as};
use audio_diffusion_rs::config::AudioDiffusionConfig;
use audio_diffusion_rs::looper::loop_it;
use audio_diffusion_rs::spectrogram::{read_image, write_image};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "audio-diffusion",
    about = "Mel spectrogram images and beat loops for audio diffusion",
    long_about = "Convert audio to the spectrogram images an audio diffusion model works on,\n\
                  decode such images back to audio, and extract beat-aligned loops."
)]
struct Args {
    /// JSON file overriding codec and scheduler settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write 16-bit PCM instead of 32-bit float WAV.
    #[arg(long, global = true)]
    pcm16: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode audio slices as spectrogram PNGs.
    Slice {
        /// Input WAV file.
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Directory for the PNG files (created if missing).
        #[arg(long, short = 'o')]
        output_dir: PathBuf,

        /// Only write this slice. Omit to write every slice.
        #[arg(long)]
        slice: Option<usize>,
    },

    /// Decode a spectrogram image to audio with Griffin-Lim.
    Decode {
        /// Input spectrogram image.
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Output WAV file.
        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Peak-normalize the decoded audio.
        #[arg(long)]
        normalize: bool,
    },

    /// Extract a beat-aligned loop and tile it.
    Loop {
        /// Input WAV file.
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Output WAV file.
        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Number of repetitions.
        #[arg(long, default_value_t = 12)]
        loops: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AudioDiffusionConfig::from_json_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load config {}: {e}", path.display()))?,
        None => AudioDiffusionConfig::default(),
    };

    let encoding = if args.pcm16 {
        WavEncoding::Pcm16
    } else {
        WavEncoding::Float32
    };

    match args.command {
        Command::Slice {
            input,
            output_dir,
            slice,
        } => {
            let mel = Mel::new(config.mel)?;
            let audio = mel.load_audio(&AudioSource::File(input.clone()))?;
            let slices: Vec<usize> = match slice {
                Some(index) => vec![index],
                None => (0..audio.number_of_slices()).collect(),
            };
            tracing::info!(
                input = %input.display(),
                slices = slices.len(),
                "writing spectrogram slices"
            );

            std::fs::create_dir_all(&output_dir)?;
            for &index in &slices {
                let image = mel.slice_to_image(&audio, index)?;
                let path = output_dir.join(format!("slice_{index:04}.png"));
                write_image(&path, &image)?;
                tracing::debug!(path = %path.display(), "wrote slice");
            }

            println!(
                r#"{{"command":"slice","dir":{dir},"slices":{count}}}"#,
                dir = serde_json::to_string(&output_dir.display().to_string())?,
                count = slices.len(),
            );
        }

        Command::Decode {
            input,
            output,
            normalize,
        } => {
            let mel = Mel::new(config.mel)?;
            let image = read_image(&input)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", input.display()))?;
            tracing::info!(input = %input.display(), n_iter = mel.config().n_iter, "decoding spectrogram");
            let mut samples = mel.image_to_audio(&image)?;
            if normalize {
                peak_normalize(&mut samples);
            }
            ensure_parent(&output)?;
            write_wav_as(&output, &samples, mel.sample_rate(), 1, encoding)?;
            print_audio_summary("decode", &output, samples.len(), mel.sample_rate())?;
        }

        Command::Loop {
            input,
            output,
            loops,
        } => {
            let (samples, sample_rate) = read_wav_mono(&input)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", input.display()))?;
            tracing::info!(input = %input.display(), loops, "extracting loop");
            let Some(looped) = loop_it(&samples, sample_rate, loops)? else {
                anyhow::bail!("not enough beats in {} to extract a loop", input.display());
            };
            ensure_parent(&output)?;
            write_wav_as(&output, &looped, sample_rate, 1, encoding)?;
            print_audio_summary("loop", &output, looped.len(), sample_rate)?;
        }
    }

    Ok(())
}

/// Ensure the output directory exists.
fn ensure_parent(path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn print_audio_summary(
    command: &str,
    path: &std::path::Path,
    samples: usize,
    sample_rate: u32,
) -> anyhow::Result<()> {
    println!(
        r#"{{"command":"{command}","path":{path},"samples":{samples},"sample_rate":{sample_rate}}}"#,
        path = serde_json::to_string(&path.display().to_string())?,
    );
    Ok(())
}
