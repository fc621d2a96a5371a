mod config;

use std::path::{
    Path,
    PathBuf,
};

use clap::Parser;
use color_eyre::eyre::{
    Error,
    bail,
};
use tracing_subscriber::EnvFilter;
use wefax::{
    GetSampleRate,
    modem::fax::{
        Controls,
        DEFAULT_IMAGE_WIDTH,
        FaxDecoder,
        raster::Raster,
    },
    source::{
        SignalGenerator,
        WefaxSignal,
    },
};

use crate::config::AppConfig;

/// Decodes HF weather fax (WEFAX) audio recordings into images.
#[derive(Debug, Parser)]
struct Args {
    /// WAV recording of the fax audio. Not needed with --self-test.
    input: Option<PathBuf>,

    /// Output image path; defaults to the input path with a png extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Image width in pixels.
    #[arg(long, default_value_t = DEFAULT_IMAGE_WIDTH)]
    width: usize,

    /// Produce 1-bit black/white pixels instead of 8-bit grayscale.
    #[arg(long)]
    bilevel: bool,

    /// Low-pass filter the video signal to suppress noise.
    #[arg(long)]
    noise_filter: bool,

    /// Clock calibration value; saved for future runs.
    #[arg(long)]
    calibration: Option<f64>,

    /// Tone detector threshold, in percent of the nominal value.
    #[arg(long, default_value_t = 100.0)]
    threshold: f64,

    /// Skip the automatic synchronization search and start pixel output
    /// immediately.
    #[arg(long)]
    lock: bool,

    /// Constant skew correction applied to the finished image, in pixels.
    #[arg(long, default_value_t = 0)]
    skew: isize,

    /// Decode an internally generated test transmission instead of a
    /// recording.
    #[arg(long)]
    self_test: bool,
}

fn main() -> Result<(), Error> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::debug!(?args);

    let mut app_config = AppConfig::load()?;
    if let Some(calibration) = args.calibration {
        app_config.calibration = calibration;
        app_config.save()?;
    }

    let controls = Controls::new();
    controls.set_calibration(app_config.calibration);
    controls.set_grayscale(!args.bilevel);
    controls.set_video_filter(args.noise_filter);
    controls.set_threshold_percent(args.threshold);

    let (samples, sample_rate) = if args.self_test {
        test_transmission()
    }
    else {
        let Some(input) = &args.input
        else {
            bail!("either an input file or --self-test is required");
        };
        read_wav(input)?
    };

    let mut decoder =
        FaxDecoder::with_image_width(Raster::new(args.width), sample_rate, args.width, controls)?;
    tracing::info!(
        sample_rate,
        duration_seconds = samples.len() as u32 / sample_rate,
        "decoding"
    );
    decoder.enable(true);
    if args.lock {
        decoder.lock();
    }

    for block in samples.chunks(decoder.sample_rate() as usize) {
        decoder.process(block);
        tracing::debug!(
            state = ?decoder.state(),
            lines = decoder.sink().height(),
            frequency_hz = decoder.frequency_meter_cycles(),
            "processed one second of audio"
        );
        decoder.reset_frequency_meter();
    }
    // finalize any in-progress image
    decoder.enable(false);

    let mut raster = decoder.into_sink();
    if args.skew != 0 {
        raster.translate(args.skew);
    }
    let Some(image) = raster.to_image()
    else {
        bail!("no image was decoded; is this a fax transmission?");
    };

    let output = args.output.unwrap_or_else(|| {
        args.input
            .as_deref()
            .map_or_else(|| PathBuf::from("self-test.png"), |input| {
                input.with_extension("png")
            })
    });
    image.save(&output)?;
    tracing::info!(path = %output.display(), lines = raster.height(), "image saved");

    Ok(())
}

/// Reads a WAV file, downmixing to the first channel and rescaling to
/// 16-bit samples.
fn read_wav(path: &Path) -> Result<(Vec<i16>, u32), Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels);
    if channels == 0 {
        bail!("WAV file declares zero channels");
    }

    let mut samples = Vec::with_capacity(reader.len() as usize / channels);
    match spec.sample_format {
        hound::SampleFormat::Int => {
            for (index, sample) in reader.samples::<i32>().enumerate() {
                let sample = sample?;
                if index % channels == 0 {
                    let sample = if spec.bits_per_sample >= 16 {
                        (sample >> (spec.bits_per_sample - 16)) as i16
                    }
                    else {
                        (sample << (16 - spec.bits_per_sample)) as i16
                    };
                    samples.push(sample);
                }
            }
        }
        hound::SampleFormat::Float => {
            for (index, sample) in reader.samples::<f32>().enumerate() {
                let sample = sample?;
                if index % channels == 0 {
                    samples.push((sample * f32::from(i16::MAX)) as i16);
                }
            }
        }
    }

    Ok((samples, spec.sample_rate))
}

/// Synthesizes a complete fax transmission with a test pattern, followed by
/// a second of silence.
fn test_transmission() -> (Vec<i16>, u32) {
    let sample_rate = 8000;
    let mut signal = WefaxSignal::new(f64::from(sample_rate), 120);
    let samples = (0..signal.duration_samples() + sample_rate as usize)
        .map(|_| signal.next() as i16)
        .collect();
    (samples, sample_rate)
}
