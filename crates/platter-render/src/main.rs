//! Platter Render - offline deck renderer
//!
//! Loads a track into deck 1, applies the transport settings given on the
//! command line, pulls audio through the engine callback by callback (paced
//! like a sound card unless `--fast` is given) and writes the master output
//! to a 32-bit float WAV file.
//!
//! ```text
//! platter-render <input> <output.wav> [options]
//!
//!   --seconds S          length of the render (default 10)
//!   --seek FRAMES        start position in track frames
//!   --rate R             playback rate, 1.0 = nominal (negative = reverse)
//!   --reverse            play backwards
//!   --loop IN OUT        loop between two frame positions
//!   --keylock            keep pitch while changing rate
//!   --interpolation M    linear | cubic | sinc
//!   --buffer N           callback size in frames (default 512)
//!   --config PATH        engine config (YAML)
//!   --fast               do not pace callbacks in real time
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use platter_core::config::{default_config_path, load_engine_config};
use platter_core::engine::{command_channel, AudioEngine, InterpolationMethod};
use platter_core::reader::ReaderEvent;
use platter_core::StereoBuffer;

const DECK: usize = 0;
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct Options {
    input: PathBuf,
    output: PathBuf,
    seconds: f64,
    seek: Option<f64>,
    rate: f64,
    reverse: bool,
    looping: Option<(u64, u64)>,
    keylock: bool,
    interpolation: Option<InterpolationMethod>,
    buffer: usize,
    config: Option<PathBuf>,
    fast: bool,
}

fn value<'a>(args: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a String> {
    args.next().with_context(|| format!("{} needs a value", flag))
}

fn number<T: std::str::FromStr>(text: &str, flag: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    text.parse().with_context(|| format!("invalid value for {}: {:?}", flag, text))
}

fn parse_interpolation(text: &str) -> Result<InterpolationMethod> {
    match text.to_ascii_lowercase().as_str() {
        "linear" => Ok(InterpolationMethod::Linear),
        "cubic" => Ok(InterpolationMethod::Cubic),
        "sinc" => Ok(InterpolationMethod::Sinc),
        _ => bail!("unknown interpolation {:?} (linear, cubic, sinc)", text),
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut positional = Vec::new();
    let mut opts = Options {
        input: PathBuf::new(),
        output: PathBuf::new(),
        seconds: 10.0,
        seek: None,
        rate: 1.0,
        reverse: false,
        looping: None,
        keylock: false,
        interpolation: None,
        buffer: 512,
        config: None,
        fast: false,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seconds" => opts.seconds = number(value(&mut iter, arg)?, arg)?,
            "--seek" => opts.seek = Some(number(value(&mut iter, arg)?, arg)?),
            "--rate" => opts.rate = number(value(&mut iter, arg)?, arg)?,
            "--reverse" => opts.reverse = true,
            "--loop" => {
                let loop_in = number(value(&mut iter, arg)?, arg)?;
                let loop_out = number(value(&mut iter, arg)?, arg)?;
                opts.looping = Some((loop_in, loop_out));
            }
            "--keylock" => opts.keylock = true,
            "--interpolation" => opts.interpolation = Some(parse_interpolation(value(&mut iter, arg)?)?),
            "--buffer" => opts.buffer = number(value(&mut iter, arg)?, arg)?,
            "--config" => opts.config = Some(PathBuf::from(value(&mut iter, arg)?)),
            "--fast" => opts.fast = true,
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            path => positional.push(PathBuf::from(path)),
        }
    }

    let [input, output] = <[PathBuf; 2]>::try_from(positional)
        .map_err(|_| anyhow::anyhow!("usage: platter-render <input> <output.wav> [options]"))?;
    opts.input = input;
    opts.output = output;
    if opts.buffer == 0 || opts.seconds <= 0.0 {
        bail!("--buffer and --seconds must be positive");
    }
    Ok(opts)
}

/// Wait for the deck's load result, keeping the engine callback running
fn wait_for_load(engine: &mut AudioEngine, scratch: &mut StereoBuffer) -> Result<()> {
    let events = engine.events();
    let deadline = Instant::now() + LOAD_TIMEOUT;
    loop {
        engine.process(scratch);
        match events.recv_timeout(Duration::from_millis(10)) {
            Ok(ReaderEvent::TrackLoaded { info, path, .. }) => {
                println!(
                    "Loaded {}: {:.1}s, {} Hz, {} channel(s)",
                    path.display(),
                    info.duration_seconds(),
                    info.sample_rate,
                    info.channels
                );
                return Ok(());
            }
            Ok(ReaderEvent::LoadFailed { failure, .. }) => bail!("{}", failure),
            Ok(_) => {}
            Err(_) if Instant::now() > deadline => bail!("timed out waiting for the track to load"),
            Err(_) => {}
        }
    }
}

fn run(opts: Options) -> Result<()> {
    let config_path = opts.config.clone().unwrap_or_else(|| default_config_path("engine.yaml"));
    let mut config = load_engine_config(&config_path);
    config.max_buffer_size = config.max_buffer_size.max(opts.buffer);
    let sample_rate = config.sample_rate;

    let mut engine = AudioEngine::new(config.clone()).context("invalid engine configuration")?;
    let (mut tx, mut rx) = command_channel(config.command_queue_capacity);
    let mut buffer = StereoBuffer::silence(opts.buffer);

    tx.load(DECK, opts.input.clone());
    engine.process_commands(&mut rx);
    wait_for_load(&mut engine, &mut buffer)?;

    if let Some(position) = opts.seek {
        tx.seek(DECK, position);
    }
    if let Some((loop_in, loop_out)) = opts.looping {
        tx.set_loop(DECK, loop_in, loop_out, true);
    }
    if let Some(method) = opts.interpolation {
        tx.set_interpolation(DECK, method);
    }
    tx.set_rate(DECK, opts.rate);
    tx.set_reverse(DECK, opts.reverse);
    tx.set_keylock(DECK, opts.keylock);
    tx.play(DECK);

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&opts.output, spec)
        .with_context(|| format!("Failed to create {:?}", opts.output))?;

    let total_frames = (opts.seconds * sample_rate as f64).round() as usize;
    let callback_time = Duration::from_secs_f64(opts.buffer as f64 / sample_rate as f64);
    let atomics = engine.deck_atomics();
    let started = Instant::now();
    let mut rendered = 0;
    let mut failure_logged = false;

    while rendered < total_frames {
        let n = opts.buffer.min(total_frames - rendered);
        buffer.set_len_from_capacity(n);
        engine.process_commands(&mut rx);
        engine.process(&mut buffer);

        for sample in buffer.as_interleaved() {
            writer.write_sample(*sample)?;
        }
        rendered += n;

        if atomics[DECK].load_failed() && !failure_logged {
            failure_logged = true;
            log::warn!("Track became unplayable at frame {}", atomics[DECK].position());
        }
        if !opts.fast {
            let due = callback_time * (rendered / opts.buffer) as u32;
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }
    writer.finalize().context("Failed to finalize WAV output")?;

    for event in engine.events().try_iter() {
        log::info!("{:?}", event);
    }

    let deck = &atomics[DECK];
    println!(
        "Rendered {:.1}s to {} (end position {} of {} frames, {:?})",
        rendered as f64 / sample_rate as f64,
        opts.output.display(),
        deck.position(),
        deck.track_frames(),
        deck.play_state()
    );
    if let Some(buffer) = engine.deck(DECK) {
        println!("Reader health: {}", buffer.reader().health().snapshot());
    }
    Ok(())
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for reader worker details
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = parse_args(&args)?;
    log::info!("platter-render starting: {:?}", opts);
    run(opts)
}
