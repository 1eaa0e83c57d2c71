//! The sonogen command-line tool.

use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::debug;

use sonogen::lang::Script;
use sonogen::line::Shape;
use sonogen::noise::Noise;
use sonogen::output::{self, AuSink, RawSink, SampleSink, WavSink};
use sonogen::program::Program;
use sonogen::render::Renderer;
use sonogen::wave::Wave;
use sonogen::DEFAULT_SRATE;

const RENDER_FRAMES: usize = 2048;

#[derive(Parser, Debug)]
#[command(
    name = "sonogen",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Args {
    /// Script files, or script strings with -e.
    scripts: Vec<String>,

    /// Evaluate arguments as script strings.
    #[arg(short = 'e')]
    eval: bool,

    /// Force-enable audio device output.
    #[arg(short = 'a', conflicts_with = "muted")]
    audio: bool,

    /// Disable audio device output.
    #[arg(short = 'm')]
    muted: bool,

    /// Sample rate in Hz.
    #[arg(short = 'r', value_name = "RATE")]
    rate: Option<u32>,

    /// Write a WAV file, or AU to stdout with '-'.
    #[arg(short = 'o', value_name = "PATH")]
    output: Option<String>,

    /// Downmix to mono.
    #[arg(long)]
    mono: bool,

    /// Write raw interleaved i16 samples to stdout.
    #[arg(long = "stdout")]
    raw_stdout: bool,

    /// Check scripts only; no audio is generated.
    #[arg(short = 'c')]
    check: bool,

    /// Print program info before rendering.
    #[arg(short = 'p')]
    print: bool,

    /// Print help, or help for a topic (wave, line, noise).
    #[arg(
        short = 'h',
        long = "help",
        value_name = "TOPIC",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    help: Option<String>,

    /// Print version.
    #[arg(short = 'v', long = "version")]
    version: bool,
}

fn main() {
    env_logger::init();
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();
    if let Some(topic) = &args.help {
        print_help(topic);
        return 0;
    }
    if args.version {
        println!("sonogen {}", env!("CARGO_PKG_VERSION"));
        return 0;
    }
    if args.scripts.is_empty() {
        print_help("");
        return 1;
    }
    let srate = args.rate.unwrap_or(DEFAULT_SRATE);

    let mut programs = Vec::new();
    let mut failed = false;
    for (i, source) in args.scripts.iter().enumerate() {
        match load(&args, i, source) {
            Ok(prog) => {
                debug!(
                    "'{}': {} event(s), {} operator(s), {} voice(s)",
                    prog.name,
                    prog.events.len(),
                    prog.ops.len(),
                    prog.vo_count
                );
                if args.print {
                    prog.print();
                }
                programs.push(prog);
            }
            Err(e) => {
                eprintln!("sonogen: {e:#}");
                failed = true;
            }
        }
    }
    if args.check {
        return failed as i32;
    }
    if !programs.is_empty() {
        if let Err(e) = play(&programs, &args, srate) {
            eprintln!("sonogen: {e:#}");
            return 1;
        }
    }
    failed as i32
}

fn load(args: &Args, index: usize, source: &str) -> Result<Program> {
    let script = if args.eval {
        Script::parse_string(&format!("<string: #{}>", index + 1), source)?
    } else {
        Script::parse_file(Path::new(source))
            .with_context(|| format!("'{source}'"))?
    };
    Ok(Program::build(&script)?)
}

fn play(programs: &[Program], args: &Args, srate: u32) -> Result<()> {
    let channels = if args.mono { 1 } else { 2 };
    let mut sinks: Vec<Box<dyn SampleSink>> = Vec::new();
    match args.output.as_deref() {
        Some("-") => sinks.push(Box::new(AuSink::new(
            std::io::stdout().lock(),
            srate,
            channels,
        ))),
        Some(path) => sinks.push(Box::new(
            WavSink::create(Path::new(path), srate, channels)
                .with_context(|| format!("'{path}'"))?,
        )),
        None => {}
    }
    if args.raw_stdout {
        sinks.push(Box::new(RawSink::new(std::io::stdout().lock(), channels)));
    }
    let use_device =
        !args.muted && (args.audio || (args.output.is_none() && !args.raw_stdout));
    if use_device {
        #[cfg(feature = "device")]
        sinks.push(Box::new(sonogen::device::DeviceSink::new(srate, channels)?));
        #[cfg(not(feature = "device"))]
        return Err(anyhow!(
            "built without audio device support; use -m, -o or --stdout"
        ));
    }
    if sinks.is_empty() {
        return Ok(());
    }

    let mut buf = vec![0i16; RENDER_FRAMES * channels];
    for prog in programs {
        let mut renderer = Renderer::new(prog, srate, args.mono);
        loop {
            let (frames, done) = renderer.render(&mut buf);
            for sink in sinks.iter_mut() {
                output::write_all(sink.as_mut(), &buf[..frames * channels], channels)?;
            }
            if done {
                break;
            }
            if frames == 0 {
                return Err(anyhow!("renderer stalled"));
            }
        }
    }
    for sink in sinks.iter_mut() {
        sink.finish()?;
    }
    Ok(())
}

fn print_help(topic: &str) {
    let mut err = std::io::stderr().lock();
    match topic {
        "wave" => {
            let _ = writeln!(err, "wave types: {}", Wave::NAMES.join(" "));
        }
        "line" => {
            let _ = writeln!(err, "line shapes: {}", Shape::NAMES.join(" "));
        }
        "noise" => {
            let _ = writeln!(
                err,
                "noise types: {} ('pk' and 'br' are reserved)",
                Noise::NAMES.join(" ")
            );
        }
        _ => {
            let _ = writeln!(
                err,
                "\
Usage: sonogen [OPTION]... SCRIPT...

Play and render audio synthesis scripts.

  -a          force-enable audio device output
  -m          disable audio device output
  -r RATE     sample rate in Hz (default {DEFAULT_SRATE})
  -o PATH     write a WAV file, or AU to stdout with '-'
  --mono      downmix to mono
  --stdout    write raw interleaved i16 samples to stdout
  -c          check scripts only, no audio
  -p          print program info before rendering
  -e          evaluate arguments as script strings
  -h [TOPIC]  this help, or a topic: wave, line, noise
  -v          print version"
            );
        }
    }
}
