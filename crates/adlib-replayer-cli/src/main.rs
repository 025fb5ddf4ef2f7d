//! Command-line AdLib music player.
//!
//! Plays DRO, MIDI-dialect, and ROL sequences through the OPL2 core,
//! either streamed to the default audio device or exported to WAV.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use adlib_replayer::{detect, export_to_wav, Renderer, Result};

/// Parsed command-line arguments.
#[derive(Debug)]
struct CliArgs {
    file: Option<String>,
    bank: Option<String>,
    wav: Option<String>,
    surround: bool,
    seek_ms: Option<u64>,
    show_help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        CliArgs {
            file: None,
            bank: None,
            wav: None,
            surround: true,
            seek_ms: None,
            show_help: false,
        }
    }
}

impl CliArgs {
    fn parse() -> Self {
        let mut args = Self::default();
        let mut iter = env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => args.show_help = true,
                "--no-surround" => args.surround = false,
                "--bank" => args.bank = iter.next(),
                "--wav" => args.wav = iter.next(),
                "--seek" => {
                    match iter.next().and_then(|v| v.parse().ok()) {
                        Some(ms) => args.seek_ms = Some(ms),
                        None => {
                            eprintln!("--seek expects a position in milliseconds");
                            args.show_help = true;
                        }
                    }
                }
                other if other.starts_with("--") => {
                    eprintln!("Unknown option: {other}");
                    args.show_help = true;
                }
                _ => args.file = Some(arg),
            }
        }
        args
    }
}

fn print_usage() {
    println!("Usage: adlib-play <file> [options]");
    println!();
    println!("Plays DRO, MIDI (MID/ADL/CMF/Sierra), and ROL files.");
    println!();
    println!("Options:");
    println!("  --bank <file.bnk>   Instrument bank / patch companion file");
    println!("  --wav <out.wav>     Export to WAV instead of playing");
    println!("  --no-surround       Disable the wide-stereo effect");
    println!("  --seek <ms>         Start playback at the given position");
    println!("  -h, --help          Show this help");
}

/// Locate the companion instrument file: `--bank` wins; otherwise try the
/// song's own stem and then `standard.bnk` next to it.
fn load_companion(args: &CliArgs, song_path: &Path) -> Result<Option<Vec<u8>>> {
    if let Some(bank) = &args.bank {
        return Ok(Some(fs::read(bank)?));
    }
    let mut candidates: Vec<PathBuf> = Vec::new();
    candidates.push(song_path.with_extension("bnk"));
    if let Some(dir) = song_path.parent() {
        candidates.push(dir.join("standard.bnk"));
    }
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(Some(fs::read(candidate)?));
        }
    }
    Ok(None)
}

fn format_time(ms: u64) -> String {
    format!("{}:{:02}", ms / 60_000, (ms / 1000) % 60)
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    let Some(file) = args.file.clone() else {
        print_usage();
        return Ok(());
    };
    if args.show_help {
        print_usage();
        return Ok(());
    }

    let song_path = Path::new(&file);
    let data = fs::read(song_path)?;
    let companion = load_companion(&args, song_path)?;

    let sequencer = detect(&data, companion.as_deref())?;
    println!("Format: {}", sequencer.format_name());

    let mut renderer = Renderer::new(sequencer, args.surround);
    let length_ms = renderer.length_ms();
    println!("Length: {}", format_time(length_ms));

    if let Some(out) = &args.wav {
        if let Some(ms) = args.seek_ms {
            renderer.seek(ms);
        }
        println!("Writing {out}...");
        export_to_wav(&mut renderer, out)?;
        println!("Done.");
        Ok(())
    } else {
        play_stream(renderer, args.seek_ms, length_ms)
    }
}

#[cfg(feature = "streaming")]
fn play_stream(renderer: Renderer, seek_ms: Option<u64>, length_ms: u64) -> Result<()> {
    use adlib_replayer::{AudioStream, RenderSession};
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    let stream = AudioStream::new(renderer.sample_rate())?;
    let session = RenderSession::spawn(renderer, stream.pcm_sink());
    let control = session.control();
    if let Some(ms) = seek_ms {
        control.request_seek(ms);
    }

    while !session.is_finished() {
        print!(
            "\rPlaying {} / {}   ",
            format_time(control.position_ms()),
            format_time(length_ms)
        );
        let _ = std::io::stdout().flush();
        thread::sleep(Duration::from_millis(250));
    }
    println!();
    stream.finish();
    stream.wait_until_end();
    session.join()
}

#[cfg(not(feature = "streaming"))]
fn play_stream(_renderer: Renderer, _seek_ms: Option<u64>, _length_ms: u64) -> Result<()> {
    Err(adlib_replayer::ReplayerError::Audio(
        "built without the streaming feature; use --wav <out.wav>".into(),
    ))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
