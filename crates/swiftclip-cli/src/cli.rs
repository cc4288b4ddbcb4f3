// crates/swiftclip-cli/src/cli.rs
//
// Argument surface of the `swiftclip` binary.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use swiftclip_core::job::{CropRect, ExportJob};

#[derive(Parser, Debug)]
#[command(name = "swiftclip")]
#[command(about = "Hardware-accelerated trim / crop / scale exports", long_about = None)]
pub struct Cli {
    /// Engine configuration (TOML). Missing fields take their defaults.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More logging on stderr (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export one clip from a source video
    Export {
        #[arg(long, value_name = "FILE")]
        source: PathBuf,

        #[arg(long, value_name = "FILE")]
        dest: PathBuf,

        #[arg(long, default_value_t = 0)]
        start_ms: i64,

        /// -1 exports to the end of the source
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        duration_ms: i64,

        /// Normalised crop rectangle `x,y,w,h`, each in [0, 1]
        #[arg(long, value_parser = parse_crop, value_name = "X,Y,W,H")]
        crop: Option<CropRect>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        /// The job carries an audio overlay (forces the GPU path)
        #[arg(long)]
        audio: bool,
    },

    /// Run a JSON batch request: `{ sourcePath, jobs: [...] }`, or
    /// `{ method, args }` as sent by the command bridge
    Batch {
        #[arg(value_name = "REQUEST")]
        request: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_crop(s: &str) -> Result<CropRect, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let [x, y, w, h] = parts[..] else {
        return Err(format!("expected x,y,w,h, got {} values", parts.len()));
    };
    Ok(CropRect { x, y, w, h })
}

/// Build the job for `export`, leaving unset sizes at the job defaults.
pub fn export_job(
    dest:        PathBuf,
    start_ms:    i64,
    duration_ms: i64,
    crop:        Option<CropRect>,
    width:       Option<u32>,
    height:      Option<u32>,
    audio:       bool,
) -> ExportJob {
    let mut job = ExportJob::new(dest);
    job.start_time_ms = start_ms;
    job.duration_ms = duration_ms;
    if let Some(crop) = crop {
        job.crop_rect = crop;
    }
    if let Some(w) = width {
        job.target_width = w;
    }
    if let Some(h) = height {
        job.target_height = h;
    }
    job.has_audio_overlay = audio;
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use swiftclip_core::job::Strategy;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn crop_parses_four_values() {
        let c = parse_crop("0.1, 0.2,0.5,0.5").unwrap();
        assert_eq!(c, CropRect { x: 0.1, y: 0.2, w: 0.5, h: 0.5 });
        assert!(parse_crop("0,0,1").is_err());
        assert!(parse_crop("0,0,one,1").is_err());
    }

    #[test]
    fn export_flags_build_a_job() {
        let cli = Cli::try_parse_from([
            "swiftclip", "-v", "export", "--source", "in.mp4", "--dest", "out.mp4",
            "--start-ms", "2000", "--duration-ms", "-1", "--crop", "0,0,0.5,0.5", "--width", "640",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Export { dest, start_ms, duration_ms, crop, width, height, audio, .. } = cli.command else {
            panic!("expected export");
        };
        let job = export_job(dest, start_ms, duration_ms, crop, width, height, audio);
        assert_eq!(job.start_time_ms, 2_000);
        assert_eq!(job.duration_ms, -1);
        assert_eq!(job.target_width, 640);
        assert_eq!(job.target_height, ExportJob::new("x").target_height);
        assert_eq!(job.strategy(), Strategy::GpuTransform);
    }

    #[test]
    fn plain_trim_is_a_stream_copy() {
        let job = export_job("o.mp4".into(), 0, 5_000, None, None, None, false);
        assert_eq!(job.strategy(), Strategy::StreamCopy);
        assert!(job.validate().is_ok());
    }
}
