use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use sounds_bot::SoundStorage;

/// Renames every sound file to the name lookups expect.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env, default_value = "sounds")]
    sound_dir: PathBuf,

    /// Only print what would be renamed.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let storage = SoundStorage::new(&args.sound_dir);
    let renames = storage
        .canonicalize_names(args.dry_run)
        .with_context(|| format!("Failed to rename sounds in {:?}", args.sound_dir))?;
    for rename in &renames {
        println!("{} -> {}", rename.from.display(), rename.to.display());
    }
    let verb = if args.dry_run { "Would rename" } else { "Renamed" };
    println!("{verb} {} files", renames.len());
    Ok(())
}
