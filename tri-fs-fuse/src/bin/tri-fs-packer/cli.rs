use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Files to pack into the image
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output image path
    #[arg(long, short = 'O', default_value = "fs.img")]
    pub image: PathBuf,

    /// Image size in sectors
    #[arg(long, short, default_value_t = 16 * 2048)]
    pub sectors: usize,

    /// Sector cache capacity in slots
    #[arg(long, default_value_t = tri_fs::SectorCache::DEFAULT_CAPACITY)]
    pub cache_slots: usize,
}
