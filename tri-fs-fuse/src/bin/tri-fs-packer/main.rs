mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use clap::Parser;
use cli::Cli;
use tri_fs::{InodeKind, SectorId, TriFs, SECTOR_SIZE};
use tri_fs_fuse::{BlockFile, RangeFreeMap};

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let block_file = Arc::new(BlockFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.image)?;
        fd.set_len((cli.sectors * SECTOR_SIZE) as u64)?;

        fd
    })));

    let free_map = Arc::new(RangeFreeMap::new(0, cli.sectors));
    let tfs = TriFs::new(block_file, free_map, cli.cache_slots);

    for path in &cli.files {
        let data = fs::read(path)?;

        let sector = tfs
            .create(0, InodeKind::File, SectorId::new(0))
            .expect("image full");
        let inode = tfs.open(sector);
        tfs.write_at(&inode, 0, &data).expect("image full");
        tfs.close(&inode);

        log::info!("{} -> sector {sector}", path.display());
    }

    tfs.flush();
    Ok(())
}
