use std::fs;
use std::path::Path;

use env_logger;
use log;

use ext_line_sort::{ExternalSorter, ExternalSorterBuilder};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    fs::write("input.txt", "pear\napple\nfig\nbanana\napple\ncherry").unwrap();

    let sorter: ExternalSorter = ExternalSorterBuilder::new()
        .with_work_dir(Path::new("./"))
        .with_run_capacity(2)
        .with_fan_in(2)
        .build()
        .unwrap();

    let summary = sorter.sort_file(Path::new("input.txt"), Path::new("output.txt")).unwrap();

    log::info!("{} runs merged in {} rounds", summary.initial_runs, summary.rounds.len());
    print!("{}", fs::read_to_string("output.txt").unwrap());
}
