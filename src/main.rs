use std::path::Path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_line_sort::buffer::mem::MemoryLimitedBufferBuilder;
use ext_line_sort::{
    ExternalSorterBuilder, LimitedBufferBuilder, MergeStrategy, RunBufferBuilder, DEFAULT_RUN_CAPACITY,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");
    let merge: Merge = arg_parser.value_of_t_or_exit("merge");

    let result = if arg_parser.is_present("run_memory") {
        let run_memory = arg_parser.value_of("run_memory").expect("value is present");
        let limit = run_memory.parse::<ByteSize>().expect("value is pre-validated").as_u64();
        let builder = ExternalSorterBuilder::new().with_buffer(MemoryLimitedBufferBuilder::new(limit));
        configure(builder, &arg_parser, merge).and_then(|builder| run(builder, input, output))
    } else {
        let run_capacity: usize = if arg_parser.is_present("run_capacity") {
            arg_parser.value_of_t_or_exit("run_capacity")
        } else {
            DEFAULT_RUN_CAPACITY
        };
        let builder = ExternalSorterBuilder::new().with_buffer(LimitedBufferBuilder::new(run_capacity, false));
        configure(builder, &arg_parser, merge).and_then(|builder| run(builder, input, output))
    };

    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}

fn configure<B: RunBufferBuilder>(
    mut builder: ExternalSorterBuilder<B>,
    arg_parser: &clap::ArgMatches,
    merge: Merge,
) -> Result<ExternalSorterBuilder<B>, String> {
    if arg_parser.is_present("threads") {
        builder = builder.with_threads_number(arg_parser.value_of_t_or_exit("threads"));
    }

    if let Some(work_dir) = arg_parser.value_of("work_dir") {
        builder = builder.with_work_dir(Path::new(work_dir));
    }

    if let Some(rw_buf_size) = arg_parser.value_of("rw_buf_size") {
        builder = builder.with_rw_buf_size(parse_buf_size(rw_buf_size)?);
    }

    Ok(builder
        .with_fan_in(arg_parser.value_of_t_or_exit("fan_in"))
        .with_merge_strategy(match merge {
            Merge::Heap => MergeStrategy::BinaryHeap,
            Merge::Linear => MergeStrategy::LinearScan,
        })
        .with_parallel_merge(arg_parser.is_present("parallel_merge"))
        .with_cleanup_on_failure(arg_parser.is_present("cleanup_on_failure")))
}

fn run<B: RunBufferBuilder>(builder: ExternalSorterBuilder<B>, input: &str, output: &str) -> Result<(), String> {
    let sorter = builder
        .build()
        .map_err(|err| format!("sorter initialization error: {}", err))?;

    let summary = sorter
        .sort_file(Path::new(input), Path::new(output))
        .map_err(|err| format!("data sorting error: {}", err))?;

    log::info!(
        "{} line(s), {} initial run(s), {} merge round(s)",
        summary.lines,
        summary.initial_runs,
        summary.rounds.len()
    );

    Ok(())
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Merge {
    Heap,
    Linear,
}

impl Merge {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Merge::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Merge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Merge as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_byte_size(value: &str) -> Result<(), String> {
    match value.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("byte size format incorrect: {}", err)),
    }
}

fn parse_buf_size(value: &str) -> Result<usize, String> {
    let size = value
        .parse::<ByteSize>()
        .map_err(|err| format!("byte size format incorrect: {}", err))?;
    usize::try_from(size.as_u64()).map_err(|_| format!("read/write buffer size {} exceeds the address space", size))
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-line-sort")
        .about("bounded memory external line sorter")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file, replaced if it exists")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("work_dir")
                .short('d')
                .long("work-dir")
                .help("directory to be used to store temporary runs")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("run_capacity")
                .short('c')
                .long("run-capacity")
                .help("number of lines held in memory per run [default: 10000]")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("run_memory")
                .short('m')
                .long("run-memory")
                .help("memory held per run, e.g. 50MB (overrides run capacity)")
                .takes_value(true)
                .conflicts_with("run_capacity")
                .validator(validate_byte_size),
        )
        .arg(
            clap::Arg::new("fan_in")
                .short('f')
                .long("fan-in")
                .help("maximum number of runs merged at once")
                .takes_value(true)
                .default_value("10"),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("merge")
                .long("merge")
                .help("k-way merge algorithm")
                .takes_value(true)
                .default_value("heap")
                .possible_values(Merge::possible_values()),
        )
        .arg(
            clap::Arg::new("parallel_merge")
                .long("parallel-merge")
                .help("merge independent run groups in parallel"),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .long("rw-buf-size")
                .help("file read/write buffer size, e.g. 64KB")
                .takes_value(true)
                .validator(validate_byte_size),
        )
        .arg(
            clap::Arg::new("cleanup_on_failure")
                .long("cleanup-on-failure")
                .help("remove temporary runs when sorting fails"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
