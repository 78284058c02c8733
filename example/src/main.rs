use jfr_decoder::reader::event::ClassFilter;
use jfr_decoder::reader::registry::EventRegistry;
use jfr_decoder::reader::types::jdk::{self, ExecutionSample};
use jfr_decoder::reader::{ChunkParseOptions, JfrReader};
use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: example <recording.jfr>");
        return ExitCode::FAILURE;
    };

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    let input = match jfr_decoder::decompress::decompress(BufReader::new(file)) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let options = ChunkParseOptions::new()
        .with_registry(EventRegistry::builtin())
        .with_constant_pool_hook(|class, pool| {
            log::debug!("constant pool {} has {} entries", class.name(), pool.len());
        });
    let mut reader = JfrReader::with_options(input, options);
    let samples_only = ClassFilter::new([jdk::EXECUTION_SAMPLE]);

    let mut os_name_total_length = 0;
    for (idx, chunk) in reader.chunks().enumerate() {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                eprintln!("chunk {}: {}", idx, e);
                return ExitCode::FAILURE;
            }
        };

        println!("chunk {}: {} events", idx, chunk.events.event_count());
        for collection in chunk.events.collections() {
            println!("  {:<50} {:>8}", collection.class.name(), collection.len());
        }

        for event in chunk.events.apply(&samples_only).events() {
            if let Some(name) = event
                .typed::<ExecutionSample>()
                .and_then(|s| s.sampled_thread.as_ref())
                .and_then(|t| t.os_name.as_ref())
            {
                os_name_total_length += name.len();
            }
        }
    }
    println!("os_name_total_length: {}", os_name_total_length);

    ExitCode::SUCCESS
}
