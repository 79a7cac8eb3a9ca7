use std::{env, fs};

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use zkevm_executor::{
    BatchInput, Executor, ExecutorConfig, KeccakTreeHasher, MemTreeStore, NoopTracer, Rom,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let (Some(rom_path), Some(input_path)) = (args.next(), args.next()) else {
        bail!("usage: zkevm-executor <rom.json> <input.json> [steps]");
    };
    let steps = args.next().map(|s| s.parse::<usize>()).transpose()?;

    let rom_json = fs::read_to_string(&rom_path)
        .with_context(|| format!("reading ROM from {rom_path}"))?;
    let rom = Rom::from_json_str(&rom_json)?;
    let input_json = fs::read_to_string(&input_path)
        .with_context(|| format!("reading batch input from {input_path}"))?;
    let input = BatchInput::from_json_str(&input_json)?;

    let mut store = MemTreeStore::new(KeccakTreeHasher);
    let hasher = KeccakTreeHasher;
    let mut tracer = NoopTracer;
    let config = ExecutorConfig {
        debug: steps.is_some(),
        steps_n: steps,
        ..Default::default()
    };

    let result = Executor::new(&rom, &input, &mut store, &hasher, &mut tracer, config)?.run()?;

    println!("steps executed: {}", result.steps);
    println!(
        "counters: arith={} binary={} keccakF={} memAlign={} paddingPG={} poseidonG={}",
        result.counters.arith,
        result.counters.binary,
        result.counters.keccak_f,
        result.counters.mem_align,
        result.counters.padding_pg,
        result.counters.poseidon_g,
    );
    Ok(())
}
