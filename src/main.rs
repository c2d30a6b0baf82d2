use clap::Parser;

use nano_decode::{GenerationConfig, MirostatMode};

#[derive(Parser, Debug)]
#[command(name = "nano-decode")]
#[command(about = "Generation-control core for LLM inference")]
struct Args {
    /// Model path
    #[arg(short, long)]
    model: Option<String>,

    /// Context size in tokens
    #[arg(long, default_value = "512")]
    n_ctx: usize,

    /// Logical batch capacity
    #[arg(long, default_value = "2048")]
    n_batch: usize,

    /// Parallel sequences
    #[arg(long, default_value = "1")]
    n_parallel: usize,

    /// Sampling temperature
    #[arg(long, default_value = "0.8")]
    temperature: f32,

    /// Top-k (<= 0 keeps the whole vocabulary)
    #[arg(long, default_value = "40")]
    top_k: i32,

    /// Top-p nucleus threshold
    #[arg(long, default_value = "0.95")]
    top_p: f32,

    /// Min-p relative probability floor (0.0 = disabled)
    #[arg(long, default_value = "0.0")]
    min_p: f32,

    /// Tail-free sampling z (1.0 = disabled)
    #[arg(long, default_value = "1.0")]
    tail_free_z: f32,

    /// Locally typical sampling threshold (1.0 = disabled)
    #[arg(long, default_value = "1.0")]
    typical_p: f32,

    /// Dynamic-temperature half range (0.0 = disabled)
    #[arg(long, default_value = "0.0")]
    dynatemp_range: f32,

    /// Dynamic-temperature exponent
    #[arg(long, default_value = "1.0")]
    dynatemp_exponent: f32,

    /// Repetition penalty
    #[arg(long, default_value = "1.1")]
    repeat_penalty: f32,

    /// Penalty window: last n tokens (0 = disabled, -1 = whole context)
    #[arg(long, default_value = "64", allow_negative_numbers = true)]
    repeat_last_n: i32,

    /// Frequency penalty
    #[arg(long, default_value = "0.0")]
    frequency_penalty: f32,

    /// Presence penalty
    #[arg(long, default_value = "0.0")]
    presence_penalty: f32,

    /// New tokens to generate per sequence (unlimited when omitted)
    #[arg(long)]
    n_predict: Option<usize>,

    /// Mirostat mode: off, v1 or v2
    #[arg(long, default_value = "off")]
    mirostat: String,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> nano_decode::Result<()> {
    let args = Args::parse();

    let mut config = GenerationConfig::default();
    if let Some(model) = args.model {
        config.model = model;
    }
    config.n_ctx = args.n_ctx;
    config.n_batch = args.n_batch;
    config.n_parallel = args.n_parallel;
    config.n_predict = args.n_predict;
    config.sampling.temperature = args.temperature;
    config.sampling.top_k = args.top_k;
    config.sampling.top_p = args.top_p;
    config.sampling.min_p = args.min_p;
    config.sampling.tail_free_z = args.tail_free_z;
    config.sampling.typical_p = args.typical_p;
    config.sampling.dynatemp_range = args.dynatemp_range;
    config.sampling.dynatemp_exponent = args.dynatemp_exponent;
    config.sampling.repeat_penalty = args.repeat_penalty;
    config.sampling.repeat_last_n = args.repeat_last_n;
    config.sampling.frequency_penalty = args.frequency_penalty;
    config.sampling.presence_penalty = args.presence_penalty;
    config.sampling.mirostat = match args.mirostat.as_str() {
        "v1" => MirostatMode::V1,
        "v2" => MirostatMode::V2,
        _ => MirostatMode::Off,
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    println!("nano-decode v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_flags_parse() {
        let args = Args::try_parse_from([
            "nano-decode",
            "--min-p",
            "0.1",
            "--tail-free-z",
            "0.9",
            "--typical-p",
            "0.5",
            "--frequency-penalty",
            "0.2",
            "--presence-penalty",
            "0.3",
            "--dynatemp-range",
            "0.4",
            "--repeat-last-n=-1",
            "--n-predict",
            "128",
        ])
        .unwrap();
        assert!((args.min_p - 0.1).abs() < f32::EPSILON);
        assert!((args.typical_p - 0.5).abs() < f32::EPSILON);
        assert_eq!(args.repeat_last_n, -1);
        assert_eq!(args.n_predict, Some(128));
    }
}
