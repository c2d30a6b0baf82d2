//! Configuration types for nano-decode.
//!
//! A [`GenerationConfig`] is built once at run start and stays read-only
//! for the duration of the run; starting a new run means building a new
//! config. There is no process-wide mutable default state.

use serde::{Deserialize, Serialize};

use crate::speculative::SpeculativeConfig;

/// How model tensors are split across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Everything on the main device.
    None,
    /// Split whole layers across devices.
    #[default]
    Layer,
    /// Split individual tensors row-wise.
    Row,
}

/// Pooling applied to embeddings by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingType {
    /// Let the model decide.
    #[default]
    Unspecified,
    /// No pooling.
    None,
    /// Mean over token embeddings.
    Mean,
    /// First (CLS) token embedding.
    Cls,
}

/// RoPE frequency scaling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RopeScalingType {
    /// Let the model decide.
    #[default]
    Unspecified,
    /// No scaling.
    None,
    /// Linear position interpolation.
    Linear,
    /// YaRN scaling.
    Yarn,
}

/// Adaptive-entropy sampling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirostatMode {
    /// Standard filter-chain sampling.
    #[default]
    Off,
    /// Mirostat 1.0: Zipf-estimated top-k recomputed each step.
    V1,
    /// Mirostat 2.0: direct truncation at the running surprise target.
    V2,
}

impl MirostatMode {
    /// Whether an adaptive strategy is active.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Sampling parameters for the logit-to-token pipeline.
///
/// The probabilistic knobs (`top_p`, `min_p`, `tail_free_z`, `typical_p`)
/// live in `(0, 1]` with `1.0` meaning disabled (`min_p` disables at
/// `0.0`). `top_k <= 0` means the whole vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Keep the k highest-scoring candidates (<= 0 = whole vocabulary).
    pub top_k: i32,
    /// Nucleus sampling threshold (1.0 = disabled).
    pub top_p: f32,
    /// Relative probability floor, as a fraction of the max probability
    /// (0.0 = disabled).
    pub min_p: f32,
    /// Tail-free sampling z (1.0 = disabled).
    pub tail_free_z: f32,
    /// Locally typical sampling threshold (1.0 = disabled).
    pub typical_p: f32,
    /// Sampling temperature (0.0 = greedy argmax).
    pub temperature: f32,
    /// Dynamic-temperature half range; > 0 interpolates the effective
    /// temperature in `[temperature - range, temperature + range]` from
    /// the distribution's normalized entropy.
    pub dynatemp_range: f32,
    /// Exponent shaping the dynamic-temperature interpolation.
    pub dynatemp_exponent: f32,
    /// Quadratic logit smoothing factor (0.0 = disabled).
    pub smoothing_factor: f32,
    /// Multiplicative penalty for recently emitted tokens (1.0 = disabled).
    pub repeat_penalty: f32,
    /// Penalty window: last n emitted tokens (0 = disabled, -1 = whole
    /// context).
    pub repeat_last_n: i32,
    /// Penalty proportional to a token's occurrence count in the window.
    pub frequency_penalty: f32,
    /// Flat penalty for any token present in the window.
    pub presence_penalty: f32,
    /// Adaptive-entropy strategy selection.
    pub mirostat: MirostatMode,
    /// Mirostat target surprise (bits).
    pub mirostat_tau: f32,
    /// Mirostat learning rate.
    pub mirostat_eta: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.95,
            min_p: 0.0,
            tail_free_z: 1.0,
            typical_p: 1.0,
            temperature: 0.8,
            dynatemp_range: 0.0,
            dynatemp_exponent: 1.0,
            smoothing_factor: 0.0,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            mirostat: MirostatMode::Off,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
        }
    }
}

impl SamplingParams {
    /// Greedy decoding: always take the argmax.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Default::default()
        }
    }
}

/// Immutable per-run generation configuration.
///
/// Aggregates the sampling knobs, context/batch sizing, device placement
/// hints consumed by the executor, and speculative-decoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// RNG seed; each sequence derives its private seed as
    /// `seed + sequence index`.
    pub seed: u64,
    /// Context window in tokens.
    pub n_ctx: usize,
    /// Logical batch capacity (max entries per forward pass).
    pub n_batch: usize,
    /// Physical batch size hint for the executor.
    pub n_ubatch: usize,
    /// Number of sequences decoded in parallel.
    pub n_parallel: usize,
    /// New tokens to generate per sequence (`None` = unlimited).
    pub n_predict: Option<usize>,
    /// Group-attention factor (executor hint).
    pub grp_attn_n: usize,
    /// Group-attention width (executor hint).
    pub grp_attn_w: usize,
    /// KV cache defragmentation threshold (`None` = never defragment).
    pub defrag_threshold: Option<f32>,
    /// How to split the model across devices.
    pub split_mode: SplitMode,
    /// Device used for scratch and small tensors.
    pub main_gpu: usize,
    /// Per-device tensor split ratios, one entry per detected device.
    pub tensor_split: Vec<f32>,
    /// Embedding pooling selector (executor hint).
    pub pooling_type: PoolingType,
    /// RoPE scaling selector (executor hint).
    pub rope_scaling_type: RopeScalingType,
    /// Target model path.
    pub model: String,
    /// Keep sampling past an end-of-sequence token.
    pub ignore_eos: bool,
    /// Sampling parameters.
    pub sampling: SamplingParams,
    /// Speculative decoding; `None` disables the draft model.
    pub speculative: Option<SpeculativeConfig>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 0xDEAD_BEEF,
            n_ctx: 512,
            n_batch: 2048,
            n_ubatch: 512,
            n_parallel: 1,
            n_predict: None,
            grp_attn_n: 1,
            grp_attn_w: 512,
            defrag_threshold: None,
            split_mode: SplitMode::default(),
            main_gpu: 0,
            tensor_split: Vec::new(),
            pooling_type: PoolingType::default(),
            rope_scaling_type: RopeScalingType::default(),
            model: "models/7B/model.gguf".to_string(),
            ignore_eos: false,
            sampling: SamplingParams::default(),
            speculative: None,
        }
    }
}

impl GenerationConfig {
    /// Effective repetition-penalty window: `repeat_last_n < 0` means the
    /// whole context.
    pub fn penalty_window(&self) -> usize {
        match self.sampling.repeat_last_n {
            n if n < 0 => self.n_ctx,
            n => n as usize,
        }
    }

    /// Private RNG seed for a sequence, stable regardless of worker
    /// scheduling order.
    pub fn sequence_seed(&self, seq_index: u64) -> u64 {
        self.seed.wrapping_add(seq_index)
    }
}
