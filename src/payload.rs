use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Inclusive bounds for integer draws (`id` and the unstructured sample).
pub const INT_MIN: u32 = 1;
pub const INT_MAX: u32 = 100;

/// Half-open bounds for the structured `value` field.
pub const VALUE_MIN: f64 = 1.0;
pub const VALUE_MAX: f64 = 100.0;

/// Source of randomness the generators draw from.
pub trait RandomSource: Send {
    /// Uniform integer in `[INT_MIN, INT_MAX]`.
    fn next_int(&mut self) -> u32;
    /// Uniform float in `[VALUE_MIN, VALUE_MAX)`.
    fn next_value(&mut self) -> f64;
}

/// Production random source backed by `StdRng`.
pub struct RngSource {
    rng: StdRng,
}

impl RngSource {
    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic source for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Self::seeded(s),
            None => Self::from_os_rng(),
        }
    }
}

impl RandomSource for RngSource {
    fn next_int(&mut self) -> u32 {
        self.rng.random_range(INT_MIN..=INT_MAX)
    }

    fn next_value(&mut self) -> f64 {
        self.rng.random_range(VALUE_MIN..VALUE_MAX)
    }
}

/// Two-field record published to the structured topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredSample {
    pub id: u32,
    pub value: f64,
}

/// Plain integer rendered as decimal text.
pub fn generate_unstructured<S: RandomSource + ?Sized>(source: &mut S) -> Bytes {
    Bytes::from(source.next_int().to_string())
}

/// JSON object `{"id":..,"value":..}`; `id` is drawn before `value`.
pub fn generate_structured<S: RandomSource + ?Sized>(
    source: &mut S,
) -> Result<Bytes, serde_json::Error> {
    let id = source.next_int();
    let value = source.next_value();
    let encoded = serde_json::to_vec(&StructuredSample { id, value })?;
    Ok(Bytes::from(encoded))
}

/// Parse an unstructured payload back into its integer.
pub fn parse_unstructured(payload: &[u8]) -> Result<u32, String> {
    let text = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
    text.parse::<u32>().map_err(|e| e.to_string())
}

/// Parse a structured payload; rejects extra or missing fields.
pub fn parse_structured(payload: &[u8]) -> Result<StructuredSample, serde_json::Error> {
    serde_json::from_slice(payload)
}
