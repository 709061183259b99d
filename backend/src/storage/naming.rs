use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Mutex;

const UNKNOWN: &str = "unknown";
const FALLBACK_EXTENSION: &str = "bin";
const TOKEN_LEN: usize = 6;
const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Object path of an uploaded image: `{device}/{label}/{millis}-{token}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadKey(String);

impl UploadKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Builds storage keys from a clock and a random token. Keys are unique only
/// statistically; nothing checks for collisions.
pub struct UploadNamer {
    clock: Clock,
    rng: Mutex<StdRng>,
}

impl Default for UploadNamer {
    fn default() -> Self {
        Self {
            clock: Box::new(|| chrono::Utc::now().timestamp_millis()),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl UploadNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock_and_seed<F>(clock: F, seed: u64) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        Self {
            clock: Box::new(clock),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn make_key(
        &self,
        original_file_name: &str,
        predicted_label: &str,
        device_id: Option<&str>,
    ) -> UploadKey {
        let millis = (self.clock)();
        let token = self.random_token();
        UploadKey(format!(
            "{}/{}/{}-{}.{}",
            device_slug(device_id),
            label_slug(predicted_label),
            millis,
            token,
            file_extension(original_file_name),
        ))
    }

    fn random_token(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (0..TOKEN_LEN)
            .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
            .collect()
    }
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

/// Lowercases and strips everything outside `[a-z0-9-]`.
pub fn label_slug(label: &str) -> String {
    let slug: String = label.to_lowercase().chars().filter(|&c| is_slug_char(c)).collect();
    if slug.is_empty() { UNKNOWN.to_string() } else { slug }
}

/// Lowercased device id, or `"unknown"` as soon as a single character falls
/// outside `[a-z0-9-]`.
pub fn device_slug(device_id: Option<&str>) -> String {
    let lowered = device_id.unwrap_or_default().trim().to_lowercase();
    if lowered.is_empty() || !lowered.chars().all(is_slug_char) {
        UNKNOWN.to_string()
    } else {
        lowered
    }
}

/// Text after the last `.`, lowercased. Names without a usable extension get `bin`.
pub fn file_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            ext.to_ascii_lowercase()
        }
        _ => FALLBACK_EXTENSION.to_string(),
    }
}
