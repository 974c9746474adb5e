use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const PREFIX_LEN: usize = 8;

/// Generates registry keys of the form `<8 lowercase letters>@<unix millis>`.
///
/// The generator owns its random source; share one instance instead of
/// creating one per key.
pub struct KeyGenerator {
    rng: Mutex<StdRng>,
}

impl KeyGenerator {
    /// Seeds from the operating system.
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_os_rng()) }
    }

    /// Reproducible prefixes, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    pub fn generate(&self) -> String {
        let mut key = String::with_capacity(PREFIX_LEN + 1 + 13);
        {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            for _ in 0..PREFIX_LEN {
                key.push(LETTERS[rng.random_range(0..LETTERS.len())] as char);
            }
        }
        key.push('@');
        key.push_str(&unix_millis().to_string());
        key
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

fn unix_millis() -> u128 {
    // a clock before 1970 yields 0 rather than failing key generation
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
