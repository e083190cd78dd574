use std::fmt;

use serde::{Deserialize, Serialize};

const METAL: &str = "XAU/USD";

/// A tradable symbol in `BASE/QUOTE` form, e.g. `EUR/USD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_metal(&self) -> bool {
        self.0 == METAL
    }

    pub fn is_yen_quoted(&self) -> bool {
        self.0.contains("JPY")
    }

    /// Price units per pip: 100 for yen pairs and gold, 10000 otherwise.
    pub fn pip_scale(&self) -> f64 {
        if self.is_yen_quoted() || self.is_metal() {
            100.0
        } else {
            10_000.0
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Instrument {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
