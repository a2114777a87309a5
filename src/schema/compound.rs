//! Compound catalogue types: compounds, fingerprints and structural counts.

use serde::{Deserialize, Serialize};

/// A catalogue compound.
///
/// Compounds are immutable once stored. The structure key (an InChI key in
/// practice) is unique across a catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compound {
    /// Unique canonical structure identifier.
    pub key: String,
    /// Canonical structure string (e.g. InChI).
    pub structure: String,
    /// Molecular formula.
    pub formula: String,
    /// Number of atoms.
    pub num_atoms: u32,
    /// Number of bonds.
    pub num_bonds: u32,
    /// Number of rings.
    pub num_rings: u32,
    /// Solubility (g/L), when known.
    #[serde(default)]
    pub solubility: Option<f64>,
    /// Rendered structure payload (e.g. SVG), when available.
    #[serde(default)]
    pub rendered: Option<String>,
    /// Whether the compound may be proposed as an analogue.
    #[serde(default)]
    pub analogue_candidate: bool,
    /// Free-text names.
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// External database citations as `namespace:identifier`.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Compound {
    /// Atom, bond and ring counts.
    pub fn counts(&self) -> StructureCounts {
        StructureCounts {
            atoms: self.num_atoms,
            bonds: self.num_bonds,
            rings: self.num_rings,
        }
    }

    /// Check whether the compound carries the given reference.
    pub fn has_reference(&self, reference: &str) -> bool {
        self.references.iter().any(|r| r == reference)
    }
}

/// Atom/bond/ring counts of a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructureCounts {
    pub atoms: u32,
    pub bonds: u32,
    pub rings: u32,
}

/// Solubility classes used to restrict analogue candidates.
///
/// Thresholds are in g/L: high >= 10, medium in [0.1, 10), low < 0.1.
/// Compounds with unknown solubility only pass `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolubilityClass {
    #[default]
    All,
    High,
    Medium,
    Low,
}

impl SolubilityClass {
    /// Check whether a solubility value falls in this class.
    pub fn admits(&self, solubility: Option<f64>) -> bool {
        match (self, solubility) {
            (SolubilityClass::All, _) => true,
            (_, None) => false,
            (SolubilityClass::High, Some(s)) => s >= 10.0,
            (SolubilityClass::Medium, Some(s)) => (0.1..10.0).contains(&s),
            (SolubilityClass::Low, Some(s)) => s < 0.1,
        }
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// A molecular fingerprint under a named scheme ("maccs", "morgan", ...).
///
/// Bits are packed into `u64` words, least significant bit first. The
/// serialized form is the scheme name plus a `'0'/'1'` bit string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FingerprintRepr", into = "FingerprintRepr")]
pub struct Fingerprint {
    scheme: String,
    words: Vec<u64>,
    len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FingerprintRepr {
    scheme: String,
    bits: String,
}

impl Fingerprint {
    /// Parse a fingerprint from a bit string such as `"1010"`.
    pub fn from_bit_string(scheme: &str, bits: &str) -> Result<Self, FingerprintError> {
        let len = bits.len();
        let mut words = vec![0u64; len.div_ceil(64)];
        for (i, c) in bits.chars().enumerate() {
            match c {
                '1' => words[i / 64] |= 1 << (i % 64),
                '0' => {}
                other => {
                    return Err(FingerprintError::InvalidBit {
                        position: i,
                        found: other,
                    });
                }
            }
        }
        Ok(Self {
            scheme: scheme.to_string(),
            words,
            len,
        })
    }

    /// Build a fingerprint of `len` bits with the given positions set.
    pub fn from_indices(scheme: &str, len: usize, indices: &[usize]) -> Result<Self, FingerprintError> {
        let mut words = vec![0u64; len.div_ceil(64)];
        for &i in indices {
            if i >= len {
                return Err(FingerprintError::IndexOutOfRange { index: i, len });
            }
            words[i / 64] |= 1 << (i % 64);
        }
        Ok(Self {
            scheme: scheme.to_string(),
            words,
            len,
        })
    }

    /// Fingerprint scheme name.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Packed words.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Render as a `'0'/'1'` bit string.
    pub fn to_bit_string(&self) -> String {
        (0..self.len)
            .map(|i| {
                if self.words[i / 64] >> (i % 64) & 1 == 1 {
                    '1'
                } else {
                    '0'
                }
            })
            .collect()
    }
}

impl TryFrom<FingerprintRepr> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(repr: FingerprintRepr) -> Result<Self, Self::Error> {
        Fingerprint::from_bit_string(&repr.scheme, &repr.bits)
    }
}

impl From<Fingerprint> for FingerprintRepr {
    fn from(fp: Fingerprint) -> Self {
        FingerprintRepr {
            bits: fp.to_bit_string(),
            scheme: fp.scheme,
        }
    }
}

/// Fingerprint construction errors.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("Invalid character '{found}' at bit {position} (expected '0' or '1')")]
    InvalidBit { position: usize, found: char },
    #[error("Bit index {index} out of range for a {len}-bit fingerprint")]
    IndexOutOfRange { index: usize, len: usize },
}
