//! Register value decoding/encoding and read block planning.

use serde::Serialize;

/// Maximum number of points requested in a single read transaction.
pub const MAX_READ_BLOCK: u16 = 125;

/// Interpretation of a single 16-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFormat {
    /// Two's complement signed value (i16) instead of u16.
    pub signed: bool,
    /// Fixed decimal divisor (raw = value * scale).
    pub scale: u16,
}

impl Default for RegisterFormat {
    fn default() -> Self {
        Self {
            signed: false,
            scale: 1,
        }
    }
}

impl RegisterFormat {
    /// Create a new register format.
    pub fn new(signed: bool, scale: u16) -> Self {
        Self { signed, scale }
    }

    fn divisor(&self) -> i64 {
        i64::from(self.scale.max(1))
    }

    /// Smallest user value whose scaled form fits the register.
    pub fn min_value(&self) -> i64 {
        if self.signed {
            // Integer division truncates toward zero, which rounds up here.
            i64::from(i16::MIN) / self.divisor()
        } else {
            0
        }
    }

    /// Largest user value whose scaled form fits the register.
    pub fn max_value(&self) -> i64 {
        let raw_max = if self.signed {
            i64::from(i16::MAX)
        } else {
            i64::from(u16::MAX)
        };
        raw_max / self.divisor()
    }

    /// Decode a raw register into a point value.
    pub fn decode(&self, raw: u16) -> PointValue {
        let value = if self.signed {
            i64::from(raw as i16)
        } else {
            i64::from(raw)
        };

        let divisor = self.divisor();
        if value % divisor == 0 {
            PointValue::Integer(value / divisor)
        } else {
            PointValue::Decimal(value as f64 / divisor as f64)
        }
    }

    /// Encode a user value into a raw register, or `None` if it does not fit.
    pub fn encode(&self, value: i64) -> Option<u16> {
        let raw = value.checked_mul(self.divisor())?;

        if self.signed {
            i16::try_from(raw).ok().map(|v| v as u16)
        } else {
            u16::try_from(raw).ok()
        }
    }
}

/// A decoded register value as reported to HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PointValue {
    /// Value that divided evenly by its scale.
    Integer(i64),
    /// Value with a fractional part.
    Decimal(f64),
}

/// A decoded device information value: an enum label or a plain number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    Label(String),
    Number(PointValue),
}

/// Look up the label for an enumerated register value.
///
/// Returns `None` when the matching entry is `null`, or when `raw` is past
/// the end of `labels` and no `unknown` label is given.
pub fn enum_label(labels: &[Option<String>], unknown: Option<&str>, raw: u16) -> Option<String> {
    match labels.get(usize::from(raw)) {
        Some(label) => label.clone(),
        None => unknown.map(str::to_string),
    }
}

/// A contiguous range of addresses read in one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBlock {
    /// First address of the block.
    pub start: u16,
    /// Number of points in the block.
    pub count: u16,
}

impl ReadBlock {
    /// Index of `address` within the block's response, if it is covered.
    pub fn offset(&self, address: u16) -> Option<usize> {
        let offset = address.checked_sub(self.start)?;
        (offset < self.count).then_some(offset as usize)
    }
}

/// Group addresses into contiguous blocks of at most [`MAX_READ_BLOCK`] points.
///
/// Duplicates are read once. Gaps always start a new block so that no
/// unconfigured address is ever touched.
pub fn read_blocks(addresses: impl IntoIterator<Item = u16>) -> Vec<ReadBlock> {
    let mut sorted: Vec<u16> = addresses.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut blocks: Vec<ReadBlock> = Vec::new();
    for address in sorted {
        match blocks.last_mut() {
            Some(block)
                if block.count < MAX_READ_BLOCK
                    && u32::from(block.start) + u32::from(block.count) == u32::from(address) =>
            {
                block.count += 1;
            }
            _ => blocks.push(ReadBlock {
                start: address,
                count: 1,
            }),
        }
    }

    blocks
}
