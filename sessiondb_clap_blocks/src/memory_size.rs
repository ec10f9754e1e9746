//! Helper types to express memory size.

use std::{str::FromStr, sync::OnceLock};

use sysinfo::System;

/// Memory size.
///
/// # Parsing
/// This can be parsed from strings in one of the following formats:
///
/// - **absolute:** just use a non-negative number to specify the absolute bytes, e.g. `1024`
/// - **relative:** use percentage between 0 and 100 (both inclusive) to specify a relative
///   amount of the totally available memory size, e.g. `50%`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySize(usize);

impl MemorySize {
    /// Number of bytes.
    pub fn bytes(&self) -> usize {
        self.0
    }
}

impl FromStr for MemorySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_suffix('%') {
            Some(s) => {
                let percentage = u64::from_str(s).map_err(|e| e.to_string())?;
                if percentage > 100 {
                    return Err(format!(
                        "relative memory size must be in [0, 100] but is {percentage}"
                    ));
                }
                let total = total_mem_bytes();
                let bytes = (percentage as f64 / 100f64 * total as f64).round() as usize;
                Ok(Self(bytes))
            }
            None => {
                let bytes = usize::from_str(s).map_err(|e| e.to_string())?;
                Ok(Self(bytes))
            }
        }
    }
}

/// Totally available memory size in bytes.
///
/// Sampled once on first use.
pub fn total_mem_bytes() -> usize {
    static TOTAL_MEM_BYTES: OnceLock<usize> = OnceLock::new();

    *TOTAL_MEM_BYTES.get_or_init(|| {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.total_memory() as usize
    })
}
