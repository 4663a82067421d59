//! Cache capacity limits
//!
//! A limit is either an absolute byte count or a percentage of the cache
//! filesystem. Text forms: `"1099511627776"`, `"500GB"`, `"750MiB"`, `"80%"`.

use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CacheLimit {
    Bytes(u64),
    Percent(u8),
}

impl Default for CacheLimit {
    fn default() -> Self {
        CacheLimit::Percent(90)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheLimitError {
    #[error("empty cache limit")]
    Empty,
    #[error("invalid cache limit number: {0}")]
    InvalidNumber(String),
    #[error("unknown size unit: {0}")]
    UnknownUnit(String),
    #[error("percentage must be between 1 and 100, got {0}")]
    PercentOutOfRange(u64),
}

impl CacheLimit {
    /// Limit in bytes for a filesystem of `filesystem_bytes` total size.
    pub fn resolve(&self, filesystem_bytes: u64) -> u64 {
        match self {
            CacheLimit::Bytes(bytes) => *bytes,
            CacheLimit::Percent(pct) => {
                ((filesystem_bytes as u128 * *pct as u128) / 100) as u64
            }
        }
    }
}

impl FromStr for CacheLimit {
    type Err = CacheLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CacheLimitError::Empty);
        }

        if let Some(pct) = s.strip_suffix('%') {
            let value: u64 = pct
                .trim()
                .parse()
                .map_err(|_| CacheLimitError::InvalidNumber(pct.to_string()))?;
            if value == 0 || value > 100 {
                return Err(CacheLimitError::PercentOutOfRange(value));
            }
            return Ok(CacheLimit::Percent(value as u8));
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let number: f64 = number
            .parse()
            .map_err(|_| CacheLimitError::InvalidNumber(number.to_string()))?;

        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" => 1_000,
            "m" | "mb" => 1_000_000,
            "g" | "gb" => 1_000_000_000,
            "t" | "tb" => 1_000_000_000_000,
            "kib" => 1 << 10,
            "mib" => 1 << 20,
            "gib" => 1 << 30,
            "tib" => 1 << 40,
            other => return Err(CacheLimitError::UnknownUnit(other.to_string())),
        };

        Ok(CacheLimit::Bytes((number * multiplier as f64) as u64))
    }
}

impl fmt::Display for CacheLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheLimit::Bytes(bytes) => write!(f, "{}", bytes),
            CacheLimit::Percent(pct) => write!(f, "{}%", pct),
        }
    }
}

impl TryFrom<String> for CacheLimit {
    type Error = CacheLimitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CacheLimit> for String {
    fn from(limit: CacheLimit) -> Self {
        limit.to_string()
    }
}

/// Total size in bytes of the filesystem holding `path`.
pub fn filesystem_size(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: `statvfs` is a plain C struct for which all-zero is valid, and
    // `c_path` outlives the call.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.f_blocks as u64 * stat.f_frsize as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("1024".parse::<CacheLimit>().unwrap(), CacheLimit::Bytes(1024));
        assert_eq!(
            "500GB".parse::<CacheLimit>().unwrap(),
            CacheLimit::Bytes(500_000_000_000)
        );
        assert_eq!(
            "2 GiB".parse::<CacheLimit>().unwrap(),
            CacheLimit::Bytes(2 * (1 << 30))
        );
        assert_eq!(
            "1.5tb".parse::<CacheLimit>().unwrap(),
            CacheLimit::Bytes(1_500_000_000_000)
        );
        assert_eq!("80%".parse::<CacheLimit>().unwrap(), CacheLimit::Percent(80));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<CacheLimit>(), Err(CacheLimitError::Empty));
        assert_eq!(
            "0%".parse::<CacheLimit>(),
            Err(CacheLimitError::PercentOutOfRange(0))
        );
        assert_eq!(
            "120%".parse::<CacheLimit>(),
            Err(CacheLimitError::PercentOutOfRange(120))
        );
        assert!(matches!(
            "12 parsecs".parse::<CacheLimit>(),
            Err(CacheLimitError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(CacheLimit::Bytes(100).resolve(1_000), 100);
        assert_eq!(CacheLimit::Percent(80).resolve(1_000), 800);
    }

    #[test]
    fn test_filesystem_size_of_temp_dir() {
        let temp = tempfile::tempdir().unwrap();
        assert!(filesystem_size(temp.path()).unwrap() > 0);
    }
}
