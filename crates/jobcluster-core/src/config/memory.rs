use std::fmt::{Display, Formatter};

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// A process memory budget in bytes. Parsed from `<n>[unit]` with binary units;
/// a bare number is a byte count.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemorySize(u64);

impl MemorySize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_mebibytes(mebibytes: u64) -> Self {
        Self(mebibytes * MIB)
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn mebibytes(self) -> u64 {
        self.0 / MIB
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.starts_with('-') {
            return Err(format!("memory size '{raw}' must not be negative"));
        }

        let split = trimmed
            .find(|character: char| !character.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        if digits.is_empty() {
            return Err(format!("memory size '{raw}' does not start with a number"));
        }

        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("memory size '{raw}' is out of range"))?;
        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" | "bytes" => 1,
            "k" | "kb" | "kibibytes" => KIB,
            "m" | "mb" | "mebibytes" => MIB,
            "g" | "gb" | "gibibytes" => GIB,
            "t" | "tb" | "tebibytes" => TIB,
            other => return Err(format!("unknown memory unit '{other}' in '{raw}'")),
        };

        amount
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| format!("memory size '{raw}' is out of range"))
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0 != 0 && self.0 % MIB == 0 {
            write!(f, "{}m", self.0 / MIB)
        } else {
            write!(f, "{}b", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySize;

    #[test]
    fn parses_binary_units() {
        assert_eq!(MemorySize::parse("768m").unwrap().mebibytes(), 768);
        assert_eq!(MemorySize::parse("1g").unwrap().mebibytes(), 1024);
        assert_eq!(MemorySize::parse("1 GB").unwrap().mebibytes(), 1024);
        assert_eq!(MemorySize::parse("2048kb").unwrap().mebibytes(), 2);
        assert_eq!(MemorySize::parse("4096").unwrap().bytes(), 4096);
    }

    #[test]
    fn rejects_negative_and_malformed_sizes() {
        assert!(MemorySize::parse("-1g").is_err());
        assert!(MemorySize::parse("g").is_err());
        assert!(MemorySize::parse("12 parsecs").is_err());
        assert!(MemorySize::parse("99999999999t").is_err());
    }

    #[test]
    fn displays_whole_mebibytes_compactly() {
        assert_eq!(MemorySize::from_mebibytes(1024).to_string(), "1024m");
        assert_eq!(MemorySize::from_bytes(100).to_string(), "100b");
    }
}
