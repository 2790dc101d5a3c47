//! Paper sizes accepted by the export stage.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageFormat {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    Tabloid,
}

impl PageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A3 => "A3",
            Self::A4 => "A4",
            Self::A5 => "A5",
            Self::Letter => "Letter",
            Self::Legal => "Legal",
            Self::Tabloid => "Tabloid",
        }
    }

    /// Value for the CSS `@page { size: ... }` descriptor.
    pub fn css_size(self) -> &'static str {
        match self {
            Self::A3 => "A3",
            Self::A4 => "A4",
            Self::A5 => "A5",
            Self::Letter => "letter",
            Self::Legal => "legal",
            Self::Tabloid => "11in 17in",
        }
    }

    /// Parse an optional query value, falling back to A4 when absent or blank.
    pub fn parse_or_default(value: Option<&str>) -> Result<Self, DomainError> {
        match value.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(raw) => raw.parse(),
        }
    }
}

impl Display for PageFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a3" => Ok(Self::A3),
            "a4" => Ok(Self::A4),
            "a5" => Ok(Self::A5),
            "letter" => Ok(Self::Letter),
            "legal" => Ok(Self::Legal),
            "tabloid" => Ok(Self::Tabloid),
            _ => Err(DomainError::validation(format!(
                "unsupported page format `{s}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_format_defaults_to_a4() {
        assert_eq!(PageFormat::parse_or_default(None).unwrap(), PageFormat::A4);
        assert_eq!(
            PageFormat::parse_or_default(Some("  ")).unwrap(),
            PageFormat::A4
        );
    }

    #[test]
    fn format_names_are_case_insensitive() {
        assert_eq!("letter".parse::<PageFormat>().unwrap(), PageFormat::Letter);
        assert_eq!("a5".parse::<PageFormat>().unwrap(), PageFormat::A5);
        assert_eq!(" LEGAL ".parse::<PageFormat>().unwrap(), PageFormat::Legal);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = PageFormat::parse_or_default(Some("B7")).unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }
}
