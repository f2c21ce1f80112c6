//! Macro for implementing Display and FromStr for state enums
//!
//! Queue states are persisted as text (SQLite column, JSON snapshot) and
//! shown in diagnostics, so every state enum needs the same pair of
//! conversions. Parsing is case-insensitive; output is always the canonical
//! snake_case spelling.
//!
//! # Example
//!
//! ```rust
//! use offsync_domain::impl_domain_state_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum UploadState {
//!     Queued,
//!     Uploading,
//!     Done,
//! }
//!
//! impl_domain_state_conversions!(UploadState {
//!     Queued => "queued",
//!     Uploading => "uploading",
//!     Done => "done",
//! });
//!
//! assert_eq!(UploadState::Uploading.to_string(), "uploading");
//! assert_eq!("DONE".parse::<UploadState>(), Ok(UploadState::Done));
//! ```

/// Implements Display and FromStr for a fieldless state enum.
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their stored spelling
///
/// Unknown input yields `Err(String)` naming the enum and the rejected value.
#[macro_export]
macro_rules! impl_domain_state_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ProbeState {
        Unknown,
        Reachable,
        TimedOut,
    }

    impl_domain_state_conversions!(ProbeState {
        Unknown => "unknown",
        Reachable => "reachable",
        TimedOut => "timed_out",
    });

    #[test]
    fn display_uses_canonical_spelling() {
        assert_eq!(ProbeState::Unknown.to_string(), "unknown");
        assert_eq!(ProbeState::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn parsing_ignores_case_and_surrounding_whitespace() {
        assert_eq!(ProbeState::from_str("REACHABLE").unwrap(), ProbeState::Reachable);
        assert_eq!(ProbeState::from_str(" Timed_Out ").unwrap(), ProbeState::TimedOut);
    }

    #[test]
    fn unknown_values_are_rejected_with_enum_name() {
        let err = ProbeState::from_str("flaky").unwrap_err();
        assert!(err.contains("Invalid ProbeState: flaky"));
        assert!(ProbeState::from_str("").is_err());
    }
}
