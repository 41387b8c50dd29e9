//! Diagnostic types and the feed category each one maps to.

use serde::Deserialize;
use thiserror::Error;

/// Upstream diagnostic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[non_exhaustive]
pub enum DiagnosticType {
    /// No type; cannot be tracked.
    #[default]
    None,
    /// J1708 subsystem identifier.
    Sid,
    /// J1708 parameter identifier.
    Pid,
    /// Measurement produced by the telematics device itself.
    GoDiagnostic,
    /// Measurement derived from engine data.
    DataDiagnostic,
    /// J1939 suspect parameter number.
    SuspectParameter,
    /// OBD-II trouble code.
    ObdFault,
    /// Fault raised by the telematics device.
    GoFault,
    /// World-wide harmonised OBD trouble code.
    ObdWwhFault,
    /// Manufacturer-specific fault.
    ProprietaryFault,
    /// Fault from a legacy protocol.
    LegacyFault,
    /// Any type this crate does not know about.
    #[serde(other)]
    Unknown,
}

/// Which feed carries the data for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    /// Fault events from the fault data feed.
    Fault,
    /// Readings from the status data feed.
    Status,
}

/// Raised when a diagnostic type has no feed that carries its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("diagnostic type {diagnostic_type:?} is not carried by any data feed")]
pub struct UnsupportedDiagnosticType {
    /// The offending type.
    pub diagnostic_type: DiagnosticType,
}

impl DiagnosticType {
    /// Map the type onto the feed category that carries it.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleetsync_core::{DiagnosticCategory, DiagnosticType};
    ///
    /// assert_eq!(DiagnosticType::GoFault.category(), Ok(DiagnosticCategory::Fault));
    /// assert!(DiagnosticType::None.category().is_err());
    /// ```
    pub const fn category(self) -> Result<DiagnosticCategory, UnsupportedDiagnosticType> {
        match self {
            Self::Sid
            | Self::Pid
            | Self::SuspectParameter
            | Self::ObdFault
            | Self::GoFault
            | Self::ObdWwhFault
            | Self::ProprietaryFault
            | Self::LegacyFault => Ok(DiagnosticCategory::Fault),
            Self::GoDiagnostic | Self::DataDiagnostic => Ok(DiagnosticCategory::Status),
            Self::None | Self::Unknown => Err(UnsupportedDiagnosticType {
                diagnostic_type: self,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DiagnosticType::Sid, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::Pid, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::SuspectParameter, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::ObdFault, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::GoFault, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::ObdWwhFault, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::ProprietaryFault, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::LegacyFault, DiagnosticCategory::Fault)]
    #[case(DiagnosticType::GoDiagnostic, DiagnosticCategory::Status)]
    #[case(DiagnosticType::DataDiagnostic, DiagnosticCategory::Status)]
    fn maps_supported_types(#[case] ty: DiagnosticType, #[case] expected: DiagnosticCategory) {
        assert_eq!(ty.category(), Ok(expected));
    }

    #[rstest]
    #[case(DiagnosticType::None)]
    #[case(DiagnosticType::Unknown)]
    fn rejects_types_without_a_feed(#[case] ty: DiagnosticType) {
        let err = ty.category().expect_err("type should be unsupported");
        assert_eq!(err.diagnostic_type, ty);
    }

    #[rstest]
    fn unknown_names_deserialise_to_unknown() {
        let parsed: DiagnosticType =
            serde_json::from_str(r#""SomethingNew""#).expect("type should parse");
        assert_eq!(parsed, DiagnosticType::Unknown);
    }
}
