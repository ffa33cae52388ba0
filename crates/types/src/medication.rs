//! Medication names as carried on intake events.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MedicationNameError {
    #[error("medication name is blank")]
    Blank,
}

/// Trimmed, non-blank medication name.
///
/// Prescriptions are counted by distinct name and overdose checks group by it, so a blank name
/// is refused at deserialisation instead of forming a medication of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MedicationName(String);

impl MedicationName {
    pub fn new(name: impl AsRef<str>) -> Result<Self, MedicationNameError> {
        match name.as_ref().trim() {
            "" => Err(MedicationNameError::Blank),
            trimmed => Ok(Self(trimmed.to_owned())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MedicationName {
    type Error = MedicationNameError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<MedicationName> for String {
    fn from(name: MedicationName) -> Self {
        name.0
    }
}

impl std::fmt::Display for MedicationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
