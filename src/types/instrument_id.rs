// Copyright (c) 2023 Mike Tsao. All rights reserved.

use serde::{Deserialize, Serialize};
use strum_macros::{
    Display, EnumCount as EnumCountMacro, EnumIter, EnumString, FromRepr, IntoStaticStr,
};

/// Identifies one of the built-in instruments. The numeric values are
/// stable; "no instrument" is expressed as `Option<InstrumentId>`.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    EnumCountMacro,
    EnumIter,
    EnumString,
    FromRepr,
    IntoStaticStr,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum InstrumentId {
    /// The subtractive polysynth.
    SynthMachine = 1,
    /// TR-808/909 style drums.
    DrumMachine = 2,
    /// Six-operator FM.
    Dx7 = 3,
    /// Monophonic acid bass.
    #[strum(serialize = "TB-303")]
    #[serde(rename = "TB-303")]
    Tb303 = 4,
}
impl InstrumentId {
    /// Position of this instrument in a dense array.
    pub fn index(&self) -> usize {
        *self as usize - 1
    }

    /// Parses a stable instrument name like `"TB-303"`.
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// The display name for a raw id, including ids that aren't instruments.
    pub fn name_of(id: i32) -> String {
        match Self::from_repr(id) {
            Some(instrument) => instrument.to_string(),
            None => format!("[Unknown Instrument {id}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn names_round_trip() {
        for id in InstrumentId::iter() {
            assert_eq!(
                InstrumentId::from_name(&id.to_string()),
                Some(id),
                "{id} should round-trip"
            );
        }
        assert_eq!(InstrumentId::Tb303.to_string(), "TB-303");
        assert_eq!(InstrumentId::from_name("Moog"), None);
        assert_eq!(InstrumentId::name_of(0), "[Unknown Instrument 0]");
        assert_eq!(InstrumentId::name_of(3), "Dx7");
    }

    #[test]
    fn dense_indexes() {
        let indexes: Vec<usize> = InstrumentId::iter().map(|i| i.index()).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(
            serde_json::to_string(&InstrumentId::Tb303).ok(),
            Some("\"TB-303\"".to_string())
        );
    }
}
