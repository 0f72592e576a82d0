// Copyright (c) 2023 Mike Tsao. All rights reserved.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, collections::HashMap, sync::OnceLock};
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter, FromRepr, IntoStaticStr};

/// A key into the flat parameter address space.
///
/// Ids 1 through 99 are global parameters. Above that, each
/// [ParameterClass] owns a block of [ParameterClass::INSTANCES] instances,
/// each [ParameterClass::STRIDE] ids wide, so that "parameter X of
/// oscillator N" is `base + N * stride + X`. [Parameter::NONE] means "no
/// parameter."
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Parameter(pub i32);

/// The complete state of an instrument. Absent keys mean "use the
/// instrument's default."
pub type ParametersValues = BTreeMap<Parameter, f32>;

#[allow(missing_docs)]
impl Parameter {
    pub const NONE: Parameter = Parameter(0);

    pub const GROUP: Parameter = Parameter(1);
    pub const BANK: Parameter = Parameter(2);
    pub const PATCH: Parameter = Parameter(3);
    pub const MODULATION_WHEEL: Parameter = Parameter(4);
    pub const MODULATION_WHEEL_RANGE: Parameter = Parameter(5);
    pub const MODULATION_WHEEL_PITCH: Parameter = Parameter(6);
    pub const MODULATION_WHEEL_AMP: Parameter = Parameter(7);
    pub const MODULATION_WHEEL_ENV: Parameter = Parameter(8);
    pub const AFTERTOUCH_RANGE: Parameter = Parameter(9);
    pub const AFTERTOUCH_PITCH: Parameter = Parameter(10);
    pub const AFTERTOUCH_AMP: Parameter = Parameter(11);
    pub const AFTERTOUCH_ENV: Parameter = Parameter(12);
    pub const PITCH_BEND: Parameter = Parameter(13);
    pub const PITCH_BEND_STEP: Parameter = Parameter(14);
    pub const PITCH_BEND_UP: Parameter = Parameter(15);
    pub const PITCH_BEND_DOWN: Parameter = Parameter(16);
    pub const MONO: Parameter = Parameter(17);
    pub const PORTAMENTO: Parameter = Parameter(18);
    pub const TUNING: Parameter = Parameter(19);
    pub const ACCENT: Parameter = Parameter(21);
    pub const VOLUME: Parameter = Parameter(22);

    /// One past the highest id in the address space.
    pub const COUNT: i32 = ParameterClass::Filter.base() + ParameterClass::SPAN;

    const GLOBALS: [(Parameter, &'static str); 21] = [
        (Self::GROUP, "Group"),
        (Self::BANK, "Bank"),
        (Self::PATCH, "Patch"),
        (Self::MODULATION_WHEEL, "ModulationWheel"),
        (Self::MODULATION_WHEEL_RANGE, "ModulationWheelRange"),
        (Self::MODULATION_WHEEL_PITCH, "ModulationWheelPitch"),
        (Self::MODULATION_WHEEL_AMP, "ModulationWheelAmp"),
        (Self::MODULATION_WHEEL_ENV, "ModulationWheelEnv"),
        (Self::AFTERTOUCH_RANGE, "AftertouchRange"),
        (Self::AFTERTOUCH_PITCH, "AftertouchPitch"),
        (Self::AFTERTOUCH_AMP, "AftertouchAmp"),
        (Self::AFTERTOUCH_ENV, "AftertouchEnv"),
        (Self::PITCH_BEND, "PitchBend"),
        (Self::PITCH_BEND_STEP, "PitchBendStep"),
        (Self::PITCH_BEND_UP, "PitchBendUp"),
        (Self::PITCH_BEND_DOWN, "PitchBendDown"),
        (Self::MONO, "Mono"),
        (Self::PORTAMENTO, "Portamento"),
        (Self::TUNING, "Tuning"),
        (Self::ACCENT, "Accent"),
        (Self::VOLUME, "Volume"),
    ];

    /// Addresses parameter `offset` of instance `index` of `class`.
    pub const fn of(class: ParameterClass, index: usize, offset: i32) -> Parameter {
        Parameter(class.base() + index as i32 * ParameterClass::STRIDE + offset)
    }

    /// The first id of instance `index` of `class`.
    pub fn class_base(class: ParameterClass, index: usize) -> Parameter {
        debug_assert!(index < ParameterClass::INSTANCES);
        Self::of(class, index, 0)
    }

    pub const fn osc(index: usize, p: OscParameter) -> Parameter {
        Self::of(ParameterClass::Osc, index, p as i32)
    }
    pub const fn lfo(index: usize, p: LfoParameter) -> Parameter {
        Self::of(ParameterClass::Lfo, index, p as i32)
    }
    pub const fn env(index: usize, p: EnvParameter) -> Parameter {
        Self::of(ParameterClass::Env, index, p as i32)
    }
    pub const fn filter(index: usize, p: FilterParameter) -> Parameter {
        Self::of(ParameterClass::Filter, index, p as i32)
    }

    /// If this id lives in a class block, returns the class, the instance
    /// index, and the offset within the instance.
    pub fn classify(&self) -> Option<(ParameterClass, usize, i32)> {
        ParameterClass::ALL.into_iter().find_map(|class| {
            let base = class.base();
            if self.0 > base && self.0 < base + ParameterClass::SPAN {
                let distance = self.0 - base;
                let index = distance / ParameterClass::STRIDE;
                Some((class, index as usize, distance - index * ParameterClass::STRIDE))
            } else {
                None
            }
        })
    }

    pub fn as_osc(&self) -> Option<(usize, OscParameter)> {
        match self.classify() {
            Some((ParameterClass::Osc, index, offset)) => {
                OscParameter::from_repr(offset).map(|p| (index, p))
            }
            _ => None,
        }
    }
    pub fn as_lfo(&self) -> Option<(usize, LfoParameter)> {
        match self.classify() {
            Some((ParameterClass::Lfo, index, offset)) => {
                LfoParameter::from_repr(offset).map(|p| (index, p))
            }
            _ => None,
        }
    }
    pub fn as_env(&self) -> Option<(usize, EnvParameter)> {
        match self.classify() {
            Some((ParameterClass::Env, index, offset)) => {
                EnvParameter::from_repr(offset).map(|p| (index, p))
            }
            _ => None,
        }
    }
    pub fn as_filter(&self) -> Option<(usize, FilterParameter)> {
        match self.classify() {
            Some((ParameterClass::Filter, index, offset)) => {
                FilterParameter::from_repr(offset).map(|p| (index, p))
            }
            _ => None,
        }
    }

    /// The stable name used in presets, or `None` if this id has no name.
    pub fn name(&self) -> Option<String> {
        if let Some((class, index, offset)) = self.classify() {
            let stem: Option<&'static str> = match class {
                ParameterClass::Osc => OscParameter::from_repr(offset).map(|p| p.into()),
                ParameterClass::Lfo => LfoParameter::from_repr(offset).map(|p| p.into()),
                ParameterClass::Env => EnvParameter::from_repr(offset).map(|p| p.into()),
                ParameterClass::Filter => FilterParameter::from_repr(offset)
                    .filter(|p| p.is_named())
                    .map(|p| p.into()),
            };
            stem.map(|stem| format!("{class}{stem}_{index}"))
        } else {
            Self::GLOBALS
                .iter()
                .find(|(p, _)| p == self)
                .map(|(_, name)| name.to_string())
        }
    }

    /// Looks up a parameter by its stable name. Unknown names produce
    /// [Parameter::NONE].
    pub fn from_name(name: &str) -> Parameter {
        static NAMES: OnceLock<HashMap<String, Parameter>> = OnceLock::new();
        NAMES
            .get_or_init(|| {
                Self::all_named()
                    .into_iter()
                    .filter_map(|p| p.name().map(|n| (n, p)))
                    .collect()
            })
            .get(name)
            .copied()
            .unwrap_or(Self::NONE)
    }

    /// Every id in the address space that has a name.
    pub fn all_named() -> Vec<Parameter> {
        (0..Self::COUNT)
            .map(Parameter)
            .filter(|p| p.name().is_some())
            .collect()
    }
}
impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(&name),
            None => write!(f, "[Unknown Parameter {}]", self.0),
        }
    }
}

/// The families of per-instance parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter, EnumCountMacro)]
pub enum ParameterClass {
    #[allow(missing_docs)]
    Osc,
    #[allow(missing_docs)]
    Lfo,
    #[allow(missing_docs)]
    Env,
    #[allow(missing_docs)]
    Filter,
}
impl ParameterClass {
    /// Ids reserved per instance.
    pub const STRIDE: i32 = 100;
    /// Instances per class.
    pub const INSTANCES: usize = 10;
    const SPAN: i32 = Self::STRIDE * Self::INSTANCES as i32;
    const ALL: [ParameterClass; 4] = [Self::Osc, Self::Lfo, Self::Env, Self::Filter];

    /// The id just below the class's first parameter.
    pub const fn base(&self) -> i32 {
        match self {
            ParameterClass::Osc => 1000,
            ParameterClass::Lfo => 1000 + Self::SPAN,
            ParameterClass::Env => 1000 + 2 * Self::SPAN,
            ParameterClass::Filter => 1000 + 3 * Self::SPAN,
        }
    }
}

#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(i32)]
pub enum OscParameter {
    Kind = 1,
    Detune = 2,
    Volume = 3,
}

#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(i32)]
pub enum LfoParameter {
    Kind = 1,
    Frequency = 2,
    Amplitude = 3,
    Pitch = 4,
}

#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(i32)]
pub enum EnvParameter {
    Attack = 1,
    Decay = 2,
    Sustain = 3,
    Release = 4,
    Mod = 5,
}

#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(i32)]
pub enum FilterParameter {
    Kind = 1,
    Cutoff = 2,
    Resonance = 3,
    Drive = 4,
    Track = 5,
}
impl FilterParameter {
    // Drive and Track are addressable but never persisted.
    fn is_named(&self) -> bool {
        matches!(self, Self::Kind | Self::Cutoff | Self::Resonance)
    }
}
