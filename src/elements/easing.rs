// Copyright (c) 2023 Mike Tsao. All rights reserved.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter, IntoStaticStr};

/// Curves that shape a transition over normalized time. See
/// <https://easings.net/>.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    EnumCountMacro,
    EnumIter,
    IntoStaticStr,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[allow(missing_docs)]
pub enum Easing {
    #[default]
    Linear,
    InSine,
    OutSine,
    InQuad,
    OutQuad,
    InCubic,
    OutCubic,
    InQuart,
    OutQuart,
    InQuint,
    OutQuint,
    InExpo,
    OutExpo,
}
impl Easing {
    /// Maps progress `x` in [0.0, 1.0] onto the curve.
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Easing::Linear => x,
            Easing::InSine => 1.0 - ((x * PI) / 2.0).cos(),
            Easing::OutSine => ((x * PI) / 2.0).sin(),
            Easing::InQuad => ease_in_quad(x),
            Easing::OutQuad => 1.0 - (1.0 - x) * (1.0 - x),
            Easing::InCubic => x * x * x,
            Easing::OutCubic => 1.0 - (1.0 - x).powi(3),
            Easing::InQuart => x * x * x * x,
            Easing::OutQuart => 1.0 - (1.0 - x).powi(4),
            Easing::InQuint => x * x * x * x * x,
            Easing::OutQuint => 1.0 - (1.0 - x).powi(5),
            Easing::InExpo => {
                if x > 0.0 {
                    2.0f32.powf(10.0 * x - 10.0)
                } else {
                    0.0
                }
            }
            Easing::OutExpo => {
                if x < 1.0 {
                    1.0 - 2.0f32.powf(-10.0 * x)
                } else {
                    1.0
                }
            }
        }
    }
}

/// Quadratic ease-in. The filters use it directly to spread cutoff knob
/// travel more evenly across octaves.
pub fn ease_in_quad(x: f32) -> f32 {
    x * x
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn curves_hit_their_endpoints() {
        for easing in Easing::iter() {
            assert!(
                approx_eq!(f32, easing.apply(0.0), 0.0, epsilon = 0.001),
                "{easing} should start at zero"
            );
            assert!(
                approx_eq!(f32, easing.apply(1.0), 1.0, epsilon = 0.001),
                "{easing} should end at one"
            );
        }
    }

    #[test]
    fn in_and_out_bend_opposite_ways() {
        assert!(Easing::InQuad.apply(0.5) < 0.5);
        assert!(Easing::OutQuad.apply(0.5) > 0.5);
        assert_eq!(Easing::Linear.apply(0.3), 0.3);
    }
}
