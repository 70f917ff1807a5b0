//! Mobile profile: a rendering-time overlay, never part of the canonical spec.

use serde::{Deserialize, Serialize};

use super::spec::{Orientation, Viewport};

/// Device adaptation applied when previewing or exporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileProfile {
    pub target_device: TargetDevice,
    pub control_scheme: ControlScheme,
    pub orientation: Orientation,
    #[serde(default)]
    pub haptic_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetDevice {
    Phone,
    Tablet,
}

impl TargetDevice {
    /// Logical viewport for the device held in the given orientation.
    pub fn viewport(self, orientation: Orientation) -> Viewport {
        let (short, long) = match self {
            Self::Phone => (360, 640),
            Self::Tablet => (768, 1024),
        };
        let (width, height) = match orientation {
            Orientation::Landscape => (long, short),
            Orientation::Portrait | Orientation::Default => (short, long),
        };
        Viewport {
            width,
            height,
            user_scalable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlScheme {
    /// Touch the screen where the character should go.
    TouchDirect,

    /// On-screen directional pad plus an action button.
    VirtualDpad,

    None,
}

impl ControlScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TouchDirect => "touch_direct",
            Self::VirtualDpad => "virtual_dpad",
            Self::None => "none",
        }
    }
}
