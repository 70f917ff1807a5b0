//! Mobile profile transform: derives a device-adapted, preview-only specification.
//!
//! The result carries the same version as its input and is tagged with the
//! profile, which keeps it out of the session store. Overlay controls are
//! marked with [`OVERLAY_MARKER`] so that a second application strips and
//! rebuilds exactly what the first one added.

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{
    BehaviorKind, ControlScheme, EventRule, GameObject, GameSpecification, Instruction,
    MobileProfile, ObjectKind, PropertyValue, ResolutionMode, Scene,
};

/// Property set on every injected control, holding the scheme that made it.
pub const OVERLAY_MARKER: &str = "mobileOverlay";

/// Smallest comfortable touch target, in logical pixels.
pub const MIN_TOUCH_SIZE: f64 = 44.0;

/// Haptic pulse length for control feedback, in milliseconds.
const HAPTIC_PULSE_MS: &str = "30";

/// One on-screen control the scheme needs in each scene.
struct Control {
    base_name: &'static str,
    role: &'static str,
    anchor: &'static str,
}

fn controls_for(scheme: ControlScheme) -> &'static [Control] {
    match scheme {
        ControlScheme::VirtualDpad => &[
            Control {
                base_name: "MobileDpad",
                role: "dpad",
                anchor: "bottomLeft",
            },
            Control {
                base_name: "MobileActionA",
                role: "action",
                anchor: "bottomRight",
            },
        ],
        ControlScheme::TouchDirect => &[Control {
            base_name: "MobileTouchZone",
            role: "touchZone",
            anchor: "fullScreen",
        }],
        ControlScheme::None => &[],
    }
}

/// Apply `profile` to `spec`. The input is left untouched.
pub fn transform(spec: &GameSpecification, profile: &MobileProfile) -> GameSpecification {
    let mut derived = spec.clone();

    let properties = &mut derived.properties;
    properties.orientation = profile.orientation;
    properties.resolution_mode = ResolutionMode::AdaptWidth;
    properties.viewport = Some(profile.target_device.viewport(profile.orientation));
    derived.overlay = Some(*profile);

    for scene in &mut derived.scenes {
        if let Some(adapted) = adapt_scene(scene, profile) {
            *scene = Arc::new(adapted);
        }
    }
    derived
}

/// The adapted scene, or `None` when there is nothing to strip or add.
fn adapt_scene(scene: &Scene, profile: &MobileProfile) -> Option<Scene> {
    let has_overlay = scene.objects().any(is_overlay);
    let controls = controls_for(profile.control_scheme);
    if !has_overlay && controls.is_empty() {
        return None;
    }

    let mut adapted = scene.clone();
    strip_overlay(&mut adapted);

    let controllable: Vec<(String, BehaviorKind)> = adapted
        .objects()
        .filter_map(|o| {
            o.behaviors()
                .iter()
                .find(|b| b.kind.is_controllable())
                .map(|b| (o.name().to_string(), b.kind.clone()))
        })
        .collect();

    let mut taken: HashSet<String> = adapted.objects().map(|o| o.name().to_string()).collect();
    for control in controls {
        if adapted.objects().any(|o| serves_role(o, control.role)) {
            continue;
        }
        let name = unique_name(control.base_name, &taken);
        taken.insert(name.clone());

        adapted
            .objects
            .push(Arc::new(control_object(&name, control, profile)));
        for (target, kind) in &controllable {
            adapted
                .events
                .push(control_rule(&name, control.role, target, kind, profile));
        }
    }
    Some(adapted)
}

fn is_overlay(object: &GameObject) -> bool {
    object.kind() == ObjectKind::TouchControl && object.property(OVERLAY_MARKER).is_some()
}

/// A hand-placed control that already does this job.
fn serves_role(object: &GameObject, role: &str) -> bool {
    object.kind() == ObjectKind::TouchControl
        && object.property("control").and_then(PropertyValue::as_text) == Some(role)
}

/// Removes previously injected controls and every rule that mentions them.
fn strip_overlay(scene: &mut Scene) {
    let injected: HashSet<String> = scene
        .objects()
        .filter(|o| is_overlay(o))
        .map(|o| o.name().to_string())
        .collect();
    if injected.is_empty() {
        return;
    }

    scene.objects.retain(|o| !injected.contains(o.name()));
    scene.events.retain(|rule| {
        !rule
            .instructions()
            .any(|i| i.object.as_ref().is_some_and(|o| injected.contains(o)))
    });
}

fn unique_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..=taken.len() + 2)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn control_object(name: &str, control: &Control, profile: &MobileProfile) -> GameObject {
    let mut object = GameObject::new(name, ObjectKind::TouchControl);
    let properties = [
        (OVERLAY_MARKER, PropertyValue::from(profile.control_scheme.as_str())),
        ("control", PropertyValue::from(control.role)),
        ("anchor", PropertyValue::from(control.anchor)),
        ("layer", PropertyValue::from("MobileUI")),
        ("minTouchSize", PropertyValue::from(MIN_TOUCH_SIZE)),
        ("haptics", PropertyValue::from(profile.haptic_enabled)),
    ];
    object.properties = properties
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    object
}

/// Wires a control to a player-driven object.
fn control_rule(
    control: &str,
    role: &str,
    target: &str,
    kind: &BehaviorKind,
    profile: &MobileProfile,
) -> EventRule {
    let (condition, action) = match role {
        "dpad" => (
            Instruction::new("DpadDirectionHeld").on_object(control),
            Instruction::new("SimulateDirection").on_object(target),
        ),
        "action" => {
            let key = if *kind == BehaviorKind::PlatformerObject {
                "Jump"
            } else {
                "Action"
            };
            (
                Instruction::new("ButtonPressed").on_object(control),
                Instruction::new("SimulateControl")
                    .on_object(target)
                    .with_parameter(key),
            )
        }
        _ => (
            Instruction::new("TouchHeld").on_object(control),
            Instruction::new("MoveTowardTouch").on_object(target),
        ),
    };

    let mut actions = vec![action];
    if profile.haptic_enabled {
        actions.push(
            Instruction::new("Vibrate")
                .on_object(control)
                .with_parameter(HAPTIC_PULSE_MS),
        );
    }
    EventRule {
        conditions: vec![condition],
        actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::edit;
    use crate::model::{EditOperation, Orientation, TargetDevice};
    use crate::validate::{self, Limits};

    fn profile(scheme: ControlScheme, haptic_enabled: bool) -> MobileProfile {
        MobileProfile {
            target_device: TargetDevice::Phone,
            control_scheme: scheme,
            orientation: Orientation::Landscape,
            haptic_enabled,
        }
    }

    fn platformer() -> GameSpecification {
        edit::apply(
            &GameSpecification::new("Jumper"),
            &[
                EditOperation::add_scene("Level1"),
                EditOperation::add_object("Level1", "Player", ObjectKind::Sprite),
                EditOperation::add_behavior("Level1", "Player", BehaviorKind::PlatformerObject),
                EditOperation::add_scene("Menu"),
            ],
            &Limits::default(),
        )
        .unwrap()
    }

    #[test]
    fn injects_dpad_and_rules() {
        let spec = platformer();
        let derived = transform(&spec, &profile(ControlScheme::VirtualDpad, false));

        assert!(derived.is_derived());
        assert_eq!(derived.version(), spec.version());
        assert_eq!(derived.properties().orientation, Orientation::Landscape);
        assert_eq!(derived.properties().resolution_mode, ResolutionMode::AdaptWidth);
        assert_eq!(derived.properties().viewport.unwrap().width, 640);

        let level = derived.scene("Level1").unwrap();
        assert!(level.object("MobileDpad").is_some());
        assert!(level.object("MobileActionA").is_some());
        assert_eq!(level.events().len(), 2);

        let menu = derived.scene("Menu").unwrap();
        assert_eq!(menu.objects().len(), 2);
        assert!(menu.events().is_empty());
    }

    #[test]
    fn leaves_input_untouched() {
        let spec = platformer();
        let before = spec.clone();
        transform(&spec, &profile(ControlScheme::TouchDirect, true));
        assert_eq!(spec, before);
    }

    #[test]
    fn is_idempotent() {
        let spec = platformer();
        for scheme in [
            ControlScheme::VirtualDpad,
            ControlScheme::TouchDirect,
            ControlScheme::None,
        ] {
            for haptics in [false, true] {
                let p = profile(scheme, haptics);
                let once = transform(&spec, &p);
                assert_eq!(transform(&once, &p), once, "{scheme:?} haptics={haptics}");
            }
        }
    }

    #[test]
    fn switching_scheme_replaces_controls() {
        let dpad = transform(&platformer(), &profile(ControlScheme::VirtualDpad, false));
        let touch = transform(&dpad, &profile(ControlScheme::TouchDirect, false));

        let level = touch.scene("Level1").unwrap();
        assert!(level.object("MobileDpad").is_none());
        assert!(level.object("MobileTouchZone").is_some());
        assert_eq!(level.events().len(), 1);
    }

    #[test]
    fn none_scheme_adds_no_controls_and_shares_scenes() {
        let spec = platformer();
        let derived = transform(&spec, &profile(ControlScheme::None, false));

        assert_eq!(derived.object_count(), spec.object_count());
        assert!(GameSpecification::shares_scene(&spec, &derived, "Level1"));
    }

    #[test]
    fn haptics_add_vibration() {
        let derived = transform(&platformer(), &profile(ControlScheme::TouchDirect, true));
        let rule = &derived.scene("Level1").unwrap().events()[0];
        assert!(rule.actions.iter().any(|a| a.kind == "Vibrate"));
    }

    #[test]
    fn avoids_user_object_names_and_roles() {
        let spec = edit::apply(
            &platformer(),
            &[
                EditOperation::add_object("Level1", "MobileDpad", ObjectKind::Sprite),
                EditOperation::add_object("Level1", "Jump", ObjectKind::TouchControl),
                EditOperation::set_property("Level1", "Jump", "control", "action"),
            ],
            &Limits::default(),
        )
        .unwrap();

        let derived = transform(&spec, &profile(ControlScheme::VirtualDpad, false));
        let level = derived.scene("Level1").unwrap();
        assert!(level.object("MobileDpad2").is_some());
        assert!(level.object("MobileActionA").is_none());
    }

    #[test]
    fn derived_spec_still_validates() {
        let derived = transform(&platformer(), &profile(ControlScheme::VirtualDpad, true));
        assert!(validate::validate(&derived, &Limits::default()).is_valid());
    }
}
