//! Edit interpreter: applies a batch of operations to a specification.
//!
//! A batch runs against a working copy that shares every untouched scene and
//! object with the base. Operations see the effects of earlier operations in
//! the same batch. The first operation that cannot be resolved fails the
//! whole batch and the working copy is dropped.

use std::path::{Component, Path};
use std::sync::Arc;

use serde::Serialize;

use crate::model::{
    Behavior, EditOperation, EventRule, GameObject, GameSpecification, PropertyValue, RefKind,
    Resource, Scene,
};
use crate::validate::{self, Limits, ValidationError, ValidationResult};

pub type Result<T> = std::result::Result<T, EditError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("operation {index}: {target} does not exist")]
    UnresolvedTarget { index: usize, target: String },

    #[error("operation {index}: '{name}' already exists")]
    DuplicateName { index: usize, name: String },

    #[error("operation {index} is malformed: {reason}")]
    MalformedOperation { index: usize, reason: String },

    #[error("the edited game is inconsistent: {}", join(.0))]
    ValidationFailed(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The shape handed back to the chat layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Offending operation, absent when the batch as a whole was invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub kind: &'static str,
    pub reason: String,
}

impl EditError {
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::UnresolvedTarget { index, .. }
            | Self::DuplicateName { index, .. }
            | Self::MalformedOperation { index, .. } => Some(*index),
            Self::ValidationFailed(_) => None,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        let kind = match self {
            Self::UnresolvedTarget { .. } => "unresolvedTarget",
            Self::DuplicateName { .. } => "duplicateName",
            Self::MalformedOperation { .. } => "malformedOperation",
            Self::ValidationFailed(_) => "validationFailed",
        };
        let reason = match self {
            Self::UnresolvedTarget { target, .. } => format!("{target} does not exist"),
            Self::DuplicateName { name, .. } => format!("'{name}' already exists"),
            Self::MalformedOperation { reason, .. } => reason.clone(),
            Self::ValidationFailed(errors) => join(errors),
        };
        ErrorPayload {
            index: self.index(),
            kind,
            reason,
        }
    }
}

/// Why a single operation could not be applied, before its index is known.
#[derive(Debug)]
enum Fault {
    Unresolved(String),
    Duplicate(String),
    Malformed(String),
}

impl Fault {
    fn at(self, index: usize) -> EditError {
        match self {
            Self::Unresolved(target) => EditError::UnresolvedTarget { index, target },
            Self::Duplicate(name) => EditError::DuplicateName { index, name },
            Self::Malformed(reason) => EditError::MalformedOperation { index, reason },
        }
    }
}

/// Apply `ops` in order to `base`, validate, and return the next version.
///
/// `base` is never touched. Given the same inputs the result is identical.
pub fn apply(base: &GameSpecification, ops: &[EditOperation], limits: &Limits) -> Result<GameSpecification> {
    if ops.is_empty() {
        return Err(EditError::MalformedOperation {
            index: 0,
            reason: "the batch contains no operations".into(),
        });
    }

    let mut working = base.clone();
    apply_ops(&mut working, ops)?;

    if let ValidationResult::Invalid(errors) = validate::validate(&working, limits) {
        return Err(EditError::ValidationFailed(errors));
    }

    working.version = base.version + 1;
    Ok(working)
}

/// Apply operations in place without validating or bumping the version.
///
/// Leaves `spec` partially edited on error; callers own a scratch copy.
pub(crate) fn apply_ops(spec: &mut GameSpecification, ops: &[EditOperation]) -> Result<()> {
    for (index, op) in ops.iter().enumerate() {
        apply_one(spec, op).map_err(|fault| fault.at(index))?;
    }
    Ok(())
}

fn apply_one(spec: &mut GameSpecification, op: &EditOperation) -> std::result::Result<(), Fault> {
    match op {
        EditOperation::AddScene { scene, index } => {
            require_name("scene", scene)?;
            if spec.scene(scene).is_some() {
                return Err(Fault::Duplicate(scene.clone()));
            }
            let at = index.unwrap_or(spec.scenes.len());
            if at > spec.scenes.len() {
                return Err(Fault::Malformed(format!(
                    "scene index {at} is past the end ({} scenes)",
                    spec.scenes.len()
                )));
            }
            spec.scenes.insert(at, Arc::new(Scene::new(scene.as_str())));
        }

        EditOperation::RemoveScene { scene } => {
            let position = scene_position(spec, scene)?;
            spec.scenes.remove(position);
        }

        EditOperation::AddObject {
            scene,
            object,
            kind,
            properties,
        } => {
            require_name("object", object)?;
            let existing = find_scene(spec, scene)?;
            if existing.object(object).is_some() {
                return Err(Fault::Duplicate(format!("{scene}/{object}")));
            }
            for (key, value) in properties {
                check_value(spec, existing, key, value)?;
            }

            let mut added = GameObject::new(object.as_str(), *kind);
            added.properties = properties.clone();
            scene_mut(spec, scene)?.objects.push(Arc::new(added));
        }

        EditOperation::RemoveObject { scene, object } => {
            let target = scene_mut(spec, scene)?;
            let position = target
                .objects
                .iter()
                .position(|o| o.name == *object)
                .ok_or_else(|| unresolved_object(scene, object))?;
            target.objects.remove(position);
        }

        EditOperation::SetProperty {
            scene,
            object,
            key,
            value,
        } => {
            let existing = find_scene(spec, scene)?;
            if existing.object(object).is_none() {
                return Err(unresolved_object(scene, object));
            }
            check_value(spec, existing, key, value)?;
            object_mut(spec, scene, object)?
                .properties
                .insert(key.clone(), value.clone());
        }

        EditOperation::RemoveProperty { scene, object, key } => {
            let target = object_mut(spec, scene, object)?;
            if target.properties.remove(key).is_none() {
                return Err(Fault::Unresolved(format!(
                    "property '{key}' on '{scene}/{object}'"
                )));
            }
        }

        EditOperation::AddBehavior {
            scene,
            object,
            behavior,
        } => {
            check_behavior(behavior)?;
            let target = object_mut(spec, scene, object)?;
            let clash = target.behaviors.iter().any(|b| {
                b.kind == behavior.kind
                    && (!behavior.kind.is_multi_instance() || b.name == behavior.name)
            });
            if clash {
                return Err(Fault::Duplicate(format!(
                    "{} on {scene}/{object}",
                    behavior.label()
                )));
            }
            target.behaviors.push(behavior.clone());
        }

        EditOperation::RemoveBehavior {
            scene,
            object,
            kind,
            name,
        } => {
            let target = object_mut(spec, scene, object)?;
            let position = target
                .behaviors
                .iter()
                .position(|b| b.is(kind, name.as_deref()))
                .ok_or_else(|| {
                    let label = match name {
                        Some(name) => format!("{kind}:{name}"),
                        None => kind.to_string(),
                    };
                    Fault::Unresolved(format!("behavior '{label}' on '{scene}/{object}'"))
                })?;
            target.behaviors.remove(position);
        }

        EditOperation::ReplaceEventRules { scene, rules } => {
            let existing = find_scene(spec, scene)?;
            for rule in rules {
                check_rule(spec, existing, rule)?;
            }
            scene_mut(spec, scene)?.events.clone_from(rules);
        }

        EditOperation::SetGameProperties {
            name,
            description,
            orientation,
            resolution_mode,
        } => {
            if name.is_none()
                && description.is_none()
                && orientation.is_none()
                && resolution_mode.is_none()
            {
                return Err(Fault::Malformed("no game property to set".into()));
            }
            if let Some(name) = name {
                require_name("game", name.trim())?;
            }

            let properties = &mut spec.properties;
            if let Some(name) = name {
                properties.name.clone_from(name);
            }
            if let Some(description) = description {
                properties.description.clone_from(description);
            }
            if let Some(orientation) = orientation {
                properties.orientation = *orientation;
            }
            if let Some(mode) = resolution_mode {
                properties.resolution_mode = *mode;
            }
        }

        EditOperation::AddResource { resource } => {
            check_resource(resource)?;
            if spec.resource(&resource.name).is_some() {
                return Err(Fault::Duplicate(resource.name.clone()));
            }
            spec.resources.push(resource.clone());
        }

        EditOperation::RemoveResource { name } => {
            let position = spec
                .resources
                .iter()
                .position(|r| r.name == *name)
                .ok_or_else(|| Fault::Unresolved(format!("resource '{name}'")))?;
            spec.resources.remove(position);
        }
    }
    Ok(())
}

fn require_name(what: &str, name: &str) -> std::result::Result<(), Fault> {
    if name.is_empty() {
        Err(Fault::Malformed(format!("{what} name is empty")))
    } else {
        Ok(())
    }
}

fn unresolved_object(scene: &str, object: &str) -> Fault {
    Fault::Unresolved(format!("object '{scene}/{object}'"))
}

fn find_scene<'a>(spec: &'a GameSpecification, name: &str) -> std::result::Result<&'a Scene, Fault> {
    spec.scene(name)
        .ok_or_else(|| Fault::Unresolved(format!("scene '{name}'")))
}

fn scene_position(spec: &GameSpecification, name: &str) -> std::result::Result<usize, Fault> {
    spec.scenes
        .iter()
        .position(|s| s.name == name)
        .ok_or_else(|| Fault::Unresolved(format!("scene '{name}'")))
}

/// Copy-on-write access to a scene. Only the touched scene is cloned.
fn scene_mut<'a>(spec: &'a mut GameSpecification, name: &str) -> std::result::Result<&'a mut Scene, Fault> {
    let position = scene_position(spec, name)?;
    Ok(Arc::make_mut(&mut spec.scenes[position]))
}

fn object_mut<'a>(
    spec: &'a mut GameSpecification,
    scene: &str,
    object: &str,
) -> std::result::Result<&'a mut GameObject, Fault> {
    let target = scene_mut(spec, scene)?;
    target
        .objects
        .iter_mut()
        .find(|o| o.name == object)
        .map(Arc::make_mut)
        .ok_or_else(|| unresolved_object(scene, object))
}

fn check_value(
    spec: &GameSpecification,
    scene: &Scene,
    key: &str,
    value: &PropertyValue,
) -> std::result::Result<(), Fault> {
    if key.is_empty() {
        return Err(Fault::Malformed("property key is empty".into()));
    }
    if !value.is_finite() {
        return Err(Fault::Malformed(format!(
            "property '{key}' is not a finite number"
        )));
    }

    let Some(kind) = RefKind::for_key(key) else {
        return Ok(());
    };
    let Some(target) = value.as_text() else {
        return Err(Fault::Malformed(format!("property '{key}' must name a {kind}")));
    };
    if validate::resolves(spec, scene, kind, target) {
        Ok(())
    } else {
        Err(Fault::Unresolved(format!("{kind} '{target}'")))
    }
}

fn check_behavior(behavior: &Behavior) -> std::result::Result<(), Fault> {
    if behavior.name.is_some() && !behavior.kind.is_multi_instance() {
        return Err(Fault::Malformed(format!(
            "behavior '{}' allows a single instance and cannot be named",
            behavior.kind
        )));
    }
    if let Some((key, _)) = behavior.parameters.iter().find(|(_, v)| !v.is_finite()) {
        return Err(Fault::Malformed(format!(
            "behavior parameter '{key}' is not a finite number"
        )));
    }
    Ok(())
}

fn check_rule(spec: &GameSpecification, scene: &Scene, rule: &EventRule) -> std::result::Result<(), Fault> {
    for instruction in rule.instructions() {
        if instruction.kind.is_empty() {
            return Err(Fault::Malformed("event instruction has no kind".into()));
        }
        if let Some(object) = &instruction.object
            && scene.object(object).is_none()
        {
            return Err(unresolved_object(&scene.name, object));
        }
        if let Some(target) = &instruction.scene
            && spec.scene(target).is_none()
        {
            return Err(Fault::Unresolved(format!("scene '{target}'")));
        }
    }
    Ok(())
}

fn check_resource(resource: &Resource) -> std::result::Result<(), Fault> {
    require_name("resource", &resource.name)?;
    if !is_safe_relative(&resource.file) {
        return Err(Fault::Malformed(format!(
            "resource file '{}' must be a relative path inside the asset root",
            resource.file
        )));
    }
    Ok(())
}

/// Non-empty, relative, and free of `..` components.
pub(crate) fn is_safe_relative(file: &str) -> bool {
    !file.is_empty()
        && Path::new(file)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::{BehaviorKind, Instruction, ObjectKind, ResourceKind};

    fn base() -> GameSpecification {
        GameSpecification::new("Test")
    }

    fn limits() -> Limits {
        Limits::default()
    }

    fn level_with_player() -> GameSpecification {
        apply(
            &base(),
            &[
                EditOperation::add_scene("Level1"),
                EditOperation::add_object("Level1", "Player", ObjectKind::Sprite),
            ],
            &limits(),
        )
        .unwrap()
    }

    #[test]
    fn batch_threads_its_own_state() {
        let ops = [
            EditOperation::add_scene("Level1"),
            EditOperation::add_object("Level1", "Player", ObjectKind::Sprite),
            EditOperation::add_behavior("Level1", "Player", BehaviorKind::PlatformerObject),
        ];

        let spec = apply(&base(), &ops, &limits()).unwrap();
        assert_eq!(spec.version(), 1);
        let player = spec.scene("Level1").unwrap().object("Player").unwrap();
        assert_eq!(player.behaviors().len(), 1);
    }

    #[test]
    fn unresolved_reference_fails_at_its_index() {
        let base = apply(&base(), &[EditOperation::add_scene("Level1")], &limits()).unwrap();
        let ops = [
            EditOperation::add_object("Level1", "Enemy", ObjectKind::Sprite),
            EditOperation::set_property("Level1", "Enemy", "targets", "Player"),
        ];

        let err = apply(&base, &ops, &limits()).unwrap_err();
        assert!(matches!(err, EditError::UnresolvedTarget { index: 1, .. }));
        assert_eq!(base.scene("Level1").unwrap().objects().len(), 0);
    }

    #[test]
    fn reference_to_object_added_earlier_in_batch_resolves() {
        let base = apply(&base(), &[EditOperation::add_scene("Level1")], &limits()).unwrap();
        let ops = [
            EditOperation::add_object("Level1", "Player", ObjectKind::Sprite),
            EditOperation::add_object("Level1", "Enemy", ObjectKind::Sprite),
            EditOperation::set_property("Level1", "Enemy", "targets", "Player"),
        ];

        let spec = apply(&base, &ops, &limits()).unwrap();
        let enemy = spec.scene("Level1").unwrap().object("Enemy").unwrap();
        assert_eq!(enemy.property("targets"), Some(&PropertyValue::from("Player")));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let spec = level_with_player();

        let err = apply(&spec, &[EditOperation::add_scene("Level1")], &limits()).unwrap_err();
        assert_eq!(
            err,
            EditError::DuplicateName {
                index: 0,
                name: "Level1".into()
            }
        );

        let err = apply(
            &spec,
            &[EditOperation::add_object("Level1", "Player", ObjectKind::Text)],
            &limits(),
        )
        .unwrap_err();
        assert!(matches!(err, EditError::DuplicateName { index: 0, .. }));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let spec = level_with_player();
        let cases = [
            EditOperation::add_scene(""),
            EditOperation::set_property("Level1", "Player", "speed", f64::NAN),
            EditOperation::set_property("Level1", "Player", "follows", 3.0),
            EditOperation::AddScene {
                scene: "Level9".into(),
                index: Some(5),
            },
            EditOperation::SetGameProperties {
                name: None,
                description: None,
                orientation: None,
                resolution_mode: None,
            },
            EditOperation::AddResource {
                resource: Resource {
                    name: "hero".into(),
                    kind: ResourceKind::Image,
                    file: "../secret.png".into(),
                },
            },
        ];

        for op in cases {
            let err = apply(&spec, std::slice::from_ref(&op), &limits()).unwrap_err();
            assert!(
                matches!(err, EditError::MalformedOperation { index: 0, .. }),
                "{op}: {err}"
            );
        }
    }

    #[test]
    fn empty_batch_is_malformed() {
        let err = apply(&base(), &[], &limits()).unwrap_err();
        assert!(matches!(err, EditError::MalformedOperation { index: 0, .. }));
    }

    #[test]
    fn validation_failure_discards_the_batch() {
        let spec = level_with_player();
        let ops = [EditOperation::add_behavior(
            "Level1",
            "Player",
            BehaviorKind::Respawn,
        )];

        let err = apply(&spec, &ops, &limits()).unwrap_err();
        let EditError::ValidationFailed(errors) = &err else {
            panic!("expected validation failure, got {err}");
        };
        assert!(matches!(errors[0], ValidationError::MissingPrerequisite { .. }));
        assert_eq!(err.payload().index, None);
        assert_eq!(spec.version(), 1);
    }

    #[test]
    fn prerequisite_may_follow_in_the_same_batch() {
        let spec = level_with_player();
        let ops = [
            EditOperation::add_behavior("Level1", "Player", BehaviorKind::Respawn),
            EditOperation::add_behavior("Level1", "Player", BehaviorKind::Health),
        ];
        assert!(apply(&spec, &ops, &limits()).is_ok());
    }

    #[test]
    fn removing_a_referenced_object_fails_validation() {
        let spec = apply(
            &level_with_player(),
            &[
                EditOperation::add_object("Level1", "Enemy", ObjectKind::Sprite),
                EditOperation::set_property("Level1", "Enemy", "targets", "Player"),
            ],
            &limits(),
        )
        .unwrap();

        let err = apply(
            &spec,
            &[EditOperation::RemoveObject {
                scene: "Level1".into(),
                object: "Player".into(),
            }],
            &limits(),
        )
        .unwrap_err();
        assert!(matches!(err, EditError::ValidationFailed(_)));
    }

    #[test]
    fn bounds_are_enforced_after_the_batch() {
        let tight = Limits {
            max_objects: 1,
            ..Limits::default()
        };
        let ops = [EditOperation::add_object("Level1", "Coin", ObjectKind::Sprite)];

        let err = apply(&level_with_player(), &ops, &tight).unwrap_err();
        assert!(matches!(
            &err,
            EditError::ValidationFailed(errors)
                if matches!(errors[0], ValidationError::LimitExceeded { what: "object", .. })
        ));
    }

    #[test]
    fn apply_is_deterministic() {
        let spec = level_with_player();
        let ops = [
            EditOperation::add_scene("Level2"),
            EditOperation::add_object("Level2", "Door", ObjectKind::TiledSprite),
            EditOperation::set_property("Level1", "Player", "speed", 120.0),
        ];

        let first = apply(&spec, &ops, &limits()).unwrap();
        let second = apply(&spec, &ops, &limits()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn untouched_scenes_are_shared() {
        let spec = apply(
            &level_with_player(),
            &[EditOperation::add_scene("Level2")],
            &limits(),
        )
        .unwrap();
        let next = apply(
            &spec,
            &[EditOperation::add_object("Level2", "Door", ObjectKind::Sprite)],
            &limits(),
        )
        .unwrap();

        assert!(GameSpecification::shares_scene(&spec, &next, "Level1"));
        assert!(!GameSpecification::shares_scene(&spec, &next, "Level2"));
    }

    #[test]
    fn scene_index_inserts_in_place() {
        let spec = apply(
            &level_with_player(),
            &[EditOperation::AddScene {
                scene: "Title".into(),
                index: Some(0),
            }],
            &limits(),
        )
        .unwrap();

        let names: Vec<_> = spec.scenes().map(Scene::name).collect();
        assert_eq!(names, ["Title", "Level1"]);
    }

    #[test]
    fn multi_instance_behaviors_are_told_apart_by_name() {
        let tween = |name: &str| EditOperation::AddBehavior {
            scene: "Level1".into(),
            object: "Player".into(),
            behavior: Behavior {
                name: Some(name.into()),
                ..Behavior::new(BehaviorKind::Tween)
            },
        };

        let spec = apply(
            &level_with_player(),
            &[tween("fadeIn"), tween("fadeOut")],
            &limits(),
        )
        .unwrap();
        let err = apply(&spec, &[tween("fadeIn")], &limits()).unwrap_err();
        assert!(matches!(err, EditError::DuplicateName { .. }));

        let removed = apply(
            &spec,
            &[EditOperation::RemoveBehavior {
                scene: "Level1".into(),
                object: "Player".into(),
                kind: BehaviorKind::Tween,
                name: Some("fadeIn".into()),
            }],
            &limits(),
        )
        .unwrap();
        let player = removed.scene("Level1").unwrap().object("Player").unwrap();
        assert_eq!(player.behaviors().len(), 1);
    }

    #[test]
    fn event_rules_must_name_existing_entities() {
        let rule = EventRule {
            conditions: vec![Instruction::new("Collision").on_object("Player")],
            actions: vec![Instruction::new("ChangeScene").to_scene("Level2")],
        };
        let op = EditOperation::ReplaceEventRules {
            scene: "Level1".into(),
            rules: vec![rule],
        };

        let err = apply(&level_with_player(), std::slice::from_ref(&op), &limits()).unwrap_err();
        assert_eq!(
            err,
            EditError::UnresolvedTarget {
                index: 0,
                target: "scene 'Level2'".into()
            }
        );

        let ops = [EditOperation::add_scene("Level2"), op];
        let spec = apply(&level_with_player(), &ops, &limits()).unwrap();
        assert_eq!(spec.event_rule_count(), 1);
    }

    #[test]
    fn payload_carries_index_and_reason() {
        let err = EditError::UnresolvedTarget {
            index: 1,
            target: "object 'Player'".into(),
        };
        let json = serde_json::to_value(err.payload()).unwrap();
        assert_eq!(json["index"], 1);
        assert_eq!(json["kind"], "unresolvedTarget");
        assert_eq!(json["reason"], "object 'Player' does not exist");
    }
}
