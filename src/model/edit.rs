//! Edit operations: the only way a specification changes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::spec::{
    Behavior, BehaviorKind, EventRule, ObjectKind, Orientation, PropertyValue, ResolutionMode,
    Resource,
};

/// One atomic mutation intent against a specification.
///
/// Serialized tagged by `op`, which is the shape a chat adapter emits:
///
/// ```json
/// { "op": "addObject", "scene": "Level1", "object": "Player", "kind": "Sprite" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EditOperation {
    AddScene {
        scene: String,

        /// Insertion position; appended when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },

    RemoveScene {
        scene: String,
    },

    AddObject {
        scene: String,
        object: String,
        kind: ObjectKind,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, PropertyValue>,
    },

    RemoveObject {
        scene: String,
        object: String,
    },

    SetProperty {
        scene: String,
        object: String,
        key: String,
        value: PropertyValue,
    },

    RemoveProperty {
        scene: String,
        object: String,
        key: String,
    },

    AddBehavior {
        scene: String,
        object: String,
        behavior: Behavior,
    },

    RemoveBehavior {
        scene: String,
        object: String,
        kind: BehaviorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Replace a scene's event rules wholesale.
    ReplaceEventRules {
        scene: String,
        rules: Vec<EventRule>,
    },

    /// Update game-level settings. Absent fields are left alone.
    SetGameProperties {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        orientation: Option<Orientation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution_mode: Option<ResolutionMode>,
    },

    AddResource {
        resource: Resource,
    },

    RemoveResource {
        name: String,
    },
}

impl EditOperation {
    pub fn add_scene(scene: impl Into<String>) -> Self {
        Self::AddScene {
            scene: scene.into(),
            index: None,
        }
    }

    pub fn add_object(scene: impl Into<String>, object: impl Into<String>, kind: ObjectKind) -> Self {
        Self::AddObject {
            scene: scene.into(),
            object: object.into(),
            kind,
            properties: BTreeMap::new(),
        }
    }

    pub fn set_property(
        scene: impl Into<String>,
        object: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self::SetProperty {
            scene: scene.into(),
            object: object.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn add_behavior(scene: impl Into<String>, object: impl Into<String>, kind: BehaviorKind) -> Self {
        Self::AddBehavior {
            scene: scene.into(),
            object: object.into(),
            behavior: Behavior::new(kind),
        }
    }

    /// The operation's tag, as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddScene { .. } => "addScene",
            Self::RemoveScene { .. } => "removeScene",
            Self::AddObject { .. } => "addObject",
            Self::RemoveObject { .. } => "removeObject",
            Self::SetProperty { .. } => "setProperty",
            Self::RemoveProperty { .. } => "removeProperty",
            Self::AddBehavior { .. } => "addBehavior",
            Self::RemoveBehavior { .. } => "removeBehavior",
            Self::ReplaceEventRules { .. } => "replaceEventRules",
            Self::SetGameProperties { .. } => "setGameProperties",
            Self::AddResource { .. } => "addResource",
            Self::RemoveResource { .. } => "removeResource",
        }
    }
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddScene { scene, .. } | Self::RemoveScene { scene } => {
                write!(f, "{} {scene}", self.name())
            }
            Self::AddObject { scene, object, .. }
            | Self::RemoveObject { scene, object }
            | Self::AddBehavior { scene, object, .. }
            | Self::RemoveBehavior { scene, object, .. } => {
                write!(f, "{} {scene}/{object}", self.name())
            }
            Self::SetProperty { scene, object, key, .. }
            | Self::RemoveProperty { scene, object, key } => {
                write!(f, "{} {scene}/{object}.{key}", self.name())
            }
            Self::ReplaceEventRules { scene, rules } => {
                write!(f, "{} {scene} ({} rule(s))", self.name(), rules.len())
            }
            Self::SetGameProperties { .. } => f.write_str(self.name()),
            Self::AddResource { resource } => write!(f, "{} {}", self.name(), resource.name),
            Self::RemoveResource { name } => write!(f, "{} {name}", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_chat_shaped_operations() {
        let json = r#"[
            { "op": "addScene", "scene": "Level1" },
            { "op": "addObject", "scene": "Level1", "object": "Player", "kind": "Sprite" },
            { "op": "addBehavior", "scene": "Level1", "object": "Player",
              "behavior": { "kind": "PlatformerObject" } },
            { "op": "setGameProperties", "resolutionMode": "adaptWidth" }
        ]"#;

        let ops: Vec<EditOperation> = serde_json::from_str(json).unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0], EditOperation::add_scene("Level1"));
        assert_eq!(
            ops[1],
            EditOperation::add_object("Level1", "Player", ObjectKind::Sprite)
        );
        assert!(matches!(
            &ops[2],
            EditOperation::AddBehavior { behavior, .. } if behavior.kind == BehaviorKind::PlatformerObject
        ));
        assert!(matches!(
            ops[3],
            EditOperation::SetGameProperties {
                resolution_mode: Some(ResolutionMode::AdaptWidth),
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_operation() {
        let err = serde_json::from_str::<EditOperation>(r#"{ "op": "explode" }"#).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn display_names_the_target() {
        let op = EditOperation::set_property("Level1", "Enemy", "targets", "Player");
        assert_eq!(op.to_string(), "setProperty Level1/Enemy.targets");
    }
}
