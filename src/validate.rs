//! Structural validation of a specification.
//!
//! Checks run in a fixed order and every failure is collected:
//!
//! 1. Name uniqueness (scenes, objects per scene, resources).
//! 2. Reference integrity (property and event-rule names resolve).
//! 3. Behavior compatibility (no duplicates, prerequisites present).
//! 4. Resource bounds (scene, object, and rule ceilings).
//!
//! Validation never mutates its input.

use std::collections::HashSet;

use serde::Deserialize;

use crate::model::{GameSpecification, RefKind, Scene};

/// Ceilings that keep preview and export away from pathological inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Limits {
    pub max_scenes: usize,

    /// Total across all scenes.
    pub max_objects: usize,

    /// Total across all scenes.
    pub max_event_rules: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_scenes: 50,
            max_objects: 2000,
            max_event_rules: 5000,
        }
    }
}

impl Limits {
    /// No ceilings. Used when replaying history recorded under older limits.
    pub fn unbounded() -> Self {
        Self {
            max_scenes: usize::MAX,
            max_objects: usize::MAX,
            max_event_rules: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{what} has an empty name")]
    EmptyName { what: String },

    #[error("duplicate scene name '{0}'")]
    DuplicateScene(String),

    #[error("duplicate object name '{object}' in scene '{scene}'")]
    DuplicateObject { scene: String, object: String },

    #[error("duplicate resource name '{0}'")]
    DuplicateResource(String),

    #[error("'{scene}/{object}' property '{key}' references missing {kind} '{target}'")]
    DanglingReference {
        scene: String,
        object: String,
        key: String,
        kind: RefKind,
        target: String,
    },

    #[error("'{scene}/{object}' property '{key}' must name a {kind}")]
    MalformedReference {
        scene: String,
        object: String,
        key: String,
        kind: RefKind,
    },

    #[error("event rule {rule} in scene '{scene}' references missing {kind} '{target}'")]
    DanglingEventReference {
        scene: String,
        rule: usize,
        kind: RefKind,
        target: String,
    },

    #[error("behavior '{behavior}' is attached more than once to '{scene}/{object}'")]
    DuplicateBehavior {
        scene: String,
        object: String,
        behavior: String,
    },

    #[error("behavior '{behavior}' on '{scene}/{object}' requires '{requires}'")]
    MissingPrerequisite {
        scene: String,
        object: String,
        behavior: String,
        requires: String,
    },

    #[error("{what} count {count} exceeds the limit of {limit}")]
    LimitExceeded {
        what: &'static str,
        count: usize,
        limit: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<ValidationError>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn into_result(self) -> Result<(), Vec<ValidationError>> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(errors) => Err(errors),
        }
    }
}

/// Check a specification against the structural rules and the given ceilings.
pub fn validate(spec: &GameSpecification, limits: &Limits) -> ValidationResult {
    let mut errors = Vec::new();

    check_names(spec, &mut errors);
    check_references(spec, &mut errors);
    check_behaviors(spec, &mut errors);
    check_bounds(spec, limits, &mut errors);

    if errors.is_empty() {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(errors)
    }
}

fn check_names(spec: &GameSpecification, errors: &mut Vec<ValidationError>) {
    if spec.properties().name.trim().is_empty() {
        errors.push(ValidationError::EmptyName {
            what: "the game".into(),
        });
    }

    let mut resources = HashSet::new();
    for resource in spec.resources() {
        if resource.name.is_empty() {
            errors.push(ValidationError::EmptyName {
                what: format!("resource for file '{}'", resource.file),
            });
        } else if !resources.insert(resource.name.as_str()) {
            errors.push(ValidationError::DuplicateResource(resource.name.clone()));
        }
    }

    let mut scenes = HashSet::new();
    for (index, scene) in spec.scenes().enumerate() {
        if scene.name().is_empty() {
            errors.push(ValidationError::EmptyName {
                what: format!("scene {index}"),
            });
        } else if !scenes.insert(scene.name()) {
            errors.push(ValidationError::DuplicateScene(scene.name().to_string()));
        }

        let mut objects = HashSet::new();
        for (index, object) in scene.objects().enumerate() {
            if object.name().is_empty() {
                errors.push(ValidationError::EmptyName {
                    what: format!("object {index} in scene '{}'", scene.name()),
                });
            } else if !objects.insert(object.name()) {
                errors.push(ValidationError::DuplicateObject {
                    scene: scene.name().to_string(),
                    object: object.name().to_string(),
                });
            }
        }
    }
}

/// Whether `target` names an entity of `kind` visible from `scene`.
pub(crate) fn resolves(spec: &GameSpecification, scene: &Scene, kind: RefKind, target: &str) -> bool {
    match kind {
        RefKind::Object => scene.object(target).is_some(),
        RefKind::Scene => spec.scene(target).is_some(),
        RefKind::Resource => spec.resource(target).is_some(),
    }
}

fn check_references(spec: &GameSpecification, errors: &mut Vec<ValidationError>) {
    for scene in spec.scenes() {
        for object in scene.objects() {
            for (key, value) in object.properties() {
                let Some(kind) = RefKind::for_key(key) else {
                    continue;
                };
                match value.as_text() {
                    Some(target) if resolves(spec, scene, kind, target) => {}
                    Some(target) => errors.push(ValidationError::DanglingReference {
                        scene: scene.name().to_string(),
                        object: object.name().to_string(),
                        key: key.clone(),
                        kind,
                        target: target.to_string(),
                    }),
                    None => errors.push(ValidationError::MalformedReference {
                        scene: scene.name().to_string(),
                        object: object.name().to_string(),
                        key: key.clone(),
                        kind,
                    }),
                }
            }
        }

        for (rule, event) in scene.events().iter().enumerate() {
            for instruction in event.instructions() {
                let named = [
                    (RefKind::Object, instruction.object.as_deref()),
                    (RefKind::Scene, instruction.scene.as_deref()),
                ];
                for (kind, target) in named {
                    if let Some(target) = target
                        && !resolves(spec, scene, kind, target)
                    {
                        errors.push(ValidationError::DanglingEventReference {
                            scene: scene.name().to_string(),
                            rule,
                            kind,
                            target: target.to_string(),
                        });
                    }
                }
            }
        }
    }
}

fn check_behaviors(spec: &GameSpecification, errors: &mut Vec<ValidationError>) {
    for scene in spec.scenes() {
        for object in scene.objects() {
            let mut seen = HashSet::new();
            for behavior in object.behaviors() {
                let identity = if behavior.kind.is_multi_instance() {
                    (&behavior.kind, behavior.name.as_deref())
                } else {
                    (&behavior.kind, None)
                };
                if !seen.insert(identity) {
                    errors.push(ValidationError::DuplicateBehavior {
                        scene: scene.name().to_string(),
                        object: object.name().to_string(),
                        behavior: behavior.label(),
                    });
                }

                if let Some(required) = behavior.kind.prerequisite()
                    && !object.has_behavior(&required)
                {
                    errors.push(ValidationError::MissingPrerequisite {
                        scene: scene.name().to_string(),
                        object: object.name().to_string(),
                        behavior: behavior.kind.to_string(),
                        requires: required.to_string(),
                    });
                }
            }
        }
    }
}

fn check_bounds(spec: &GameSpecification, limits: &Limits, errors: &mut Vec<ValidationError>) {
    let counts = [
        ("scene", spec.scenes().len(), limits.max_scenes),
        ("object", spec.object_count(), limits.max_objects),
        ("event rule", spec.event_rule_count(), limits.max_event_rules),
    ];
    for (what, count, limit) in counts {
        if count > limit {
            errors.push(ValidationError::LimitExceeded { what, count, limit });
        }
    }
}
