//! Deterministic structural merge
//!
//! Validates a delta against the live registry, then replays it through the
//! graph store's idempotent operations on a staged copy of the knowledge
//! base. The live copy is replaced only when every element applied.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::domain::KnowledgeBase;
use crate::domain::canonical_key;
use crate::domain::graph::{ClassProperties, EntityUpsert, Graph, Relationship, RelationshipUpsert};
use crate::domain::schema::{ClassChange, System};
use crate::domain::task::{DeltaOperation, EntityDelta, GraphDelta};
use crate::error::{Error, Result};

use super::MergeStrategy;
use super::report::{MergeReport, SkippedRelationship};

/// Check a delta without touching `system`
///
/// Class deltas must be monotonic against the live registry, and every class
/// an entity names must be known to the registry or added by the delta.
pub fn validate_delta(system: &System, delta: &GraphDelta) -> Result<()> {
    let mut scratch = system.snapshot();
    for class in &delta.classes {
        let definition = class.resolve_against(scratch.get_class_definition(&class.name));
        scratch.add_class_definition(definition)?;
    }

    for entity in &delta.entities {
        if applied_name(entity).is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".to_string()));
        }
        for class in entity.classes.iter().chain(entity.properties.keys()) {
            if !scratch.has_class(class) {
                return Err(Error::UnknownClass(class.clone()));
            }
        }
    }
    Ok(())
}

/// Apply `delta` to `kb`, all or nothing
pub fn apply_structural(kb: &mut KnowledgeBase, delta: &GraphDelta) -> Result<MergeReport> {
    validate_delta(&kb.system, delta)?;

    let mut staged = kb.clone();
    let mut report = MergeReport::new(&delta.task_id, MergeStrategy::Structural);

    for class in &delta.classes {
        let definition = class.resolve_against(staged.system.get_class_definition(&class.name));
        let name = definition.name.clone();
        match staged.system.add_class_definition(definition)? {
            ClassChange::Added => report.classes_added.push(name),
            ClassChange::Enhanced => report.classes_enhanced.push(name),
            ClassChange::Unchanged => {}
        }
    }

    let mut renames = HashMap::new();
    for entity in &delta.entities {
        let name = applied_name(entity);
        if canonical_key(name) != canonical_key(&entity.name) {
            renames.insert(canonical_key(&entity.name), name.to_string());
        }

        match apply_entity(&mut staged.graph, &staged.system, name, entity)? {
            EntityUpsert::Created => report.entities_added.push(name.to_string()),
            EntityUpsert::Updated => report.entities_updated.push(name.to_string()),
            EntityUpsert::Unchanged => report.entities_unchanged += 1,
        }
    }

    for relationship in &delta.relationships {
        let source = renamed(&renames, &relationship.source);
        let target = renamed(&renames, &relationship.target);

        if let Some(missing) = [&source, &target]
            .into_iter()
            .find(|endpoint| !staged.graph.contains_entity(endpoint))
        {
            warn!(
                task_id = %delta.task_id,
                source = %source,
                target = %target,
                missing = %missing,
                "Skipping relationship with unknown endpoint"
            );
            report.relationships_skipped.push(SkippedRelationship {
                source: source.clone(),
                target: target.clone(),
                description: relationship.description.clone(),
                reason: format!("entity '{}' does not exist", missing),
            });
            continue;
        }

        let refer = relationship
            .refer
            .iter()
            .map(|r| renamed(&renames, r))
            .collect();
        let edge = Relationship::new(source, target, &relationship.description)
            .with_count(relationship.count)
            .with_refer(refer);
        match staged.graph.add_relationship(edge)? {
            RelationshipUpsert::Inserted { .. } => report.relationships_added += 1,
            RelationshipUpsert::Incremented { id, count } => {
                debug!(relationship_id = %id, count, "Relationship count incremented");
                report.relationships_updated += 1;
            }
        }
    }

    *kb = staged;
    info!(
        task_id = %delta.task_id,
        classes_added = report.classes_added.len(),
        classes_enhanced = report.classes_enhanced.len(),
        entities_added = report.entities_added.len(),
        entities_updated = report.entities_updated.len(),
        relationships_added = report.relationships_added,
        relationships_updated = report.relationships_updated,
        relationships_skipped = report.relationships_skipped.len(),
        "Structural merge applied"
    );
    Ok(report)
}

/// Name the entity lands under; a merge folds it into its target
fn applied_name(entity: &EntityDelta) -> &str {
    match (&entity.operation, entity.merge_target.as_deref()) {
        (DeltaOperation::Merge, Some(target)) if !target.trim().is_empty() => target.trim(),
        _ => entity.name.trim(),
    }
}

fn apply_entity(
    graph: &mut Graph,
    system: &System,
    name: &str,
    entity: &EntityDelta,
) -> Result<EntityUpsert> {
    if entity.operation != DeltaOperation::Update {
        return graph.create_entity(system, name, &entity.description, &entity.classes, &entity.properties);
    }

    // updates overwrite values instead of filling blanks
    let upsert = graph.create_entity(
        system,
        name,
        &entity.description,
        &entity.classes,
        &ClassProperties::new(),
    )?;
    let mut changed = false;
    for (class, values) in &entity.properties {
        for (property, value) in values {
            changed |= graph.set_property_value(system, name, class, property, value)?;
        }
    }
    Ok(match upsert {
        EntityUpsert::Unchanged if changed => EntityUpsert::Updated,
        other => other,
    })
}

fn renamed(renames: &HashMap<String, String>, name: &str) -> String {
    renames
        .get(&canonical_key(name))
        .cloned()
        .unwrap_or_else(|| name.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::apply_additions;
    use crate::domain::task::{ClassDelta, PropertyDelta, RelationshipDelta};

    fn messaging_delta(task_id: &str) -> GraphDelta {
        let mut delta = GraphDelta::new(task_id);
        delta.entities.push(
            EntityDelta::new("Messages", "Messaging app")
                .with_class("App")
                .with_property("App", "category", "messaging"),
        );
        delta
            .entities
            .push(EntityDelta::new("Alex", "A friend").with_class("Person"));
        delta
            .relationships
            .push(RelationshipDelta::new("User", "Messages", "opened"));
        delta.relationships.push(
            RelationshipDelta::new("User", "Alex", "sent a text to")
                .with_refer(vec!["Messages".to_string()]),
        );
        delta
    }

    #[test]
    fn test_apply_reports_diff() {
        let mut kb = KnowledgeBase::seeded().unwrap();
        let report = apply_structural(&mut kb, &messaging_delta("t1")).unwrap();

        assert_eq!(report.entities_added, vec!["Messages", "Alex"]);
        assert_eq!(report.relationships_added, 2);
        assert_eq!(kb.graph.entity_count(), 3);
        assert_eq!(report.strategy_used, MergeStrategy::Structural);
    }

    #[test]
    fn test_reapplying_increments_counts_only() {
        let mut kb = KnowledgeBase::seeded().unwrap();
        apply_structural(&mut kb, &messaging_delta("t1")).unwrap();
        let report = apply_structural(&mut kb, &messaging_delta("t2")).unwrap();

        assert!(report.entities_added.is_empty());
        assert_eq!(report.entities_unchanged, 2);
        assert_eq!(report.relationships_updated, 2);
        assert_eq!(kb.graph.entity_count(), 3);
        assert!(kb.graph.relationships().iter().all(|r| r.count == 2));
    }

    #[test]
    fn test_failure_leaves_knowledge_base_untouched() {
        let mut kb = KnowledgeBase::seeded().unwrap();
        let mut delta = messaging_delta("t1");
        delta.entities.push(
            EntityDelta::new("Sam", "")
                .with_class("Person")
                .with_property("Person", "shoe_size", "44"),
        );

        let before = kb.clone();
        let err = apply_structural(&mut kb, &delta).unwrap_err();
        assert!(matches!(err, Error::UnknownProperty { .. }));
        assert_eq!(kb, before);
    }

    #[test]
    fn test_unknown_entity_class_fails_validation() {
        let kb = KnowledgeBase::seeded().unwrap();
        let mut delta = GraphDelta::new("t1");
        delta
            .entities
            .push(EntityDelta::new("LH123", "").with_class("Flight"));
        assert!(matches!(validate_delta(&kb.system, &delta), Err(Error::UnknownClass(_))));

        delta.classes.push(ClassDelta::new("Flight").with_property(PropertyDelta::new("number")));
        assert!(validate_delta(&kb.system, &delta).is_ok());
    }

    #[test]
    fn test_weakening_class_delta_is_rejected() {
        let kb = KnowledgeBase::seeded().unwrap();
        let mut property = PropertyDelta::new("content_type");
        property.required = Some(false);
        let mut delta = GraphDelta::new("t1");
        delta.classes.push(ClassDelta::new("Content").with_property(property));

        assert!(matches!(
            validate_delta(&kb.system, &delta),
            Err(Error::SchemaViolation { .. })
        ));
    }

    /// Schema additions two tasks made from the same snapshot
    fn flight_addition(task_id: &str, snapshot: &System, required: bool) -> GraphDelta {
        let mut number = PropertyDelta::new("number");
        number.required = Some(required);
        let mut system = snapshot.snapshot();
        let outcome =
            apply_additions(&mut system, vec![ClassDelta::new("Flight").with_property(number)]).unwrap();

        let mut delta = GraphDelta::new(task_id);
        delta.classes = outcome.class_deltas;
        delta
    }

    #[test]
    fn test_concurrent_additions_merge_in_either_order() {
        let base = KnowledgeBase::seeded().unwrap();

        for required_first in [true, false] {
            let first = flight_addition("t1", &base.system, required_first);
            let second = flight_addition("t2", &base.system, !required_first);

            let mut kb = base.clone();
            apply_structural(&mut kb, &first).unwrap();
            apply_structural(&mut kb, &second).unwrap();

            let flight = kb.system.get_class_definition("Flight").unwrap();
            assert!(flight.property("number").unwrap().required);
        }
    }

    #[test]
    fn test_class_deltas_apply_before_entities() {
        let mut kb = KnowledgeBase::seeded().unwrap();
        let mut delta = GraphDelta::new("t1");
        delta
            .classes
            .push(ClassDelta::new("Flight").with_property(PropertyDelta::new("number")));
        delta.entities.push(
            EntityDelta::new("LH123", "A flight")
                .with_class("Flight")
                .with_property("Flight", "number", "LH123"),
        );

        let report = apply_structural(&mut kb, &delta).unwrap();
        assert_eq!(report.classes_added, vec!["Flight"]);
        assert!(kb.system.has_class("flight"));
        assert!(kb.graph.get_entity("lh123").unwrap().has_class("Flight"));
    }

    #[test]
    fn test_missing_endpoint_is_skipped() {
        let mut kb = KnowledgeBase::seeded().unwrap();
        let mut delta = GraphDelta::new("t1");
        delta
            .relationships
            .push(RelationshipDelta::new("User", "Nobody", "waved at"));

        let report = apply_structural(&mut kb, &delta).unwrap();
        assert_eq!(report.relationships_skipped.len(), 1);
        assert!(report.relationships_skipped[0].reason.contains("Nobody"));
        assert_eq!(kb.graph.relationship_count(), 0);
    }

    #[test]
    fn test_update_overwrites_and_merge_folds_into_target() {
        let mut kb = KnowledgeBase::seeded().unwrap();
        apply_structural(&mut kb, &messaging_delta("t1")).unwrap();

        let mut delta = GraphDelta::new("t2");
        delta.entities.push(
            EntityDelta::new("Messages", "")
                .with_property("App", "category", "chat")
                .with_operation(DeltaOperation::Update),
        );
        let mut alias = EntityDelta::new("Alexander", "Goes by Alex")
            .with_class("Person")
            .with_operation(DeltaOperation::Merge);
        alias.merge_target = Some("Alex".to_string());
        delta.entities.push(alias);
        delta
            .relationships
            .push(RelationshipDelta::new("User", "Alexander", "called"));

        let report = apply_structural(&mut kb, &delta).unwrap();
        assert_eq!(report.entities_updated, vec!["Messages", "Alex"]);
        assert!(!kb.graph.contains_entity("Alexander"));

        let messages = kb.graph.get_entity("Messages").unwrap();
        assert_eq!(messages.class("App").unwrap().value("category"), Some("chat"));
        let called = kb
            .graph
            .relationships()
            .iter()
            .find(|r| r.description == "called")
            .unwrap();
        assert_eq!(called.target, "Alex");
    }
}
