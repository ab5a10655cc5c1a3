//! Resource Reference Resolution
//!
//! Normalizes the v1 reference edge list into typed relations and back.
//!
//! Write paths resolve an owner out of the inbound list before persisting;
//! read paths rebuild the wire list from stored edges. Both directions keep
//! the same multiset of (type, id, relationship) triples.

use std::collections::HashMap;

use crate::domain::reference::{Relationship, ResourceReference, ResourceType};
use crate::dto::v1beta1;
use crate::error::{Error, Result};

// ============================================================================
// Enum mapping
// ============================================================================

pub fn to_model_resource_type(resource_type: v1beta1::ResourceType) -> Result<ResourceType> {
    match resource_type {
        v1beta1::ResourceType::Experiment => Ok(ResourceType::Experiment),
        v1beta1::ResourceType::Job => Ok(ResourceType::Job),
        v1beta1::ResourceType::Pipeline => Ok(ResourceType::Pipeline),
        v1beta1::ResourceType::PipelineVersion => Ok(ResourceType::PipelineVersion),
        v1beta1::ResourceType::Namespace => Ok(ResourceType::Namespace),
        v1beta1::ResourceType::Unknown => Err(Error::invalid_input(
            "Unsupported resource type: UNKNOWN_RESOURCE_TYPE",
        )),
    }
}

pub fn to_model_relationship(relationship: v1beta1::Relationship) -> Result<Relationship> {
    match relationship {
        v1beta1::Relationship::Owner => Ok(Relationship::Owner),
        v1beta1::Relationship::Creator => Ok(Relationship::Creator),
        v1beta1::Relationship::Unknown => Err(Error::invalid_input(
            "Unsupported relationship: UNKNOWN_RELATIONSHIP",
        )),
    }
}

/// Runs have no v1 reference type and map to `UNKNOWN_RESOURCE_TYPE`
pub fn to_api_resource_type(resource_type: ResourceType) -> v1beta1::ResourceType {
    match resource_type {
        ResourceType::Experiment => v1beta1::ResourceType::Experiment,
        ResourceType::Job => v1beta1::ResourceType::Job,
        ResourceType::Pipeline => v1beta1::ResourceType::Pipeline,
        ResourceType::PipelineVersion => v1beta1::ResourceType::PipelineVersion,
        ResourceType::Namespace => v1beta1::ResourceType::Namespace,
        ResourceType::Run => v1beta1::ResourceType::Unknown,
    }
}

pub fn to_api_relationship(relationship: Relationship) -> v1beta1::Relationship {
    match relationship {
        Relationship::Owner => v1beta1::Relationship::Owner,
        Relationship::Creator => v1beta1::Relationship::Creator,
    }
}

// ============================================================================
// Owner resolution
// ============================================================================

/// Resolve the single reference of `reference_type` related by `relationship`
///
/// Fails with `ResourceNotFound` when nothing matches and with `InvalidInput`
/// when matches disagree on id or relationship, or an enum value is unknown.
pub fn resolve_owner(
    references: &[v1beta1::ResourceReference],
    reference_type: ResourceType,
    relationship: Relationship,
) -> Result<String> {
    find_owner(references, reference_type, relationship)?.ok_or_else(|| {
        Error::resource_not_found(
            format!("{reference_type} reference with {relationship} relationship"),
            "",
        )
    })
}

/// Like [`resolve_owner`] but an absent reference is `None`
pub fn find_owner(
    references: &[v1beta1::ResourceReference],
    reference_type: ResourceType,
    relationship: Relationship,
) -> Result<Option<String>> {
    let mut resolved: Option<&str> = None;
    for reference in references {
        let ty = to_model_resource_type(reference.key.resource_type)?;
        let rel = to_model_relationship(reference.relationship)?;
        if ty != reference_type {
            continue;
        }
        if rel != relationship {
            return Err(Error::invalid_input(format!(
                "Ambiguous {reference_type} reference {}: expected {relationship} relationship, got {rel}",
                reference.key.id
            )));
        }
        match resolved {
            Some(id) if id != reference.key.id => {
                return Err(Error::invalid_input(format!(
                    "Ambiguous {reference_type} references: {id} and {}",
                    reference.key.id
                )));
            }
            _ => resolved = Some(&reference.key.id),
        }
    }
    Ok(resolved.map(str::to_string))
}

// ============================================================================
// Typed relations
// ============================================================================

/// Ownership and creation links with at most one value per slot
///
/// Edges that do not fit a typed slot (or repeat an occupied one) are kept in
/// `other` so nothing is dropped on the way through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relations {
    pub owner_experiment: Option<String>,
    pub owner_namespace: Option<String>,
    pub owner_pipeline: Option<String>,
    pub creator_job: Option<String>,
    pub creator_pipeline_version: Option<String>,
    pub other: Vec<(ResourceType, String, Relationship)>,
}

impl Relations {
    pub fn from_api(references: &[v1beta1::ResourceReference]) -> Result<Self> {
        let mut relations = Relations::default();
        for reference in references {
            let ty = to_model_resource_type(reference.key.resource_type)?;
            let rel = to_model_relationship(reference.relationship)?;
            relations.insert(ty, reference.key.id.clone(), rel);
        }
        Ok(relations)
    }

    pub fn from_model(references: &[ResourceReference]) -> Self {
        let mut relations = Relations::default();
        for reference in references {
            relations.insert(
                reference.reference_type,
                reference.reference_id.clone(),
                reference.relationship,
            );
        }
        relations
    }

    fn insert(&mut self, ty: ResourceType, id: String, rel: Relationship) {
        let slot = match (ty, rel) {
            (ResourceType::Experiment, Relationship::Owner) => &mut self.owner_experiment,
            (ResourceType::Namespace, Relationship::Owner) => &mut self.owner_namespace,
            (ResourceType::Pipeline, Relationship::Owner) => &mut self.owner_pipeline,
            (ResourceType::Job, Relationship::Creator) => &mut self.creator_job,
            (ResourceType::PipelineVersion, Relationship::Creator) => {
                &mut self.creator_pipeline_version
            }
            _ => {
                self.other.push((ty, id, rel));
                return;
            }
        };
        if slot.is_none() {
            *slot = Some(id);
        } else {
            self.other.push((ty, id, rel));
        }
    }

    /// All edges as (type, id, relationship) triples
    pub fn triples(&self) -> Vec<(ResourceType, String, Relationship)> {
        let slots = [
            (ResourceType::Experiment, &self.owner_experiment, Relationship::Owner),
            (ResourceType::Namespace, &self.owner_namespace, Relationship::Owner),
            (ResourceType::Pipeline, &self.owner_pipeline, Relationship::Owner),
            (ResourceType::Job, &self.creator_job, Relationship::Creator),
            (
                ResourceType::PipelineVersion,
                &self.creator_pipeline_version,
                Relationship::Creator,
            ),
        ];
        let mut triples: Vec<_> = slots
            .into_iter()
            .filter_map(|(ty, id, rel)| id.as_ref().map(|id| (ty, id.clone(), rel)))
            .collect();
        triples.extend(self.other.iter().cloned());
        triples
    }

    /// Rebuild the wire reference list
    pub fn to_api(&self) -> Vec<v1beta1::ResourceReference> {
        self.triples()
            .into_iter()
            .map(|(ty, id, rel)| {
                v1beta1::ResourceReference::new(to_api_resource_type(ty), id, to_api_relationship(rel))
            })
            .collect()
    }

    /// Edges with empty names and owner id, for conversion ahead of any
    /// store lookup
    pub fn to_unnamed_model(&self, resource_type: ResourceType) -> Vec<ResourceReference> {
        self.triples()
            .into_iter()
            .map(|(ty, id, rel)| ResourceReference {
                resource_id: String::new(),
                resource_type,
                reference_id: id,
                reference_name: String::new(),
                reference_type: ty,
                relationship: rel,
            })
            .collect()
    }

    /// Persisted edges for `resource_id`, named through `names`
    pub fn to_model(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        names: &ReferenceNames,
    ) -> Result<Vec<ResourceReference>> {
        self.triples()
            .into_iter()
            .map(|(ty, id, rel)| {
                Ok(ResourceReference {
                    resource_id: resource_id.to_string(),
                    resource_type,
                    reference_name: names.name(ty, &id)?,
                    reference_id: id,
                    reference_type: ty,
                    relationship: rel,
                })
            })
            .collect()
    }
}

// ============================================================================
// Reference names
// ============================================================================

/// Display names of referenced resources, looked up ahead of conversion
#[derive(Debug, Clone, Default)]
pub struct ReferenceNames {
    names: HashMap<(ResourceType, String), String>,
}

impl ReferenceNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource_type: ResourceType, id: impl Into<String>, name: impl Into<String>) {
        self.names.insert((resource_type, id.into()), name.into());
    }

    pub fn contains(&self, resource_type: ResourceType, id: &str) -> bool {
        resource_type == ResourceType::Namespace
            || self.names.contains_key(&(resource_type, id.to_string()))
    }

    /// Name of a referenced resource; namespaces are named by their id
    pub fn name(&self, resource_type: ResourceType, id: &str) -> Result<String> {
        if resource_type == ResourceType::Namespace {
            return Ok(id.to_string());
        }
        self.names
            .get(&(resource_type, id.to_string()))
            .cloned()
            .ok_or_else(|| Error::resource_not_found(resource_type.as_str(), id))
    }
}

/// Convert persisted edges back into the wire list, keeping names
pub fn to_api_references(references: &[ResourceReference]) -> Vec<v1beta1::ResourceReference> {
    references
        .iter()
        .map(|reference| v1beta1::ResourceReference {
            key: v1beta1::ResourceKey {
                resource_type: to_api_resource_type(reference.reference_type),
                id: reference.reference_id.clone(),
            },
            name: reference.reference_name.clone(),
            relationship: to_api_relationship(reference.relationship),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use v1beta1::{Relationship as ApiRel, ResourceReference as ApiRef, ResourceType as ApiType};

    fn triples_of(refs: &[ApiRef]) -> Vec<(ApiType, String, ApiRel)> {
        let mut triples: Vec<_> = refs
            .iter()
            .map(|r| (r.key.resource_type, r.key.id.clone(), r.relationship))
            .collect();
        triples.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        triples
    }

    #[test]
    fn test_resolve_owner_experiment() {
        let refs = vec![
            ApiRef::new(ApiType::Namespace, "ns", ApiRel::Owner),
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
        ];
        let id = resolve_owner(&refs, ResourceType::Experiment, Relationship::Owner).unwrap();
        assert_eq!(id, "e1");
    }

    #[test]
    fn test_resolve_owner_missing_is_not_found() {
        let refs = vec![ApiRef::new(ApiType::Namespace, "ns", ApiRel::Owner)];
        let err = resolve_owner(&refs, ResourceType::Experiment, Relationship::Owner).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_resolve_owner_conflicting_ids() {
        let refs = vec![
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
            ApiRef::new(ApiType::Experiment, "e2", ApiRel::Owner),
        ];
        let err = resolve_owner(&refs, ResourceType::Experiment, Relationship::Owner).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_resolve_owner_conflicting_relationship() {
        let refs = vec![
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Creator),
        ];
        let err = resolve_owner(&refs, ResourceType::Experiment, Relationship::Owner).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_resolve_owner_duplicate_same_id_is_fine() {
        let refs = vec![
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
        ];
        let id = resolve_owner(&refs, ResourceType::Experiment, Relationship::Owner).unwrap();
        assert_eq!(id, "e1");
    }

    #[test]
    fn test_unknown_enum_rejected() {
        let refs = vec![ApiRef::new(ApiType::Unknown, "x", ApiRel::Owner)];
        assert!(find_owner(&refs, ResourceType::Experiment, Relationship::Owner).is_err());

        let refs = vec![ApiRef::new(ApiType::Experiment, "x", ApiRel::Unknown)];
        assert!(Relations::from_api(&refs).is_err());
    }

    #[test]
    fn test_round_trip_preserves_multiset_in_any_order() {
        let base = vec![
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
            ApiRef::new(ApiType::Namespace, "ns", ApiRel::Owner),
            ApiRef::new(ApiType::Job, "j1", ApiRel::Creator),
            ApiRef::new(ApiType::PipelineVersion, "v1", ApiRel::Creator),
            ApiRef::new(ApiType::Pipeline, "p1", ApiRel::Creator),
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
        ];
        let expected = triples_of(&base);

        let mut permuted = base.clone();
        for shift in 0..permuted.len() {
            permuted.rotate_left(1);
            let mut reversed = permuted.clone();
            reversed.reverse();
            for input in [&permuted, &reversed] {
                let relations = Relations::from_api(input).unwrap();
                assert_eq!(triples_of(&relations.to_api()), expected, "shift {shift}");
            }
        }
    }

    #[test]
    fn test_model_round_trip_through_names() {
        let refs = vec![
            ApiRef::new(ApiType::Experiment, "e1", ApiRel::Owner),
            ApiRef::new(ApiType::Namespace, "team-a", ApiRel::Owner),
        ];
        let mut names = ReferenceNames::new();
        names.insert(ResourceType::Experiment, "e1", "exp one");

        let model = Relations::from_api(&refs)
            .unwrap()
            .to_model("r1", ResourceType::Run, &names)
            .unwrap();
        assert_eq!(model[0].reference_name, "exp one");
        assert_eq!(model[1].reference_name, "team-a");
        assert!(model.iter().all(|r| r.resource_id == "r1"));

        let back = to_api_references(&model);
        assert_eq!(triples_of(&back), triples_of(&refs));

        let relations = Relations::from_model(&model);
        assert_eq!(relations.owner_experiment.as_deref(), Some("e1"));
        assert_eq!(relations.owner_namespace.as_deref(), Some("team-a"));
    }

    #[test]
    fn test_missing_name_is_not_found() {
        let refs = vec![ApiRef::new(ApiType::Pipeline, "p9", ApiRel::Owner)];
        let err = Relations::from_api(&refs)
            .unwrap()
            .to_model("r1", ResourceType::Run, &ReferenceNames::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
