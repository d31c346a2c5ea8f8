//! Template registry: validated, read-only process definitions
//!
//! Templates are validated once at registration and shared read-only
//! across concurrent callers; there is no post-construction mutation.
//! To change a process, build a new registry with a new template.

use std::collections::HashMap;
use std::sync::Arc;

use planroom_workflow_store::WorkflowStore;
use planroom_workflow_types::{
    EntityType, Template, TemplateId, WorkflowError, WorkflowResult,
};

/// Registry of workflow templates, indexed by id and by entity type
#[derive(Clone, Debug, Default)]
pub struct TemplateRegistry {
    by_id: HashMap<TemplateId, Arc<Template>>,
    by_entity: HashMap<EntityType, TemplateId>,
}

impl TemplateRegistry {
    /// Build a registry from a set of templates
    ///
    /// Every template is validated, and each entity type may be governed
    /// by at most one template.
    pub fn new(templates: Vec<Template>) -> WorkflowResult<Self> {
        let mut by_id = HashMap::new();
        let mut by_entity = HashMap::new();

        for template in templates {
            template.validate()?;
            if by_entity.contains_key(&template.entity_type) {
                return Err(WorkflowError::Validation(format!(
                    "multiple templates registered for entity type '{}'",
                    template.entity_type
                )));
            }
            tracing::info!(
                template_id = %template.id,
                entity_type = %template.entity_type,
                "workflow template registered"
            );
            by_entity.insert(template.entity_type.clone(), template.id.clone());
            by_id.insert(template.id.clone(), Arc::new(template));
        }

        Ok(Self { by_id, by_entity })
    }

    /// Hydrate a registry from persisted templates
    pub async fn load(store: &dyn WorkflowStore) -> WorkflowResult<Self> {
        Self::new(store.load_templates().await?)
    }

    /// The template governing an entity type
    pub fn resolve(&self, entity_type: &EntityType) -> WorkflowResult<Arc<Template>> {
        self.by_entity
            .get(entity_type)
            .and_then(|id| self.by_id.get(id))
            .cloned()
            .ok_or_else(|| WorkflowError::TemplateNotFound(entity_type.clone()))
    }

    /// A template by id
    pub fn get(&self, id: &TemplateId) -> WorkflowResult<Arc<Template>> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownTemplate(id.clone()))
    }

    /// All registered templates
    pub fn list(&self) -> Vec<Arc<Template>> {
        self.by_id.values().cloned().collect()
    }

    /// Number of registered templates
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    pub fn contains(&self, id: &TemplateId) -> bool {
        self.by_id.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planroom_workflow_store::InMemoryWorkflowStore;
    use planroom_workflow_types::{Stage, Transition};

    fn make_template(entity_type: &str) -> Template {
        let mut template = Template::new("Review", EntityType::new(entity_type));
        template
            .add_stage(Stage::initial("open", "Open"))
            .unwrap();
        template
            .add_stage(Stage::terminal("closed", "Closed"))
            .unwrap();
        template
            .add_transition(Transition::new("open", "closed", "close"))
            .unwrap();
        template
    }

    #[test]
    fn test_resolve_by_entity_type() {
        let registry =
            TemplateRegistry::new(vec![make_template("submittal"), make_template("drawing")])
                .unwrap();
        assert_eq!(registry.count(), 2);

        let template = registry.resolve(&EntityType::new("submittal")).unwrap();
        assert_eq!(template.entity_type, EntityType::new("submittal"));
        assert!(registry.contains(&template.id));
        assert!(registry.get(&template.id).is_ok());
    }

    #[test]
    fn test_unknown_entity_type() {
        let registry = TemplateRegistry::new(vec![make_template("submittal")]).unwrap();
        let result = registry.resolve(&EntityType::new("daily_log"));
        assert!(matches!(result, Err(WorkflowError::TemplateNotFound(_))));

        let result = registry.get(&TemplateId::new("nonexistent"));
        assert!(matches!(result, Err(WorkflowError::UnknownTemplate(_))));
    }

    #[test]
    fn test_rejects_invalid_template() {
        let mut invalid = Template::new("Bad", EntityType::new("rfi"));
        invalid.add_stage(Stage::new("only", "Only")).unwrap();
        let result = TemplateRegistry::new(vec![invalid]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_duplicate_entity_type() {
        let result =
            TemplateRegistry::new(vec![make_template("submittal"), make_template("submittal")]);
        assert!(matches!(result, Err(WorkflowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = InMemoryWorkflowStore::new();
        let template = make_template("submittal");
        let template_id = template.id.clone();
        store.save_template(&template).await.unwrap();

        let registry = TemplateRegistry::load(&store).await.unwrap();
        assert_eq!(registry.count(), 1);
        let loaded = registry.get(&template_id).unwrap();
        assert_eq!(loaded.stage_count(), 2);
        assert_eq!(loaded.transitions.len(), 1);
    }
}
