//! Assignment resolution: mapping a stage to a responsible user
//!
//! Project membership is owned by another subsystem; the engine reaches
//! it through the [`MembershipDirectory`] port. Resolution is
//! deterministic (the earliest-joined member holding the stage's role
//! wins), so two nodes resolving the same stage agree on the assignee.
//! An unassigned instance is not an error: it stays actionable by any
//! authorized actor on the project.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use planroom_workflow_types::{
    ProjectId, RoleId, Stage, UserId, WorkflowError, WorkflowInstance, WorkflowResult,
};

/// One user's membership in a project
#[derive(Clone, Debug)]
pub struct ProjectMember {
    pub user_id: UserId,
    pub role: RoleId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

impl ProjectMember {
    pub fn new(
        user_id: UserId,
        role: RoleId,
        display_name: impl Into<String>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            role,
            display_name: display_name.into(),
            joined_at,
        }
    }
}

/// Port to the project-membership service
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Members of a project holding a role, in no particular order
    async fn members_with_role(
        &self,
        project: &ProjectId,
        role: &RoleId,
    ) -> WorkflowResult<Vec<ProjectMember>>;

    /// Display name for a user, if the directory knows them
    async fn display_name(&self, user: &UserId) -> WorkflowResult<Option<String>>;
}

/// Resolves the responsible user for a stage
#[derive(Clone)]
pub struct AssignmentResolver {
    directory: Arc<dyn MembershipDirectory>,
}

impl AssignmentResolver {
    pub fn new(directory: Arc<dyn MembershipDirectory>) -> Self {
        Self { directory }
    }

    /// Pick the assignee for a stage: the earliest-joined project member
    /// holding the stage's role (ties broken by user id). None when the
    /// stage has no role or nobody holds it.
    pub async fn resolve(
        &self,
        stage: &Stage,
        instance: &WorkflowInstance,
    ) -> WorkflowResult<Option<UserId>> {
        let Some(role) = &stage.assignee_role else {
            return Ok(None);
        };

        let mut members = self
            .directory
            .members_with_role(&instance.project_id, role)
            .await?;
        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        Ok(members.into_iter().next().map(|m| m.user_id))
    }
}

// ── In-memory directory ──────────────────────────────────────────────

/// Directory backed by process memory, for tests and embedded use
#[derive(Default)]
pub struct InMemoryDirectory {
    members: Mutex<HashMap<ProjectId, Vec<ProjectMember>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, project: ProjectId, member: ProjectMember) {
        let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        members.entry(project).or_default().push(member);
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryDirectory {
    async fn members_with_role(
        &self,
        project: &ProjectId,
        role: &RoleId,
    ) -> WorkflowResult<Vec<ProjectMember>> {
        let members = self
            .members
            .lock()
            .map_err(|_| WorkflowError::Storage("directory lock poisoned".into()))?;
        Ok(members
            .get(project)
            .map(|list| list.iter().filter(|m| &m.role == role).cloned().collect())
            .unwrap_or_default())
    }

    async fn display_name(&self, user: &UserId) -> WorkflowResult<Option<String>> {
        let members = self
            .members
            .lock()
            .map_err(|_| WorkflowError::Storage("directory lock poisoned".into()))?;
        Ok(members
            .values()
            .flatten()
            .find(|m| &m.user_id == user)
            .map(|m| m.display_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use planroom_workflow_types::{EntityType, StageId, TemplateId};

    fn joined(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 15, 9, 0, 0).unwrap()
    }

    fn make_instance() -> WorkflowInstance {
        WorkflowInstance::new(
            TemplateId::new("tpl-1"),
            EntityType::new("submittal"),
            "sub-42",
            ProjectId::new("proj-1"),
            StageId::new("submitted"),
        )
    }

    fn make_directory() -> Arc<InMemoryDirectory> {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_member(
            ProjectId::new("proj-1"),
            ProjectMember::new(
                UserId::new("u-newer"),
                RoleId::new("architect"),
                "Dana Brooks",
                joined(2024),
            ),
        );
        directory.add_member(
            ProjectId::new("proj-1"),
            ProjectMember::new(
                UserId::new("u-older"),
                RoleId::new("architect"),
                "Riley Okafor",
                joined(2021),
            ),
        );
        directory.add_member(
            ProjectId::new("proj-1"),
            ProjectMember::new(
                UserId::new("u-gc"),
                RoleId::new("general_contractor"),
                "Sam Ferris",
                joined(2020),
            ),
        );
        directory
    }

    #[tokio::test]
    async fn test_earliest_joined_wins() {
        let directory = make_directory();
        let resolver = AssignmentResolver::new(directory);
        let stage =
            Stage::new("under_review", "Under Review").with_assignee_role(RoleId::new("architect"));

        let assignee = resolver.resolve(&stage, &make_instance()).await.unwrap();
        assert_eq!(assignee, Some(UserId::new("u-older")));
    }

    #[tokio::test]
    async fn test_no_role_means_unassigned() {
        let resolver = AssignmentResolver::new(make_directory());
        let stage = Stage::new("submitted", "Submitted");

        let assignee = resolver.resolve(&stage, &make_instance()).await.unwrap();
        assert_eq!(assignee, None);
    }

    #[tokio::test]
    async fn test_no_candidate_means_unassigned() {
        let resolver = AssignmentResolver::new(make_directory());
        let stage = Stage::new("pricing", "Pricing").with_assignee_role(RoleId::new("estimator"));

        let assignee = resolver.resolve(&stage, &make_instance()).await.unwrap();
        assert_eq!(assignee, None);
    }

    #[tokio::test]
    async fn test_same_join_date_breaks_ties_by_user_id() {
        let directory = Arc::new(InMemoryDirectory::new());
        for user in ["u-b", "u-a"] {
            directory.add_member(
                ProjectId::new("proj-1"),
                ProjectMember::new(
                    UserId::new(user),
                    RoleId::new("architect"),
                    user,
                    joined(2022),
                ),
            );
        }
        let resolver = AssignmentResolver::new(directory);
        let stage = Stage::new("review", "Review").with_assignee_role(RoleId::new("architect"));

        let assignee = resolver.resolve(&stage, &make_instance()).await.unwrap();
        assert_eq!(assignee, Some(UserId::new("u-a")));
    }

    #[tokio::test]
    async fn test_display_name_lookup() {
        let directory = make_directory();
        assert_eq!(
            directory
                .display_name(&UserId::new("u-older"))
                .await
                .unwrap(),
            Some("Riley Okafor".to_string())
        );
        assert_eq!(
            directory
                .display_name(&UserId::new("nobody"))
                .await
                .unwrap(),
            None
        );
    }
}
