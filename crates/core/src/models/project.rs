//! Project model - the unit of membership, tasks and chat

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patch::{double_option, from_json, require_text};
use crate::error::{Error, Result};

/// A project with its member set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    /// Member user ids. Treated as a set; order carries no meaning.
    pub members: Vec<Uuid>,
    /// Creator is authorized whether or not listed in `members`
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: String, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description: None,
            deadline: None,
            members: Vec::new(),
            created_by,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = Uuid>) -> Self {
        self.members = dedup_members(members);
        self
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    /// Creator or listed member
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.created_by == user_id || self.is_member(user_id)
    }

    /// Apply an already validated patch
    pub fn apply(&mut self, patch: ProjectPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(deadline) = patch.deadline {
            self.deadline = deadline;
        }
        if let Some(members) = patch.members {
            self.members = dedup_members(members);
        }
    }
}

fn dedup_members(members: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::new();
    for id in members {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Fields a client may supply when creating a project
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

impl NewProject {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let draft: NewProject = from_json("project", value)?;
        require_text("name", &draft.name)?;
        Ok(draft)
    }

    pub fn into_project(self, created_by: Uuid) -> Project {
        let mut project = Project::new(self.name, created_by).with_members(self.members);
        project.description = self.description;
        project.deadline = self.deadline;
        project
    }
}

/// Allow-listed project update
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub members: Option<Vec<Uuid>>,
}

impl ProjectPatch {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let patch: ProjectPatch = from_json("project patch", value)?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.deadline.is_none()
            && self.members.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidArgument("project patch has no fields".into()));
        }
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_members_are_a_set() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let project = Project::new("Launch".into(), Uuid::new_v4()).with_members([a, b, a]);
        assert_eq!(project.members.len(), 2);
        assert!(project.is_member(a));
        assert!(project.involves(project.created_by));
    }

    #[test]
    fn test_new_project_requires_name() {
        assert!(NewProject::from_value(json!({ "name": "  " })).is_err());
        let draft = NewProject::from_value(json!({ "name": "Launch" })).unwrap();
        assert_eq!(draft.name, "Launch");
    }

    #[test]
    fn test_patch_rejects_creator_change() {
        let err = ProjectPatch::from_value(json!({ "created_by": Uuid::new_v4() })).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_patch_clears_description() {
        let mut project = Project::new("Launch".into(), Uuid::new_v4())
            .with_description("old".into());
        let patch = ProjectPatch::from_value(json!({ "description": null })).unwrap();
        project.apply(patch);
        assert_eq!(project.description, None);
    }
}
