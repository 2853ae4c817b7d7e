use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::ItemDefinition;
use crate::error::{BlocksError, Result};
use crate::schema::Schema;

/// How a template collects its answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Form,
    Conversational,
    MultiStep,
    Adaptive,
}

impl FlowKind {
    /// Reads `metadata.flow`, falling back on whether the template declares steps.
    pub fn of(template: &ItemDefinition) -> Self {
        let declared = template
            .metadata
            .get("flow")
            .cloned()
            .and_then(|value| serde_json::from_value::<FlowKind>(value).ok());
        match declared {
            Some(flow) if flow.is_stepwise() && template.steps.is_empty() => FlowKind::Form,
            Some(flow) => flow,
            None if template.steps.is_empty() => FlowKind::Form,
            None => FlowKind::MultiStep,
        }
    }

    pub fn is_stepwise(self) -> bool {
        matches!(self, FlowKind::Conversational | FlowKind::MultiStep)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// Progress through one session-bearing template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub template_id: String,
    pub flow: FlowKind,
    pub status: SessionStatus,
    pub responses: Map<String, Value>,
    pub current_step: usize,
    pub total_steps: usize,
    pub completed: bool,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl Session {
    pub fn start(session_id: impl Into<String>, template: &ItemDefinition) -> Self {
        let flow = FlowKind::of(template);
        let total_steps = if flow.is_stepwise() {
            template.steps.len()
        } else {
            1
        };
        Self {
            session_id: session_id.into(),
            template_id: template.id.clone(),
            flow,
            status: SessionStatus::Active,
            responses: Map::new(),
            current_step: 1,
            total_steps,
            completed: false,
            created_at: unix_now(),
            completed_at: None,
        }
    }

    /// The schema answers for the current step are checked against.
    pub fn expected_schema<'a>(&self, template: &'a ItemDefinition) -> &'a Schema {
        if self.flow.is_stepwise() {
            template
                .steps
                .get(self.current_step.saturating_sub(1))
                .map(|step| &step.schema)
                .unwrap_or(&template.schema)
        } else {
            &template.schema
        }
    }

    /// Records an accepted submission and moves the session forward by one step.
    pub fn accept(&mut self, responses: Map<String, Value>) -> Result<()> {
        if self.completed {
            return Err(BlocksError::Session(format!(
                "session `{}` is already completed",
                self.session_id
            )));
        }
        self.responses.extend(responses);
        if self.current_step < self.total_steps {
            self.current_step += 1;
        } else {
            self.completed = true;
            self.status = SessionStatus::Completed;
            self.completed_at = Some(unix_now());
        }
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// In-memory session registry shared by clones.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<Vec<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, template: &ItemDefinition, session_id: Option<String>) -> Result<Session> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session::start(session_id, template);
        let mut sessions = self.write()?;
        if sessions.iter().any(|s| s.session_id == session.session_id) {
            return Err(BlocksError::Session(format!(
                "session `{}` already exists",
                session.session_id
            )));
        }
        debug!(session = %session.session_id, template = %template.id, flow = ?session.flow, "session started");
        sessions.push(session.clone());
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.read()?
            .iter()
            .find(|session| session.session_id == session_id)
            .cloned()
            .ok_or_else(|| BlocksError::not_found("session", session_id))
    }

    /// Runs `apply` against the session while holding the write lock, so a
    /// check-then-advance sequence cannot interleave with another submission.
    pub fn update<T, F>(&self, session_id: &str, apply: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut sessions = self.write()?;
        let session = sessions
            .iter_mut()
            .find(|session| session.session_id == session_id)
            .ok_or_else(|| BlocksError::not_found("session", session_id))?;
        let outcome = apply(session)?;
        debug!(
            session = %session_id,
            step = session.current_step,
            completed = session.completed,
            "session updated"
        );
        Ok(outcome)
    }

    pub fn list(&self, status: Option<SessionStatus>) -> Vec<Session> {
        self.read()
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|session| status.map_or(true, |wanted| session.status == wanted))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove(&self, session_id: &str) -> Result<Session> {
        let mut sessions = self.write()?;
        let position = sessions
            .iter()
            .position(|session| session.session_id == session_id)
            .ok_or_else(|| BlocksError::not_found("session", session_id))?;
        Ok(sessions.remove(position))
    }

    pub fn len(&self) -> usize {
        self.read().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Session>>> {
        self.sessions
            .read()
            .map_err(|_| BlocksError::Protocol("session lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Session>>> {
        self.sessions
            .write()
            .map_err(|_| BlocksError::Protocol("session lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, StepDefinition};
    use serde_json::json;

    fn three_steps() -> ItemDefinition {
        ItemDefinition::new("onboarding", "template")
            .with_metadata("flow", json!("multi_step"))
            .with_step(StepDefinition::new(
                "Basics",
                Schema::new().field("name", FieldSpec::string().required()),
            ))
            .with_step(StepDefinition::new(
                "Role",
                Schema::new().field("role", FieldSpec::string().required()),
            ))
            .with_step(StepDefinition::new(
                "Team",
                Schema::new().field("team_size", FieldSpec::number()),
            ))
    }

    fn answer(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn flow_defaults_follow_steps() {
        assert_eq!(FlowKind::of(&three_steps()), FlowKind::MultiStep);
        assert_eq!(
            FlowKind::of(&ItemDefinition::new("contact", "template")),
            FlowKind::Form
        );
        let adaptive = ItemDefinition::new("a", "template").with_metadata("flow", json!("adaptive"));
        assert_eq!(FlowKind::of(&adaptive), FlowKind::Adaptive);
    }

    #[test]
    fn multi_step_completes_after_last_step() {
        let template = three_steps();
        let mut session = Session::start("s1", &template);
        assert_eq!(session.total_steps, 3);

        session.accept(answer("name", json!("Ada"))).unwrap();
        assert_eq!(session.current_step, 2);
        session.accept(answer("role", json!("dev"))).unwrap();
        assert_eq!(session.current_step, 3);
        assert!(!session.completed);
        session.accept(answer("team_size", json!(4))).unwrap();
        assert!(session.completed);
        assert_eq!(session.current_step, 3);
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.responses.len(), 3);

        assert!(session.accept(answer("late", json!(true))).is_err());
        assert_eq!(session.responses.len(), 3);
    }

    #[test]
    fn form_completes_on_first_submission() {
        let template = ItemDefinition::new("contact", "template")
            .with_schema(Schema::new().field("email", FieldSpec::string().required()));
        let mut session = Session::start("s", &template);
        assert_eq!(session.expected_schema(&template).len(), 1);
        session.accept(answer("email", json!("a@b.c"))).unwrap();
        assert!(session.completed);
    }

    #[test]
    fn store_rejects_duplicate_ids_and_filters_by_status() {
        let store = SessionStore::new();
        let template = three_steps();
        let form = ItemDefinition::new("contact", "template");
        store.start(&template, Some("one".into())).unwrap();
        assert!(store.start(&template, Some("one".into())).is_err());

        let generated = store.start(&form, None).unwrap();
        assert!(!generated.session_id.is_empty());
        store
            .update(&generated.session_id, |session| session.accept(Map::new()))
            .unwrap();

        assert_eq!(store.list(None).len(), 2);
        assert_eq!(store.list(Some(SessionStatus::Completed)).len(), 1);
        assert_eq!(store.list(Some(SessionStatus::Active))[0].session_id, "one");

        store.remove("one").unwrap();
        assert!(matches!(store.get("one"), Err(BlocksError::NotFound { .. })));
    }
}
