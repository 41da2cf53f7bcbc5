use std::collections::BTreeMap;

use dashmap::DashMap;
use serde_json::Value;

pub(crate) const UNKNOWN_CONTACT: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Start,
    WaitContact,
    Step1Questions,
    Step2Answers,
    Step3Student,
}

impl SessionState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SessionState::Start => "START",
            SessionState::WaitContact => "WAIT_CONTACT",
            SessionState::Step1Questions => "STEP_1_QUESTIONS",
            SessionState::Step2Answers => "STEP_2_ANSWERS",
            SessionState::Step3Student => "STEP_3_STUDENT",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct WorkflowData {
    questions_list: Option<Value>,
    model_answer: Option<Value>,
}

impl WorkflowData {
    pub(crate) fn questions_list(&self) -> Option<&Value> {
        self.questions_list.as_ref()
    }

    pub(crate) fn model_answer(&self) -> Option<&Value> {
        self.model_answer.as_ref()
    }

    pub(crate) fn set_questions_list(&mut self, questions: Value) {
        self.questions_list = Some(questions);
    }

    /// Refuses the answer key while no question set exists.
    pub(crate) fn set_model_answer(&mut self, answer: Value) -> bool {
        if self.questions_list.is_none() {
            return false;
        }
        self.model_answer = Some(answer);
        true
    }

    /// Dropping the questions also drops the answer key mapped against them.
    pub(crate) fn clear_questions_list(&mut self) {
        self.questions_list = None;
        self.model_answer = None;
    }

    pub(crate) fn clear_model_answer(&mut self) {
        self.model_answer = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Session {
    pub(crate) state: SessionState,
    pub(crate) verified_contact: String,
    pub(crate) data: WorkflowData,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Start,
            verified_contact: UNKNOWN_CONTACT.to_string(),
            data: WorkflowData::default(),
        }
    }

    pub(crate) fn has_verified_contact(&self) -> bool {
        self.verified_contact != UNKNOWN_CONTACT
    }

    /// True once both the questions and the answer key are present.
    pub(crate) fn can_grade(&self) -> bool {
        self.data.questions_list.is_some() && self.data.model_answer.is_some()
    }

    fn reset(&mut self) {
        self.state = SessionState::Step1Questions;
        self.data = WorkflowData::default();
    }
}

/// Per-user sessions, kept for the process lifetime.
#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    sessions: DashMap<i64, Session>,
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_or_create(&self, user_id: i64) -> Session {
        self.sessions
            .entry(user_id)
            .or_insert_with(|| {
                tracing::debug!(user_id, "New session");
                Session::new()
            })
            .clone()
    }

    /// Runs `apply` against the user's session while holding its shard lock.
    pub(crate) fn update<R>(&self, user_id: i64, apply: impl FnOnce(&mut Session) -> R) -> R {
        let mut entry = self.sessions.entry(user_id).or_insert_with(Session::new);
        apply(entry.value_mut())
    }

    pub(crate) fn reset(&self, user_id: i64) -> Session {
        self.update(user_id, |session| {
            session.reset();
            tracing::debug!(user_id, "Session reset to STEP_1_QUESTIONS");
            session.clone()
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn count_by_state(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.sessions.iter() {
            *counts.entry(entry.value().state.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_lookup_creates_start_session() {
        let store = SessionStore::new();
        let session = store.get_or_create(7);

        assert_eq!(session.state, SessionState::Start);
        assert_eq!(session.verified_contact, UNKNOWN_CONTACT);
        assert!(session.data.questions_list().is_none());
        assert_eq!(store.len(), 1);

        store.get_or_create(7);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reset_keeps_contact_and_clears_data() {
        let store = SessionStore::new();
        store.update(7, |session| {
            session.verified_contact = "+15550100".to_string();
            session.state = SessionState::Step3Student;
            session.data.set_questions_list(json!({"q1": "What is 2+2?"}));
            assert!(session.data.set_model_answer(json!({"answer_1": "4"})));
        });

        let session = store.reset(7);

        assert_eq!(session.state, SessionState::Step1Questions);
        assert_eq!(session.verified_contact, "+15550100");
        assert_eq!(session.data, WorkflowData::default());
    }

    #[test]
    fn model_answer_requires_questions() {
        let mut data = WorkflowData::default();
        assert!(!data.set_model_answer(json!({"answer_1": "4"})));
        assert!(data.model_answer().is_none());

        data.set_questions_list(json!({"q1": "What is 2+2?"}));
        assert!(data.set_model_answer(json!({"answer_1": "4"})));

        data.clear_questions_list();
        assert!(data.model_answer().is_none());
    }

    #[test]
    fn count_by_state_groups_sessions() {
        let store = SessionStore::new();
        store.get_or_create(1);
        store.get_or_create(2);
        store.reset(3);

        let counts = store.count_by_state();
        assert_eq!(counts.get("START"), Some(&2));
        assert_eq!(counts.get("STEP_1_QUESTIONS"), Some(&1));
    }
}
