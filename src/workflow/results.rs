use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

/// The grading task each user is currently waiting on.
#[derive(Debug, Default)]
pub(crate) struct ActiveTasks {
    tasks: DashMap<i64, String>,
}

impl ActiveTasks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, user_id: i64, task_id: &str) {
        self.tasks.insert(user_id, task_id.to_string());
    }

    pub(crate) fn get(&self, user_id: i64) -> Option<String> {
        self.tasks.get(&user_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn clear(&self, user_id: i64) -> Option<String> {
        self.tasks.remove(&user_id).map(|(_, task_id)| task_id)
    }

    /// Clears the slot only while it still points at `task_id`; a newer
    /// submission keeps its own entry.
    pub(crate) fn clear_if(&self, user_id: i64, task_id: &str) -> bool {
        self.tasks.remove_if(&user_id, |_, current| current == task_id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rating {
    Excellent,
    Good,
    Bad,
}

impl Rating {
    pub(crate) const ALL: [Rating; 3] = [Rating::Excellent, Rating::Good, Rating::Bad];

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "excellent" => Some(Rating::Excellent),
            "good" => Some(Rating::Good),
            "bad" => Some(Rating::Bad),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Rating::Excellent => "excellent",
            Rating::Good => "good",
            Rating::Bad => "bad",
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Rating::Excellent => "Excellent 🌟",
            Rating::Good => "Good 👍",
            Rating::Bad => "Bad 👎",
        }
    }

    pub(crate) fn title(self) -> &'static str {
        match self {
            Rating::Excellent => "Excellent",
            Rating::Good => "Good",
            Rating::Bad => "Bad",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResultMeta {
    pub(crate) student_image_b64: String,
    pub(crate) annotated_image_b64: Option<String>,
    pub(crate) grade: Value,
    pub(crate) feedback: String,
    pub(crate) teacher_contact: String,
    rated: bool,
}

impl ResultMeta {
    pub(crate) fn new(
        student_image_b64: String,
        annotated_image_b64: Option<String>,
        grade: Value,
        feedback: String,
        teacher_contact: String,
    ) -> Self {
        Self { student_image_b64, annotated_image_b64, grade, feedback, teacher_contact, rated: false }
    }

    #[cfg(test)]
    pub(crate) fn is_rated(&self) -> bool {
        self.rated
    }
}

#[derive(Debug)]
pub(crate) enum RatingClaim {
    Claimed(ResultMeta),
    AlreadyRated,
    Unknown,
}

/// Completed grading results, keyed by task id.
#[derive(Debug, Default)]
pub(crate) struct ResultStore {
    results: DashMap<String, ResultMeta>,
}

impl ResultStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// First writer wins; returns false if the task already has a result.
    pub(crate) fn insert_once(&self, task_id: &str, meta: ResultMeta) -> bool {
        match self.results.entry(task_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(meta);
                true
            }
        }
    }

    pub(crate) fn get(&self, task_id: &str) -> Option<ResultMeta> {
        self.results.get(task_id).map(|entry| entry.value().clone())
    }

    /// Marks the result as rated so one task yields one ledger entry.
    pub(crate) fn claim_for_rating(&self, task_id: &str) -> RatingClaim {
        let Some(mut entry) = self.results.get_mut(task_id) else {
            return RatingClaim::Unknown;
        };
        if entry.rated {
            return RatingClaim::AlreadyRated;
        }
        entry.rated = true;
        RatingClaim::Claimed(entry.value().clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.results.len()
    }
}

/// Renders a grade value the way the grading API sends it (`8`, `"B+"`, ...).
pub(crate) fn display_grade(grade: &Value) -> String {
    match grade {
        Value::Null => "N/A".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
