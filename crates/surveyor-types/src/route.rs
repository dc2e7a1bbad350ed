use serde::{Deserialize, Serialize};

/// Views the console can be asked to show. The actual routing mechanism lives
/// outside the core; this is only the effect vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Route {
    Acquisition { job_id: String },
    Planning { job_id: Option<String> },
    Job { job_id: String },
    Projects,
    Login,
    Other { path: String },
}

impl Route {
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Route::Acquisition { .. })
    }

    pub fn is_planning(&self) -> bool {
        matches!(self, Route::Planning { .. })
    }

    pub fn to_path(&self) -> String {
        match self {
            Route::Acquisition { job_id } => format!("/acquisition/{job_id}"),
            Route::Planning { job_id: Some(id) } => format!("/planning/{id}"),
            Route::Planning { job_id: None } => "/planning".to_string(),
            Route::Job { job_id } => format!("/jobs/{job_id}"),
            Route::Projects => "/projects".to_string(),
            Route::Login => "/login".to_string(),
            Route::Other { path } => path.clone(),
        }
    }

    pub fn from_path(path: &str) -> Self {
        let trimmed = path.trim().trim_end_matches('/');
        let mut parts = trimmed.trim_start_matches('/').splitn(2, '/');
        let head = parts.next().unwrap_or_default();
        let tail = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        match (head, tail) {
            ("acquisition", Some(job_id)) => Route::Acquisition { job_id },
            ("planning", job_id) => Route::Planning { job_id },
            ("jobs", Some(job_id)) => Route::Job { job_id },
            ("projects", None) => Route::Projects,
            ("login", None) => Route::Login,
            _ => Route::Other {
                path: path.to_string(),
            },
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_path())
    }
}
