use serde::{Deserialize, Serialize};

/// Envelope returned by the user service (`GET /api/v1/users/{id}`).
#[derive(Debug, Clone, Deserialize)]
pub struct UserEnvelope {
    pub success: bool,
    pub data: Option<UserData>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserData {
    pub email: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    #[serde(default)]
    pub preferences: Option<UserPreferences>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPreferences {
    pub email_enabled: Option<bool>,
    pub language: Option<String>,
}

/// Normalized recipient data extracted from [`UserData`].
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub email: String,
    pub name: String,
    pub language: String,
    pub email_enabled: bool,
}

impl UserProfile {
    pub fn from_data(data: UserData) -> Self {
        let name = match (data.name, data.first_name, data.last_name) {
            (Some(name), _, _) if !name.is_empty() => name,
            (_, Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
                format!("{} {}", first, last)
            }
            (_, Some(first), _) if !first.is_empty() => first,
            (_, _, Some(last)) if !last.is_empty() => last,
            _ => "User".to_string(),
        };

        let (email_enabled, language) = match data.preferences {
            Some(prefs) => (
                // Fail open: a missing preference must not silently drop mail.
                prefs.email_enabled.unwrap_or(true),
                prefs.language.unwrap_or_else(|| "en".to_string()),
            ),
            None => (true, "en".to_string()),
        };

        Self {
            email: data.email,
            name,
            language,
            email_enabled,
        }
    }
}
